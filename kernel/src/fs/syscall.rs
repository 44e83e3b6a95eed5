//! # 文件系统的系统调用层
//!
//! 每个调用先验参，再按需取 vnode 锁并转交 vnode 操作，
//! 最后推进文件位置。任何失败路径都把已取得的引用如数退还。

use alloc::sync::Arc;

use enumflags2::BitFlags;
use log::debug;
use vfs::{access_of, DirEnt, Errno, OpenFlag, Result, SeekWhence, Stat, VnodeKind, NAME_LEN};

use super::file::OpenFile;
use super::namev;
use crate::proc::Process;

pub fn do_open(proc: &Process, path: &str, flags: BitFlags<OpenFlag>) -> Result<usize> {
    // 只写与读写互斥
    if flags.contains(OpenFlag::WRONLY) && flags.contains(OpenFlag::RDWR) {
        return Err(Errno::EINVAL);
    }

    let cwd = proc.cwd();
    let vnode = namev::namev_open(&cwd, path, flags, VnodeKind::Regular, 0)?;

    let (_, writable) = access_of(flags);
    if vnode.kind().is_dir() && writable {
        return Err(Errno::EISDIR);
    }
    if writable && vnode.kind() == VnodeKind::Regular && flags.contains(OpenFlag::TRUNC) {
        vnode.truncate();
    }

    let mut files = proc.files().lock();
    let fd = files.get_empty_fd()?;
    files.install(fd, OpenFile::new(vnode, flags));
    debug!("open {path} -> fd {fd}");
    Ok(fd)
}

pub fn do_close(proc: &Process, fd: usize) -> Result<()> {
    proc.files().lock().remove(fd).map(drop)
}

pub fn do_read(proc: &Process, fd: usize, buf: &mut [u8]) -> Result<usize> {
    let file = proc.files().lock().get(fd)?;
    if !file.readable() {
        return Err(Errno::EBADF);
    }
    if file.vnode().kind().is_dir() {
        return Err(Errno::EISDIR);
    }

    let mut pos = file.pos.lock();
    let n = file.vnode().read(*pos, buf)?;
    *pos += n;
    Ok(n)
}

pub fn do_write(proc: &Process, fd: usize, buf: &[u8]) -> Result<usize> {
    let file = proc.files().lock().get(fd)?;
    if !file.writable() {
        return Err(Errno::EBADF);
    }

    let mut pos = file.pos.lock();
    if file.flags().contains(OpenFlag::APPEND) {
        // 推进到末尾与写入在同一次结点锁内完成
        let (end, n) = file.vnode().append(buf)?;
        *pos = end;
        Ok(n)
    } else {
        let n = file.vnode().write(*pos, buf)?;
        *pos += n;
        Ok(n)
    }
}

pub fn do_lseek(proc: &Process, fd: usize, offset: isize, whence: SeekWhence) -> Result<usize> {
    let file = proc.files().lock().get(fd)?;
    let mut pos = file.pos.lock();

    let base = match whence {
        SeekWhence::Set => 0,
        SeekWhence::Cur => *pos as isize,
        SeekWhence::End => file.vnode().len() as isize,
    };
    let new_pos = base + offset;
    if new_pos < 0 {
        return Err(Errno::EINVAL);
    }
    *pos = new_pos as usize;
    Ok(new_pos as usize)
}

pub fn do_dup(proc: &Process, fd: usize) -> Result<usize> {
    let mut files = proc.files().lock();
    let file = files.get(fd)?;
    let new_fd = files.get_empty_fd()?;
    files.install(new_fd, file);
    Ok(new_fd)
}

pub fn do_dup2(proc: &Process, old_fd: usize, new_fd: usize) -> Result<usize> {
    let mut files = proc.files().lock();
    let file = files.get(old_fd)?;
    if old_fd == new_fd {
        return Ok(new_fd);
    }
    // 原先占着 new_fd 的文件就此关闭
    let _ = files.remove(new_fd);
    files.alias(new_fd, file)?;
    Ok(new_fd)
}

pub fn do_mknod(proc: &Process, path: &str, kind: VnodeKind, devid: u32) -> Result<()> {
    if !matches!(
        kind,
        VnodeKind::Regular | VnodeKind::CharDev | VnodeKind::BlockDev
    ) {
        return Err(Errno::EINVAL);
    }

    let cwd = proc.cwd();
    let (dir, name) = namev::namev_dir(&cwd, path)?;
    if name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    // 新建结点的引用就地归还，inode 自有目录项攥着
    dir.mknod(name, kind, devid).map(drop)
}

pub fn do_mkdir(proc: &Process, path: &str) -> Result<()> {
    let cwd = proc.cwd();
    let (dir, name) = namev::namev_dir(&cwd, path)?;
    if name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    dir.mkdir(name).map(drop)
}

pub fn do_rmdir(proc: &Process, path: &str) -> Result<()> {
    let cwd = proc.cwd();
    let (dir, name) = namev::namev_dir(&cwd, path)?;
    match name {
        "." => return Err(Errno::EINVAL),
        ".." => return Err(Errno::ENOTEMPTY),
        _ => {}
    }
    if name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    dir.rmdir(name)
}

pub fn do_unlink(proc: &Process, path: &str) -> Result<()> {
    let cwd = proc.cwd();
    let (dir, name) = namev::namev_dir(&cwd, path)?;
    if name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    let child = dir.lookup(name)?;
    if child.kind().is_dir() {
        return Err(Errno::EPERM);
    }
    dir.unlink(name)
}

pub fn do_link(proc: &Process, old_path: &str, new_path: &str) -> Result<()> {
    let cwd = proc.cwd();
    let target = namev::namev_resolve(&cwd, old_path)?;
    if target.kind().is_dir() {
        return Err(Errno::EPERM);
    }

    let (dir, name) = namev::namev_dir(&cwd, new_path)?;
    if name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    dir.link(name, &target)
}

pub fn do_rename(proc: &Process, old_path: &str, new_path: &str) -> Result<()> {
    let cwd = proc.cwd();
    let (old_dir, old_name) = namev::namev_dir(&cwd, old_path)?;
    let (new_dir, new_name) = namev::namev_dir(&cwd, new_path)?;
    if old_name.len() > NAME_LEN || new_name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    old_dir.rename(old_name, &new_dir, new_name)
}

/// 切换当前工作目录；旧 cwd 的引用随交换释放
pub fn do_chdir(proc: &Process, path: &str) -> Result<()> {
    let cwd = proc.cwd();
    let new_cwd = namev::namev_resolve(&cwd, path)?;
    if !new_cwd.kind().is_dir() {
        return Err(Errno::ENOTDIR);
    }
    proc.swap_cwd(new_cwd);
    Ok(())
}

pub fn do_stat(proc: &Process, path: &str) -> Result<Stat> {
    let cwd = proc.cwd();
    let vnode = namev::namev_resolve(&cwd, path)?;
    Ok(vnode.stat())
}

/// 每次调用读出一条目录项；返回 0 表示读到头。
/// 文件位置按磁盘上的项尺寸推进。
pub fn do_getdents(proc: &Process, fd: usize, out: &mut DirEnt) -> Result<usize> {
    let file = proc.files().lock().get(fd)?;
    if !file.vnode().kind().is_dir() {
        return Err(Errno::ENOTDIR);
    }

    let mut pos = file.pos.lock();
    let n = file.vnode().readdir(*pos, out)?;
    *pos += n;
    Ok(n)
}

/// 供需要裸句柄的调用方（如 mmap）使用
pub(crate) fn file_of(proc: &Process, fd: usize) -> Result<Arc<OpenFile>> {
    proc.files().lock().get(fd)
}
