//! # 索引节点层
//!
//! [`S5Node`] 是 inode 在内存中的化身：缓存一份磁盘 inode，
//! 提供文件读写与目录操作，并充当自身内存对象的取页路由。
//!
//! 取页路由是全局设计的要点：凡是译得出磁盘块的文件页，
//! 页帧一律来自块设备的缓存，文件自己的内存对象只收留稀疏零页。
//! 于是脏的文件页天然就躺在块设备写回路径上，没有双份缓冲。

use alloc::sync::{Arc, Weak};

use log::debug;
use memobj::{FrameRef, MemObj, Pager};
use spin::{Mutex, MutexGuard};
use vfs::{DirEnt, Errno, Result, Stat, VnodeKind, NAME_LEN};

use crate::layout::{DiskDirEntry, DiskInode, InodeKind};
use crate::{IndirectBlock, S5FileSystem, BLOCK_SIZE, MAX_FILE_BLOCKS, MAX_FILE_SIZE, NDIRECT};

pub struct S5Node {
    fs: Arc<S5FileSystem>,
    ino: u32,
    kind: VnodeKind,
    /// 特殊文件的设备号
    devid: u32,
    /// 文件内容的内存对象；只有稀疏零页驻留于此
    mobj: Arc<MemObj>,
    inner: Mutex<NodeInner>,
}

/// 结点互斥量守护的部分：inode 副本、脏标记与文件长度。
/// 长度与 inode 的 size 同步演进。
pub(crate) struct NodeInner {
    inode: DiskInode,
    dirtied: bool,
    len: usize,
}

impl S5Node {
    /// 从磁盘读入 inode 建立结点。
    /// 内存对象经弱引用指回结点自身，引用计数不成环。
    pub(crate) fn from_disk(fs: &Arc<S5FileSystem>, ino: u32) -> Arc<Self> {
        let inode = fs.read_inode(ino);
        assert_eq!(inode.number, ino, "inode number mismatch");
        let kind = inode.kind.vnode_kind();
        let devid = if kind.is_device() { inode.indirect } else { 0 };

        Arc::new_cyclic(|me: &Weak<Self>| {
            let pager: Weak<dyn Pager> = me.clone();
            Self {
                fs: Arc::clone(fs),
                ino,
                kind,
                devid,
                mobj: MemObj::with_pager(pager),
                inner: Mutex::new(NodeInner {
                    len: inode.size(),
                    inode,
                    dirtied: false,
                }),
            }
        })
    }

    #[inline]
    pub fn ino(&self) -> u32 {
        self.ino
    }

    #[inline]
    pub fn kind(&self) -> VnodeKind {
        self.kind
    }

    #[inline]
    pub fn devid(&self) -> u32 {
        self.devid
    }

    #[inline]
    pub fn fs(&self) -> &Arc<S5FileSystem> {
        &self.fs
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 从指定位置读出数据填充 `buf`，越过文件末尾的部分被截掉。
    /// 目录的拒读（EISDIR）在系统调用层。
    pub fn read(&self, pos: usize, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        self.read_locked(&mut inner, pos, buf)
    }

    /// 向指定位置写入数据，文件按需增长
    pub fn write(&self, pos: usize, buf: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        self.write_locked(&mut inner, pos, buf)
    }

    /// 追加写：在结点锁内先把写入位置推进到末尾，
    /// 返回（写后的新位置，写入的字节数）
    pub fn append(&self, buf: &[u8]) -> Result<(usize, usize)> {
        let mut inner = self.inner.lock();
        let pos = inner.len;
        let n = self.write_locked(&mut inner, pos, buf)?;
        Ok((pos + n, n))
    }

    /// 在目录下查找一项。查找期间持有目录锁；
    /// 命中 `.` 时 vnode 缓存保证拿回的就是自身。
    pub fn lookup(self: &Arc<Self>, name: &str) -> Result<Arc<S5Node>> {
        if !self.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        let mut inner = self.inner.lock();
        let (_, ino) = self.find_dirent(&mut inner, name)?;
        drop(inner);
        Ok(self.fs.vget(ino))
    }

    /// 建硬链接：目录添项，孩子链接数加一
    pub fn link(self: &Arc<Self>, name: &str, child: &Arc<S5Node>) -> Result<()> {
        if !self.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        if child.kind.is_dir() {
            return Err(Errno::EISDIR);
        }

        let (mut dir, mut child_guard) = lock_pair(self, child);
        let child_inner = child_guard.as_mut().expect("a directory never links itself");

        if self.find_dirent(&mut dir, name).is_ok() {
            return Err(Errno::EEXIST);
        }
        self.append_dirent(&mut dir, name, child.ino)?;
        child_inner.inode.nlink += 1;
        child_inner.dirtied = true;
        Ok(())
    }

    /// 删除目录项；目录不可经此删除（系统调用层挡 EPERM）
    pub fn unlink(self: &Arc<Self>, name: &str) -> Result<()> {
        if !self.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }

        let mut dir = self.inner.lock();
        let (pos, ino) = self.find_dirent(&mut dir, name)?;
        let child = self.fs.vget(ino);
        assert!(
            !child.kind.is_dir(),
            "unlinking a directory is rejected at the VFS level"
        );

        let mut child_inner = child.inner.lock();
        self.remove_slot(&mut dir, pos)?;
        child_inner.inode.nlink -= 1;
        child_inner.dirtied = true;
        Ok(())
    }

    /// 创建常规文件或设备文件并链入本目录
    pub fn mknod(
        self: &Arc<Self>,
        name: &str,
        kind: VnodeKind,
        devid: u32,
    ) -> Result<Arc<S5Node>> {
        if !self.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        if !matches!(
            kind,
            VnodeKind::Regular | VnodeKind::CharDev | VnodeKind::BlockDev
        ) {
            return Err(Errno::ENOTSUP);
        }

        let mut dir = self.inner.lock();
        if self.find_dirent(&mut dir, name).is_ok() {
            return Err(Errno::EEXIST);
        }

        let ino = self.fs.alloc_inode(InodeKind::from(kind), devid)?;
        let child = self.fs.vget(ino);
        // 失败时孩子链接数停在 0，引用一断自会回收 inode
        self.append_dirent(&mut dir, name, ino)?;

        let mut child_inner = child.inner.lock();
        child_inner.inode.nlink = 1;
        child_inner.dirtied = true;
        drop(child_inner);

        debug!("mknod {name} -> inode {ino}");
        Ok(child)
    }

    /// 创建子目录并落下 “.” 与 “..”。
    /// 新目录链接数为 2：父目录的项加上自身的 “.”；
    /// “..” 记在父目录头上。
    pub fn mkdir(self: &Arc<Self>, name: &str) -> Result<Arc<S5Node>> {
        if !self.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }

        let mut dir = self.inner.lock();
        if self.find_dirent(&mut dir, name).is_ok() {
            return Err(Errno::EEXIST);
        }

        let ino = self.fs.alloc_inode(InodeKind::Directory, 0)?;
        let child = self.fs.vget(ino);
        {
            let mut child_inner = child.inner.lock();
            child
                .append_dirent(&mut child_inner, ".", ino)
                .and_then(|()| child.append_dirent(&mut child_inner, "..", self.ino))?;
            child_inner.inode.nlink = 2;
            child_inner.dirtied = true;
        }

        if let Err(e) = self.append_dirent(&mut dir, name, ino) {
            // 回退：链接数清零，inode 随引用归零被回收
            let mut child_inner = child.inner.lock();
            child_inner.inode.nlink = 0;
            child_inner.dirtied = true;
            return Err(e);
        }
        dir.inode.nlink += 1;
        dir.dirtied = true;

        debug!("mkdir {name} -> inode {ino}");
        Ok(child)
    }

    /// 删除空目录，撤销 mkdir 当初落下的三个目录项
    pub fn rmdir(self: &Arc<Self>, name: &str) -> Result<()> {
        if !self.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }

        let mut dir = self.inner.lock();
        let (pos, ino) = self.find_dirent(&mut dir, name)?;
        let child = self.fs.vget(ino);
        if !child.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        assert!(!Arc::ptr_eq(&child, self), "`.` is rejected at the VFS level");

        let mut child_inner = child.inner.lock();
        if child_inner.len > 2 * DiskDirEntry::SIZE {
            return Err(Errno::ENOTEMPTY);
        }

        // 父目录的项
        self.remove_slot(&mut dir, pos)?;
        child_inner.inode.nlink -= 1;
        // 子目录自身的 “.”
        let (dot, _) = child.find_dirent(&mut child_inner, ".")?;
        child.remove_slot(&mut child_inner, dot)?;
        child_inner.inode.nlink -= 1;
        // 子目录的 “..” 记在父目录头上
        let (dotdot, _) = child.find_dirent(&mut child_inner, "..")?;
        child.remove_slot(&mut child_inner, dotdot)?;
        dir.inode.nlink -= 1;

        child_inner.dirtied = true;
        dir.dirtied = true;
        debug!("rmdir {name} (inode {ino})");
        Ok(())
    }

    /// 重命名，仅支持非目录；已存在的非目录目标被覆盖。
    /// 两个目录按 inode 号定序上锁。
    pub fn rename(
        self: &Arc<Self>,
        oldname: &str,
        newdir: &Arc<S5Node>,
        newname: &str,
    ) -> Result<()> {
        if !self.kind.is_dir() || !newdir.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        if newname.len() > NAME_LEN {
            return Err(Errno::ENAMETOOLONG);
        }

        if Arc::ptr_eq(self, newdir) {
            let mut dir = self.inner.lock();
            return self.rename_locked(&mut dir, oldname, self, None, newname);
        }

        let (mut old_guard, mut new_guard) = lock_pair(self, newdir);
        self.rename_locked(
            &mut old_guard,
            oldname,
            newdir,
            new_guard.as_deref_mut(),
            newname,
        )
    }

    /// 读出 `pos` 处的一个目录项；返回项的磁盘尺寸，0 即目录尽头
    pub fn readdir(&self, pos: usize, out: &mut DirEnt) -> Result<usize> {
        if !self.kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }

        let mut inner = self.inner.lock();
        let mut disk = DiskDirEntry::default();
        let n = self.read_locked(&mut inner, pos, disk.as_bytes_mut())?;
        if n < DiskDirEntry::SIZE {
            return Ok(0);
        }

        out.ino = disk.ino();
        out.name.clear();
        out.name.push_str(disk.name());
        Ok(DiskDirEntry::SIZE)
    }

    pub fn stat(&self) -> Stat {
        let mut inner = self.inner.lock();
        Stat {
            dev: self.fs.dev_id(),
            ino: self.ino,
            mode: self.kind,
            nlink: inner.inode.nlink as u32,
            rdev: self.devid,
            size: inner.len as u64,
            blksize: BLOCK_SIZE as u64,
            blocks: self.inode_blocks(&mut inner) as u64,
        }
    }

    /// O_TRUNC 的实现：长度清零并立即归还所有块
    pub fn truncate(&self) {
        assert_eq!(self.kind, VnodeKind::Regular, "only regular files truncate");
        let mut inner = self.inner.lock();
        inner.len = 0;
        inner.inode.set_size(0);
        inner.dirtied = true;
        self.remove_blocks(&mut inner);
    }

    /// 交出文件内容的内存对象供映射使用
    pub fn mmap(self: &Arc<Self>) -> Result<Arc<MemObj>> {
        if self.kind != VnodeKind::Regular {
            return Err(Errno::ENODEV);
        }
        Ok(Arc::clone(&self.mobj))
    }
}

impl S5Node {
    fn rename_locked(
        self: &Arc<Self>,
        old_inner: &mut NodeInner,
        oldname: &str,
        newdir: &Arc<S5Node>,
        mut new_inner: Option<&mut NodeInner>,
        newname: &str,
    ) -> Result<()> {
        let (_, ino) = self.find_dirent(old_inner, oldname)?;
        let child = self.fs.vget(ino);
        if child.kind.is_dir() {
            return Err(Errno::EISDIR);
        }

        // 同目录重命名时两个角色共用一把锁
        macro_rules! new_dir_inner {
            () => {
                match new_inner {
                    Some(ref mut g) => &mut **g,
                    None => &mut *old_inner,
                }
            };
        }

        match newdir.find_dirent(new_dir_inner!(), newname) {
            Ok((target_pos, target_ino)) => {
                if target_ino == ino {
                    return Ok(());
                }
                let target = self.fs.vget(target_ino);
                if target.kind.is_dir() {
                    return Err(Errno::EISDIR);
                }
                let mut target_inner = target.inner.lock();
                newdir.remove_slot(new_dir_inner!(), target_pos)?;
                target_inner.inode.nlink -= 1;
                target_inner.dirtied = true;
            }
            Err(Errno::ENOENT) => {}
            Err(e) => return Err(e),
        }

        newdir.append_dirent(new_dir_inner!(), newname, ino)?;
        {
            let mut child_inner = child.inner.lock();
            child_inner.inode.nlink += 1;
            child_inner.dirtied = true;
        }

        // 覆盖目标可能搬动过目录内容，旧项位置重新再找
        let (old_pos, _) = self.find_dirent(old_inner, oldname)?;
        self.remove_slot(old_inner, old_pos)?;
        {
            let mut child_inner = child.inner.lock();
            child_inner.inode.nlink -= 1;
            child_inner.dirtied = true;
        }
        debug!("renamed {oldname} -> {newname}");
        Ok(())
    }

    /// 扫描目录找到名字对应的项，返回（字节位置，inode 号）
    pub(crate) fn find_dirent(&self, inner: &mut NodeInner, name: &str) -> Result<(usize, u32)> {
        debug_assert!(self.kind.is_dir());
        let mut entry = DiskDirEntry::default();
        let mut pos = 0;
        while pos < inner.len {
            let n = self.read_locked(inner, pos, entry.as_bytes_mut())?;
            assert_eq!(n, DiskDirEntry::SIZE);
            if !entry.is_empty() && entry.name() == name {
                return Ok((pos, entry.ino()));
            }
            pos += DiskDirEntry::SIZE;
        }
        Err(Errno::ENOENT)
    }

    /// 写入新目录项：优先复用空槽，没有则在末尾追加
    fn append_dirent(&self, inner: &mut NodeInner, name: &str, ino: u32) -> Result<()> {
        debug_assert!(name.len() <= NAME_LEN);

        let mut slot = inner.len;
        let mut entry = DiskDirEntry::default();
        let mut pos = 0;
        while pos < inner.len {
            let n = self.read_locked(inner, pos, entry.as_bytes_mut())?;
            assert_eq!(n, DiskDirEntry::SIZE);
            if entry.is_empty() {
                slot = pos;
                break;
            }
            pos += DiskDirEntry::SIZE;
        }

        let entry = DiskDirEntry::new(name, ino);
        let n = self.write_locked(inner, slot, entry.as_bytes())?;
        assert_eq!(n, DiskDirEntry::SIZE);
        Ok(())
    }

    /// 用最后一项覆盖 `pos` 处的项并截短一格，目录始终保持紧凑
    fn remove_slot(&self, inner: &mut NodeInner, pos: usize) -> Result<()> {
        let last = inner.len - DiskDirEntry::SIZE;
        if pos < last {
            let mut entry = DiskDirEntry::default();
            let n = self.read_locked(inner, last, entry.as_bytes_mut())?;
            assert_eq!(n, DiskDirEntry::SIZE);
            self.write_locked(inner, pos, entry.as_bytes())?;
        }
        inner.len = last;
        inner.inode.set_size(last);
        inner.dirtied = true;
        Ok(())
    }

    pub(crate) fn read_locked(
        &self,
        inner: &mut NodeInner,
        pos: usize,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut start = pos;
        let end = (pos + buf.len()).min(inner.len);
        if start >= end {
            return Ok(0);
        }

        let mut read = 0;
        while start < end {
            let block_index = start / BLOCK_SIZE;
            let block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let count = block_end - start;

            let frame = self.get_file_block(inner, block_index, false)?;
            let frame = frame.lock();
            let in_off = start % BLOCK_SIZE;
            buf[read..read + count].copy_from_slice(&frame.bytes()[in_off..in_off + count]);
            drop(frame);

            read += count;
            start = block_end;
        }
        Ok(read)
    }

    /// 越过旧末尾的写先把长度与 inode 的 size 一并推进（写锁护送到提交），
    /// 中途失败则回落到实际写成的前缀。
    pub(crate) fn write_locked(
        &self,
        inner: &mut NodeInner,
        pos: usize,
        buf: &[u8],
    ) -> Result<usize> {
        if pos >= MAX_FILE_SIZE {
            return Err(Errno::EFBIG);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let end = (pos + buf.len()).min(MAX_FILE_SIZE);
        let old_len = inner.len;
        if end > old_len {
            inner.len = end;
            inner.inode.set_size(end);
            inner.dirtied = true;
        }

        let mut start = pos;
        let mut written = 0;
        while start < end {
            let block_index = start / BLOCK_SIZE;
            let block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let count = block_end - start;

            let frame = match self.get_file_block(inner, block_index, true) {
                Ok(frame) => frame,
                Err(e) => {
                    let commit = old_len.max(pos + written);
                    inner.len = commit;
                    inner.inode.set_size(commit);
                    return Err(e);
                }
            };
            let mut frame = frame.lock();
            let in_off = start % BLOCK_SIZE;
            frame.bytes_mut()[in_off..in_off + count]
                .copy_from_slice(&buf[written..written + count]);
            drop(frame);

            written += count;
            start = block_end;
        }
        Ok(written)
    }

    /// 文件页到页帧的关键粘合：译出磁盘块的页取块设备的页帧
    /// （并摘掉本对象里残存的稀疏页），稀疏页取自身的零页。
    pub(crate) fn get_file_block(
        &self,
        inner: &mut NodeInner,
        block_index: usize,
        for_write: bool,
    ) -> Result<FrameRef> {
        if block_index * BLOCK_SIZE >= inner.len {
            return Err(Errno::EINVAL);
        }

        let loc = self.file_block_to_disk_block(inner, block_index, for_write)?;
        if loc != 0 {
            // 该页已由磁盘块直接承载，不再是稀疏页
            if self.mobj.find_pframe(block_index).is_some() {
                self.mobj.free_pframe(block_index);
            }
            Ok(self.fs.get_disk_block(loc, for_write))
        } else {
            assert!(!for_write, "a write always lands on a real disk block");
            self.mobj.default_get_pframe(block_index, false)
        }
    }

    /// 文件块号译为磁盘块号；`alloc` 置位时按需落实稀疏块。
    /// 返回 0 表示稀疏且未要求分配。
    fn file_block_to_disk_block(
        &self,
        inner: &mut NodeInner,
        block_index: usize,
        alloc: bool,
    ) -> Result<u32> {
        if block_index >= MAX_FILE_BLOCKS {
            return Err(Errno::EINVAL);
        }

        if block_index < NDIRECT {
            let cur = inner.inode.direct[block_index];
            if cur != 0 || !alloc {
                return Ok(cur);
            }
            let block = self.fs.alloc_block()?;
            inner.inode.direct[block_index] = block;
            inner.dirtied = true;
            return Ok(block);
        }

        let slot = block_index - NDIRECT;
        if inner.inode.indirect == 0 {
            if !alloc {
                return Ok(0);
            }
            let indirect = self.fs.alloc_block()?;
            let block = match self.fs.alloc_block() {
                Ok(block) => block,
                Err(e) => {
                    // 两步分配只成了一步，退掉前一步免得漏块
                    self.fs.free_block(indirect);
                    return Err(e);
                }
            };
            inner.inode.indirect = indirect;
            inner.dirtied = true;
            let frame = self.fs.get_disk_block(indirect, true);
            frame
                .lock()
                .map_mut(0, |ind: &mut IndirectBlock| ind[slot] = block);
            return Ok(block);
        }

        let frame = self.fs.get_disk_block(inner.inode.indirect, false);
        let cur = frame.lock().map(0, |ind: &IndirectBlock| ind[slot]);
        if cur != 0 || !alloc {
            return Ok(cur);
        }
        let block = self.fs.alloc_block()?;
        let frame = self.fs.get_disk_block(inner.inode.indirect, true);
        frame
            .lock()
            .map_mut(0, |ind: &mut IndirectBlock| ind[slot] = block);
        Ok(block)
    }

    /// 实际占用的块数：非零的直接块、间接块引用的块，加上间接块自身
    fn inode_blocks(&self, inner: &mut NodeInner) -> usize {
        if self.kind.is_device() {
            return 0;
        }
        let mut count = inner.inode.direct.iter().filter(|&&b| b != 0).count();
        if inner.inode.indirect != 0 {
            count += 1;
            let frame = self.fs.get_disk_block(inner.inode.indirect, false);
            count += frame
                .lock()
                .map(0, |ind: &IndirectBlock| ind.iter().filter(|&&b| b != 0).count());
        }
        count
    }

    /// 归还名下所有数据块与间接块，truncate 与回收共用
    fn remove_blocks(&self, inner: &mut NodeInner) {
        let direct = inner.inode.direct;
        let indirect = inner.inode.indirect;
        inner.inode.direct = [0; NDIRECT];
        inner.inode.indirect = 0;
        inner.dirtied = true;

        for block in direct {
            if block != 0 {
                self.fs.free_block(block);
            }
        }
        if indirect != 0 {
            let slots: alloc::vec::Vec<u32> = {
                let frame = self.fs.get_disk_block(indirect, false);
                let frame = frame.lock();
                frame.map(0, |ind: &IndirectBlock| {
                    ind.iter().copied().filter(|&b| b != 0).collect()
                })
            };
            for block in slots {
                self.fs.free_block(block);
            }
            self.fs.free_block(indirect);
        }
    }
}

impl Pager for S5Node {
    /// 地址空间经文件内存对象取页走到这里
    fn get_pframe(&self, pagenum: usize, for_write: bool) -> Result<FrameRef> {
        let mut inner = self.inner.lock();
        self.get_file_block(&mut inner, pagenum, for_write)
    }
}

impl Drop for S5Node {
    /// 链接数归零的结点在最后一个引用消失时连 inode 带数据块一并回收，
    /// 否则按需把缓存的 inode 写回磁盘。
    fn drop(&mut self) {
        self.fs.forget_node(self.ino);

        let inner = self.inner.get_mut();
        let inode = inner.inode;
        if inode.nlink == 0 {
            debug!("reclaiming inode {}", self.ino);
            self.fs.free_inode_from(self.ino, &inode);
        } else if inner.dirtied {
            self.fs.write_inode(self.ino, &inode);
        }
    }
}

/// 以 inode 号为全序给两个结点上锁，根除 A→B 与 B→A 的互锁。
/// 同一结点只上一把锁，第二个槽位为空。
pub(crate) fn lock_pair<'a>(
    a: &'a S5Node,
    b: &'a S5Node,
) -> (MutexGuard<'a, NodeInner>, Option<MutexGuard<'a, NodeInner>>) {
    if a.ino == b.ino {
        (a.inner.lock(), None)
    } else if a.ino < b.ino {
        let ga = a.inner.lock();
        let gb = b.inner.lock();
        (ga, Some(gb))
    } else {
        let gb = b.inner.lock();
        let ga = a.inner.lock();
        (ga, Some(gb))
    }
}
