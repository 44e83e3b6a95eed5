//! mmap/munmap 的系统调用入口：大量验参之后转交 [`VmMap`]

use alloc::sync::Arc;

use enumflags2::BitFlags;
use log::debug;
use memobj::PAGE_SIZE;
use vfs::{Errno, OpenFlag, Result, VnodeKind};

use super::vmmap::{Dir, MapFlag, Prot, USER_PAGE_HIGH, USER_PAGE_LOW};
use crate::config::{USER_MEM_HIGH, USER_MEM_LOW};
use crate::fs::file_of;
use crate::proc::Process;

/// 向当前进程的地址空间添加一个映射，返回映射的起始地址。
/// `addr` 为 0 表示由内核自顶向下挑选空洞。
/// MAP_ANON 置位时 `fd` 整个被忽略。
pub fn do_mmap(
    proc: &Process,
    addr: usize,
    len: usize,
    prot: BitFlags<Prot>,
    flags: BitFlags<MapFlag>,
    fd: usize,
    off: usize,
) -> Result<usize> {
    if len == 0 || off % PAGE_SIZE != 0 {
        return Err(Errno::EINVAL);
    }
    // 共享与私有必居其一
    if flags.contains(MapFlag::Shared) == flags.contains(MapFlag::Private) {
        return Err(Errno::EINVAL);
    }
    if flags.contains(MapFlag::Fixed) && addr % PAGE_SIZE != 0 {
        return Err(Errno::EINVAL);
    }
    if addr != 0 && !(USER_MEM_LOW..USER_MEM_HIGH).contains(&addr) {
        return Err(Errno::EINVAL);
    }

    let file = if flags.contains(MapFlag::Anon) {
        None
    } else {
        let file = file_of(proc, fd)?;
        let vnode = Arc::clone(file.vnode());
        if vnode.kind() != VnodeKind::Regular {
            return Err(Errno::EACCES);
        }
        if !file.readable() {
            return Err(Errno::EACCES);
        }
        // 可写的共享映射要求描述符以读写模式打开：
        // 落页既要读底层内容也要写回，O_WRONLY 不够格
        if flags.contains(MapFlag::Shared)
            && prot.contains(Prot::Write)
            && !file.flags().contains(OpenFlag::RDWR)
        {
            return Err(Errno::EACCES);
        }
        if prot.contains(Prot::Write) && file.flags().contains(OpenFlag::APPEND) {
            return Err(Errno::EACCES);
        }
        Some(vnode)
    };

    let npages = len.div_ceil(PAGE_SIZE);
    let lopage = addr / PAGE_SIZE;
    if lopage != 0 && lopage + npages > USER_PAGE_HIGH {
        return Err(Errno::EINVAL);
    }

    let mut vm = proc.vm().lock();
    let start = vm.map(file.as_ref(), lopage, npages, prot, flags, off, Dir::HiLo)?;
    // 这段地址可能残留着前任映射的转换
    vm.flush(start, npages);

    debug!("mmap -> {:#x} ({npages} pages)", start * PAGE_SIZE);
    Ok(start * PAGE_SIZE)
}

/// 解除一段映射；地址必须页对齐且落在用户空间内
pub fn do_munmap(proc: &Process, addr: usize, len: usize) -> Result<()> {
    if len == 0 || addr % PAGE_SIZE != 0 {
        return Err(Errno::EINVAL);
    }
    let lopage = addr / PAGE_SIZE;
    let npages = len.div_ceil(PAGE_SIZE);
    if lopage < USER_PAGE_LOW || lopage + npages > USER_PAGE_HIGH {
        return Err(Errno::EINVAL);
    }

    proc.vm().lock().remove(lopage, npages);
    Ok(())
}
