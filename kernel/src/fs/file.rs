use alloc::sync::Arc;
use core::array;

use enumflags2::BitFlags;
use s5fs::S5Node;
use spin::Mutex;
use vfs::{access_of, Errno, OpenFlag, Result};

use crate::config::NFILES;

/// 打开的文件句柄：vnode、打开模式与当前读写位置
pub struct OpenFile {
    vnode: Arc<S5Node>,
    flags: BitFlags<OpenFlag>,
    /// dup 出来的描述符共享这里
    pub(crate) pos: Mutex<usize>,
}

impl OpenFile {
    pub fn new(vnode: Arc<S5Node>, flags: BitFlags<OpenFlag>) -> Arc<Self> {
        Arc::new(Self {
            vnode,
            flags,
            pos: Mutex::new(0),
        })
    }

    #[inline]
    pub fn vnode(&self) -> &Arc<S5Node> {
        &self.vnode
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<OpenFlag> {
        self.flags
    }

    #[inline]
    pub fn readable(&self) -> bool {
        access_of(self.flags).0
    }

    #[inline]
    pub fn writable(&self) -> bool {
        access_of(self.flags).1
    }
}

/// 每进程定长的文件描述符表
#[derive(Clone)]
pub struct FdTable {
    files: [Option<Arc<OpenFile>>; NFILES],
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            files: array::from_fn(|_| None),
        }
    }

    /// 最小的空闲描述符
    pub fn get_empty_fd(&self) -> Result<usize> {
        self.files
            .iter()
            .position(Option::is_none)
            .ok_or(Errno::EMFILE)
    }

    pub fn get(&self, fd: usize) -> Result<Arc<OpenFile>> {
        self.files
            .get(fd)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(Errno::EBADF)
    }

    pub fn install(&mut self, fd: usize, file: Arc<OpenFile>) {
        debug_assert!(self.files[fd].is_none());
        self.files[fd] = Some(file);
    }

    /// 用同一个句柄别名到指定描述符，dup2 专用
    pub fn alias(&mut self, fd: usize, file: Arc<OpenFile>) -> Result<()> {
        if fd >= NFILES {
            return Err(Errno::EBADF);
        }
        self.files[fd] = Some(file);
        Ok(())
    }

    pub fn remove(&mut self, fd: usize) -> Result<Arc<OpenFile>> {
        self.files
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(Errno::EBADF)
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
