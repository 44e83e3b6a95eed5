//! 进程上下文。
//!
//! 真正的线程与调度在核心之外；这里只聚合一个进程被
//! 文件与内存两条主干用到的状态：当前工作目录、
//! 文件描述符表、地址空间。系统调用显式接收 `&Process`。

use alloc::sync::Arc;

use s5fs::{S5FileSystem, S5Node};
use spin::Mutex;

use crate::fs::FdTable;
use crate::memory::{PageTable, VmMap};

pub struct Process {
    fs: Arc<S5FileSystem>,
    cwd: Mutex<Arc<S5Node>>,
    files: Mutex<FdTable>,
    vm: Mutex<VmMap>,
}

impl Process {
    /// 新进程从根目录出发，文件表与地址空间皆空
    pub fn new(fs: &Arc<S5FileSystem>, pt: Arc<dyn PageTable>) -> Self {
        Self {
            fs: Arc::clone(fs),
            cwd: Mutex::new(fs.root()),
            files: Mutex::new(FdTable::new()),
            vm: Mutex::new(VmMap::new(pt)),
        }
    }

    #[inline]
    pub fn fs(&self) -> &Arc<S5FileSystem> {
        &self.fs
    }

    pub fn cwd(&self) -> Arc<S5Node> {
        Arc::clone(&self.cwd.lock())
    }

    /// 换入新的工作目录，旧目录的引用随返回值移交并释放
    pub(crate) fn swap_cwd(&self, new_cwd: Arc<S5Node>) -> Arc<S5Node> {
        core::mem::replace(&mut *self.cwd.lock(), new_cwd)
    }

    #[inline]
    pub fn files(&self) -> &Mutex<FdTable> {
        &self.files
    }

    #[inline]
    pub fn vm(&self) -> &Mutex<VmMap> {
        &self.vm
    }

    /// fork：工作目录照搬，文件表共享句柄（位置也随之共享），
    /// 地址空间按写时复制克隆
    pub fn fork(&self, pt: Arc<dyn PageTable>) -> Process {
        Process {
            fs: Arc::clone(&self.fs),
            cwd: Mutex::new(self.cwd()),
            files: Mutex::new(self.files.lock().clone()),
            vm: Mutex::new(self.vm.lock().fork(pt)),
        }
    }
}
