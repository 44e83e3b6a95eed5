use alloc::boxed::Box;
use alloc::sync::Arc;
use core::mem;

use spin::Mutex;

use crate::{PageData, PAGE_SIZE};

/// 页帧的共享句柄：使用者锁住它即持有页帧互斥量
pub type FrameRef = Arc<Mutex<PageFrame>>;

/// 内存中缓存的一页
pub struct PageFrame {
    /// 在所属内存对象中的页号
    pagenum: usize,
    /// 是否为脏页
    dirty: bool,
    data: Box<PageData>,
}

impl PageFrame {
    /// 新页一律清零，稀疏块的语义依赖这一点
    pub(crate) fn new(pagenum: usize) -> FrameRef {
        Arc::new(Mutex::new(Self {
            pagenum,
            dirty: false,
            data: Box::new([0; PAGE_SIZE]),
        }))
    }

    #[inline]
    pub fn pagenum(&self) -> usize {
        self.pagenum
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    /// 被释放的块内容已无意义，不必写回
    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        assert!(mem::size_of::<T>() + offset <= PAGE_SIZE);
        let addr: *const T = self.data[offset..].as_ptr().cast();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        assert!(mem::size_of::<T>() + offset <= PAGE_SIZE);
        self.dirty = true;
        let addr: *mut T = self.data[offset..].as_mut_ptr().cast();
        unsafe { &mut *addr }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    #[inline]
    pub fn bytes(&self) -> &PageData {
        &self.data
    }

    /// 取页内容的可写视图并把页标脏
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut PageData {
        self.dirty = true;
        &mut self.data
    }

    /// 填充路径专用：写入内容但不标脏
    #[inline]
    pub(crate) fn bytes_fill(&mut self) -> &mut PageData {
        &mut self.data
    }
}
