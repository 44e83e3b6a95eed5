use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};

use log::trace;
use spin::Mutex;
use vfs::{Errno, Result};

use crate::pframe::{FrameRef, PageFrame};
use crate::BlockDevice;

/// 文件型内存对象的取页回调，由文件系统实现。
/// 文件系统据此决定某一页究竟落在磁盘块上还是稀疏零页上。
pub trait Pager: Send + Sync {
    fn get_pframe(&self, pagenum: usize, for_write: bool) -> Result<FrameRef>;
}

/// 页帧的多态容器
pub struct MemObj {
    kind: MobjKind,
    /// 驻留页帧索引，页号到页帧
    frames: Mutex<BTreeMap<usize, FrameRef>>,
}

enum MobjKind {
    /// 页即磁盘块，未命中时从设备读入，写回也经由设备
    BlockDev(Arc<dyn BlockDevice>),
    /// 文件内容，取页转交文件系统的路由回调；
    /// 弱引用指回 vnode，避免引用计数成环
    File(Weak<dyn Pager>),
    /// 匿名内存，首次读到的是零页
    Anon,
    /// 写时复制的覆盖层，读穿透到底层对象，写物化私有副本
    Shadow(Mutex<Arc<MemObj>>),
}

impl MemObj {
    pub fn with_block_dev(dev: Arc<dyn BlockDevice>) -> Arc<Self> {
        Arc::new(Self {
            kind: MobjKind::BlockDev(dev),
            frames: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn with_pager(pager: Weak<dyn Pager>) -> Arc<Self> {
        Arc::new(Self {
            kind: MobjKind::File(pager),
            frames: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn anon() -> Arc<Self> {
        Arc::new(Self {
            kind: MobjKind::Anon,
            frames: Mutex::new(BTreeMap::new()),
        })
    }

    /// 在 `base` 之上叠一层影子对象。
    /// 影子链只能向下持有强引用，绝不可成环。
    pub fn shadow(base: Arc<MemObj>) -> Arc<Self> {
        Arc::new(Self {
            kind: MobjKind::Shadow(Mutex::new(base)),
            frames: Mutex::new(BTreeMap::new()),
        })
    }

    #[inline]
    pub fn is_shadow(&self) -> bool {
        matches!(self.kind, MobjKind::Shadow(_))
    }

    /// 取指定页号的页帧。未驻留则分配并按变体填充；
    /// `for_write` 置位时页会被标脏。
    pub fn get_pframe(self: &Arc<Self>, pagenum: usize, for_write: bool) -> Result<FrameRef> {
        match &self.kind {
            MobjKind::File(pager) => pager
                .upgrade()
                .ok_or(Errno::ENODEV)?
                .get_pframe(pagenum, for_write),
            MobjKind::Shadow(_) => self.shadow_get_pframe(pagenum, for_write),
            _ => self.default_get_pframe(pagenum, for_write),
        }
    }

    /// 绕过变体路由的默认取页：命中缓存即返回，
    /// 否则新建零页并按变体填充后装入。
    /// 文件系统对稀疏块走的就是这条路。
    pub fn default_get_pframe(self: &Arc<Self>, pagenum: usize, for_write: bool) -> Result<FrameRef> {
        let mut frames = self.frames.lock();

        if let Some(frame) = frames.get(&pagenum) {
            if for_write {
                frame.lock().set_dirty();
            }
            return Ok(Arc::clone(frame));
        }

        let frame = PageFrame::new(pagenum);
        self.fill_pframe(&frame);
        if for_write {
            frame.lock().set_dirty();
        }
        frames.insert(pagenum, Arc::clone(&frame));

        Ok(frame)
    }

    /// 返回已驻留的页帧；用于文件系统发现某页改由磁盘块
    /// 直接承载后，摘除这里的旧缓存
    pub fn find_pframe(&self, pagenum: usize) -> Option<FrameRef> {
        self.frames.lock().get(&pagenum).cloned()
    }

    /// 逐出并释放一个页帧
    pub fn free_pframe(&self, pagenum: usize) {
        self.frames.lock().remove(&pagenum);
    }

    /// 把所有脏页写回并清除脏标记。
    /// 只有块设备对象有后备存储，其余变体无事可做。
    pub fn flush(&self) {
        let MobjKind::BlockDev(dev) = &self.kind else {
            return;
        };
        for (pagenum, frame) in self.frames.lock().iter() {
            let mut frame = frame.lock();
            if frame.is_dirty() {
                trace!("flushing page {pagenum}");
                dev.write_block(*pagenum, frame.bytes());
                frame.clear_dirty();
            }
        }
    }

    /// 影子链坍缩：只要紧邻的底层对象也是影子且无其他引用者，
    /// 便把两层合并，防止 fork 链无限加深。
    /// 子对象已有的页优先，缺失的从被合并层上提。
    pub fn collapse(self: &Arc<Self>) {
        let MobjKind::Shadow(base_cell) = &self.kind else {
            return;
        };

        loop {
            let base = base_cell.lock().clone();
            let MobjKind::Shadow(grandparent_cell) = &base.kind else {
                return;
            };
            // 引用者只有 base_cell 与此处的临时克隆时才可合并
            if Arc::strong_count(&base) > 2 {
                return;
            }

            trace!("collapsing shadow chain");
            let grandparent = grandparent_cell.lock().clone();
            {
                let mut mine = self.frames.lock();
                for (pagenum, frame) in base.frames.lock().iter() {
                    mine.entry(*pagenum).or_insert_with(|| Arc::clone(frame));
                }
            }
            *base_cell.lock() = grandparent;
        }
    }
}

impl MemObj {
    /// 影子对象取页。读：先查本层缓存，未命中沿链下行，
    /// 直接返回底层页帧而不复制。写：在本层物化私有副本。
    /// 一旦某页有了私有副本，之后经此影子的读都见到该副本。
    fn shadow_get_pframe(self: &Arc<Self>, pagenum: usize, for_write: bool) -> Result<FrameRef> {
        let base = match &self.kind {
            MobjKind::Shadow(base) => base.lock().clone(),
            _ => unreachable!(),
        };

        if !for_write {
            if let Some(frame) = self.frames.lock().get(&pagenum) {
                return Ok(Arc::clone(frame));
            }
            return base.get_pframe(pagenum, false);
        }

        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&pagenum) {
            frame.lock().set_dirty();
            return Ok(Arc::clone(frame));
        }

        // 从底层复制出本层的私有副本
        let src = base.get_pframe(pagenum, false)?;
        let frame = PageFrame::new(pagenum);
        frame.lock().bytes_mut().copy_from_slice(src.lock().bytes());
        frames.insert(pagenum, Arc::clone(&frame));

        Ok(frame)
    }

    fn fill_pframe(&self, frame: &FrameRef) {
        match &self.kind {
            MobjKind::BlockDev(dev) => {
                let mut frame = frame.lock();
                let pagenum = frame.pagenum();
                dev.read_block(pagenum, frame.bytes_fill());
            }
            // 匿名页与稀疏文件页：新页本就是零，无需再填
            MobjKind::Anon | MobjKind::File(_) => {}
            MobjKind::Shadow(_) => unreachable!("shadow pages are copied, never filled"),
        }
    }
}

impl Drop for MemObj {
    /// 析构即写回：所有页帧随对象一并释放
    fn drop(&mut self) {
        self.flush();
    }
}
