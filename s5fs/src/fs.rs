//! # 磁盘块管理器层
//!
//! 挂载、格式化、两条空闲链表的分配与回收，
//! 以及保证 (fs, ino) 唯一性的 vnode 缓存。

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info};
use memobj::{BlockDevice, FrameRef, MemObj};
use spin::Mutex;
use vfs::{DirEnt, Errno, Result};

use crate::layout::{DiskDirEntry, DiskInode, InodeKind, SuperBlock};
use crate::node::S5Node;
use crate::{
    inode_block, inode_offset, FreeListNode, IndirectBlock, INODES_PER_BLOCK, NFREE, SENTINEL,
};

pub struct S5FileSystem {
    dev: Arc<dyn BlockDevice>,
    /// 整块磁盘的内存对象，所有非稀疏页的栖身之处
    mobj: Arc<MemObj>,
    super_block: Mutex<SuperBlock>,
    /// vnode 缓存：每个 inode 号至多对应一个活动结点
    nodes: Mutex<BTreeMap<u32, Weak<S5Node>>>,
}

impl S5FileSystem {
    /// 挂载：读入并校验超级块
    pub fn mount(dev: Arc<dyn BlockDevice>) -> Result<Arc<Self>> {
        let mobj = MemObj::with_block_dev(Arc::clone(&dev));

        let frame = mobj
            .get_pframe(0, false)
            .expect("reading the superblock never fails");
        let super_block = frame.lock().map(0, |sb: &SuperBlock| sb.clone());
        if !super_block.is_valid() {
            return Err(Errno::EINVAL);
        }

        info!(
            "mounted s5fs on device {}: {} inodes, root inode {}",
            dev.id(),
            super_block.num_inodes,
            super_block.root_inode
        );

        Ok(Arc::new(Self {
            dev,
            mobj,
            super_block: Mutex::new(super_block),
            nodes: Mutex::new(BTreeMap::new()),
        }))
    }

    /// 格式化一块空盘并挂载。
    /// inode 区横在超级块与数据区之间，空闲 inode 自 1 起连成单链，
    /// 0 号留给根目录；所有数据块经由 [`Self::free_block`] 串上空闲链表。
    pub fn format(dev: Arc<dyn BlockDevice>, total_blocks: u32, num_inodes: u32) -> Result<Arc<Self>> {
        let inode_blocks = (num_inodes as usize).div_ceil(INODES_PER_BLOCK) as u32;
        let data_start = 1 + inode_blocks;
        if num_inodes == 0 || data_start + 1 >= total_blocks {
            return Err(Errno::EINVAL);
        }

        let mobj = MemObj::with_block_dev(Arc::clone(&dev));
        let mut super_block = SuperBlock::new(num_inodes, 0);
        super_block.free_inode = if num_inodes > 1 { 1 } else { SENTINEL };

        let fs = Self {
            dev,
            mobj,
            super_block: Mutex::new(super_block),
            nodes: Mutex::new(BTreeMap::new()),
        };

        // 空闲 inode 链：1 -> 2 -> ... -> SENTINEL
        for ino in 1..num_inodes {
            let (frame, offset) = fs.inode_frame(ino, true);
            frame.lock().map_mut(offset, |inode: &mut DiskInode| {
                inode.init(ino, InodeKind::Free, 0);
                inode.un = if ino + 1 < num_inodes { ino + 1 } else { SENTINEL };
            });
        }

        for block in data_start..total_blocks {
            fs.free_block(block);
        }

        // 根目录：inode 0，链接数 2（父目录的项由 “..” 自代）
        let root_block = fs.alloc_block()?;
        {
            let (frame, offset) = fs.inode_frame(0, true);
            frame.lock().map_mut(offset, |inode: &mut DiskInode| {
                inode.init(0, InodeKind::Directory, 0);
                inode.nlink = 2;
                inode.set_size(2 * DiskDirEntry::SIZE);
                inode.direct[0] = root_block;
            });
        }
        {
            let frame = fs.get_disk_block(root_block, true);
            let mut frame = frame.lock();
            let bytes = frame.bytes_mut();
            bytes[..DiskDirEntry::SIZE].copy_from_slice(DiskDirEntry::new(".", 0).as_bytes());
            bytes[DiskDirEntry::SIZE..2 * DiskDirEntry::SIZE]
                .copy_from_slice(DiskDirEntry::new("..", 0).as_bytes());
        }

        fs.sync();
        info!("formatted s5fs: {total_blocks} blocks, {num_inodes} inodes");
        Ok(Arc::new(fs))
    }

    /// 文件系统所在块设备的设备号
    #[inline]
    pub fn dev_id(&self) -> u32 {
        self.dev.id()
    }

    /// 根目录的 vnode
    pub fn root(self: &Arc<Self>) -> Arc<S5Node> {
        let root_inode = self.super_block.lock().root_inode;
        self.vget(root_inode)
    }

    /// 取 inode 号对应的 vnode：缓存命中则复用，
    /// 否则从磁盘读入。(fs, ino) 任意时刻至多一个结点。
    pub fn vget(self: &Arc<Self>, ino: u32) -> Arc<S5Node> {
        debug_assert!(ino < self.super_block.lock().num_inodes);

        let mut nodes = self.nodes.lock();
        if let Some(node) = nodes.get(&ino).and_then(Weak::upgrade) {
            return node;
        }

        let node = S5Node::from_disk(self, ino);
        nodes.insert(ino, Arc::downgrade(&node));
        node
    }

    /// 把内存里的超级块写回块 0，然后冲刷整个磁盘对象
    pub fn sync(&self) {
        let frame = self.get_disk_block(0, true);
        frame
            .lock()
            .map_mut(0, |disk: &mut SuperBlock| *disk = self.super_block.lock().clone());
        self.mobj.flush();
    }

    /// 卸载前核对整棵目录树的链接数与超级块；
    /// 损坏属于不可恢复状态，直接 panic 暴露出来
    pub fn unmount(self: &Arc<Self>) {
        if !self.check_refcounts() {
            panic!(
                "unmount: linkcount corruption discovered on device {}",
                self.dev.id()
            );
        }
        assert!(
            self.super_block.lock().is_valid(),
            "unmount: corrupted superblock on device {}",
            self.dev.id()
        );
        self.sync();
    }

    /// 当前空闲块总数：内联计数加上链上各结点（结点本身也是空闲块）
    pub fn free_block_count(&self) -> usize {
        let sb = self.super_block.lock();
        let mut count = sb.nfree as usize;
        let mut next = sb.free_blocks[NFREE - 1];
        while next != SENTINEL {
            count += NFREE;
            let frame = self.get_disk_block(next, false);
            next = frame.lock().map(0, |node: &FreeListNode| node[NFREE - 1]);
        }
        count
    }
}

impl S5FileSystem {
    /// 经块设备的页缓存取一个磁盘块；块 I/O 失败视作致命
    pub(crate) fn get_disk_block(&self, blocknum: u32, forwrite: bool) -> FrameRef {
        self.mobj
            .get_pframe(blocknum as usize, forwrite)
            .expect("disk block I/O never fails")
    }

    /// inode 所在页帧与页内偏移
    pub(crate) fn inode_frame(&self, ino: u32, forwrite: bool) -> (FrameRef, usize) {
        (
            self.get_disk_block(inode_block(ino) as u32, forwrite),
            inode_offset(ino),
        )
    }

    pub(crate) fn read_inode(&self, ino: u32) -> DiskInode {
        let (frame, offset) = self.inode_frame(ino, false);
        let inode = frame.lock().map(offset, |inode: &DiskInode| *inode);
        inode
    }

    pub(crate) fn write_inode(&self, ino: u32, inode: &DiskInode) {
        let (frame, offset) = self.inode_frame(ino, true);
        frame.lock().map_mut(offset, |disk: &mut DiskInode| *disk = *inode);
    }

    /// 分配一个数据块并清零后交出。
    /// 内联数组耗尽时把下一个链表结点搬进超级块，
    /// 结点块本身就是这次分到的块。
    pub(crate) fn alloc_block(&self) -> Result<u32> {
        let mut sb = self.super_block.lock();

        let blockno = if sb.nfree == 0 {
            let next = sb.free_blocks[NFREE - 1];
            if next == SENTINEL {
                return Err(Errno::ENOSPC);
            }
            let frame = self.get_disk_block(next, false);
            frame
                .lock()
                .map(0, |node: &FreeListNode| sb.free_blocks = *node);
            sb.nfree = NFREE as u32 - 1;
            next
        } else {
            sb.nfree -= 1;
            sb.free_blocks[sb.nfree as usize]
        };
        drop(sb);

        // 稀疏块用 0 号作哨兵，新块必须以全零示人
        let frame = self.get_disk_block(blockno, true);
        frame.lock().bytes_mut().fill(0);

        debug!("allocated disk block {blockno}");
        Ok(blockno)
    }

    /// 归还一个数据块。内联数组满员时倾泻进刚释放的块，
    /// 让它充当新的链表结点并重新从头计数。
    pub(crate) fn free_block(&self, blockno: u32) {
        assert_ne!(blockno, 0, "freeing the superblock");

        let mut sb = self.super_block.lock();
        assert!((sb.nfree as usize) < NFREE, "free list corruption");

        if sb.nfree as usize == NFREE - 1 {
            let frame = self.get_disk_block(blockno, true);
            frame
                .lock()
                .map_mut(0, |node: &mut FreeListNode| *node = sb.free_blocks);
            sb.nfree = 0;
            sb.free_blocks[NFREE - 1] = blockno;
        } else {
            // 内容已无人引用，脏位直接作废
            if let Some(frame) = self.mobj.find_pframe(blockno as usize) {
                frame.lock().clear_dirty();
            }
            let slot = sb.nfree as usize;
            sb.free_blocks[slot] = blockno;
            sb.nfree += 1;
        }
    }

    /// 从空闲链表头摘一个 inode 并就地初始化
    pub(crate) fn alloc_inode(&self, kind: InodeKind, devid: u32) -> Result<u32> {
        let mut sb = self.super_block.lock();

        let ino = sb.free_inode;
        if ino == SENTINEL {
            return Err(Errno::ENOSPC);
        }

        let (frame, offset) = self.inode_frame(ino, true);
        frame.lock().map_mut(offset, |inode: &mut DiskInode| {
            assert_ne!(inode.next_free(), ino, "free inode list corruption");
            sb.free_inode = inode.next_free();
            inode.init(ino, kind, devid);
        });

        debug!("allocated inode {ino}");
        Ok(ino)
    }

    /// 回收 inode：串回空闲链表并归还它名下的所有块。
    /// 先收超级块锁改链表，解锁之后才逐块调 free_block，
    /// 免得与其中的再次加锁互相咬死。
    pub(crate) fn free_inode_from(&self, ino: u32, inode: &DiskInode) {
        let mut sb = self.super_block.lock();
        let (frame, offset) = self.inode_frame(ino, true);
        frame.lock().map_mut(offset, |disk: &mut DiskInode| {
            disk.kind = InodeKind::Free;
            disk.un = sb.free_inode;
        });
        sb.free_inode = ino;
        drop(sb);

        // 设备文件的 indirect 字段是设备号，名下没有块
        if matches!(inode.kind, InodeKind::CharDev | InodeKind::BlockDev) {
            debug!("freed device inode {ino}");
            return;
        }

        for &block in &inode.direct {
            if block != 0 {
                self.free_block(block);
            }
        }
        if inode.indirect != 0 {
            let slots: Vec<u32> = {
                let frame = self.get_disk_block(inode.indirect, false);
                let frame = frame.lock();
                frame.map(0, |ind: &IndirectBlock| {
                    ind.iter().copied().filter(|&b| b != 0).collect()
                })
            };
            for block in slots {
                self.free_block(block);
            }
            self.free_block(inode.indirect);
        }
        debug!("freed inode {ino}");
    }

    /// 结点析构时从缓存摘除自己；只清除确已死亡的表项
    pub(crate) fn forget_node(&self, ino: u32) {
        let mut nodes = self.nodes.lock();
        if let Some(weak) = nodes.get(&ino) {
            if weak.upgrade().is_none() {
                nodes.remove(&ino);
            }
        }
    }
}

impl S5FileSystem {
    /// 对整棵目录树重算链接数并与各 inode 核对
    fn check_refcounts(self: &Arc<Self>) -> bool {
        let num_inodes = self.super_block.lock().num_inodes as usize;
        let mut counts = vec![0u16; num_inodes];

        let root = self.root();
        let root_ino = {
            let sb = self.super_block.lock();
            sb.root_inode as usize
        };
        // 根目录没有来自父目录的链接，预置一份再扣回去
        counts[root_ino] += 1;
        self.calculate_refcounts(&mut counts, &root);
        counts[root_ino] -= 1;

        let mut ok = true;
        for (ino, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let node = self.vget(ino as u32);
            let nlink = node.stat().nlink;
            if count as u32 != nlink {
                log::error!("inode {ino}: expected {count} links, found {nlink}");
                ok = false;
            }
        }
        ok
    }

    fn calculate_refcounts(self: &Arc<Self>, counts: &mut [u16], dir: &Arc<S5Node>) {
        let mut pos = 0;
        let mut dirent = DirEnt::default();
        loop {
            let n = dir
                .readdir(pos, &mut dirent)
                .expect("walking a directory we created");
            if n == 0 {
                break;
            }
            let ino = dirent.ino as usize;
            counts[ino] += 1;
            if counts[ino] == 1 {
                let child = self.vget(dirent.ino);
                if child.kind().is_dir() {
                    self.calculate_refcounts(counts, &child);
                }
            }
            pos += n;
        }
    }
}
