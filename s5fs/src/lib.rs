//! # S5 文件系统
//!
//! 磁盘布局自前向后：
//! 块 0 为超级块；随后是 inode 数组，每块 32 个、每个 128 字节；
//! 余下是数据块、间接索引块与空闲链表结点。
//!
//! 空闲块不走位图而走成批链表：超级块内联一段空闲块号数组，
//! 数组最后一槽指向装着下一批块号的链表结点。
//! 空闲 inode 则借用各自的 size 字段串成单链。
//!
//! 文件的脏页真正栖身于块设备的页缓存中，文件自身的内存对象
//! 只承载稀疏零页，因此写回路径只有块设备一条。

#![no_std]

extern crate alloc;

mod fs;
mod layout;
mod node;

pub use fs::S5FileSystem;
pub use layout::{DiskDirEntry, DiskInode, InodeKind, SuperBlock};
pub use node::S5Node;

pub use memobj::PAGE_SIZE as BLOCK_SIZE;

pub const MAGIC: u32 = 0x5335_f5c9;
pub const VERSION: u32 = 1;

/// inode 的直接索引块数
pub const NDIRECT: usize = 28;
/// 一个间接索引块可容纳的块号数
pub const NINDIRECT: usize = BLOCK_SIZE / 4;
/// 文件的块数上限：直接索引加一层间接索引
pub const MAX_FILE_BLOCKS: usize = NDIRECT + NINDIRECT;
pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;

/// 超级块内联的空闲块号槽数，最后一槽留给下一个链表结点
pub const NFREE: usize = 30;

/// 空闲链表的结尾哨兵
pub const SENTINEL: u32 = u32::MAX;

pub const INODE_SIZE: usize = 128;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// 一个间接索引块在内存中的样子
type IndirectBlock = [u32; NINDIRECT];
/// 空闲链表结点：整块复用为块号数组，装载前 NFREE 个槽
type FreeListNode = [u32; NFREE];

/// inode 所在的磁盘块号
#[inline]
pub const fn inode_block(ino: u32) -> usize {
    1 + ino as usize / INODES_PER_BLOCK
}

/// inode 在其磁盘块内的字节偏移
#[inline]
pub const fn inode_offset(ino: u32) -> usize {
    ino as usize % INODES_PER_BLOCK * INODE_SIZE
}
