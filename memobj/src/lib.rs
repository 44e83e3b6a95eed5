//! # 页缓存与内存对象层
//!
//! 内存对象（mobj）是一切“可按页寻址之物”的公共抽象：
//! 块设备、文件、匿名内存以及写时复制的影子对象。
//! 每个内存对象持有一批页帧，页帧以 (mobj, 页号) 唯一标识；
//! 上层通过 [`MemObj::get_pframe`] 取页、改页，
//! 脏页推迟到关机/卸载时经 [`MemObj::flush`] 统一写回。

#![no_std]

extern crate alloc;

mod block_dev;
mod mobj;
mod pframe;

pub use block_dev::BlockDevice;
pub use mobj::{MemObj, Pager};
pub use pframe::{FrameRef, PageFrame};

/// 页帧大小，与磁盘块大小一致
pub const PAGE_SIZE: usize = 4096;

pub type PageData = [u8; PAGE_SIZE];
