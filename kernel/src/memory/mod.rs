//! # 地址空间管理
//!
//! 每进程一张按起始页号排序的虚存区列表，
//! 区间指向带偏移的内存对象；mmap/munmap 在其上增删，
//! fork 时经影子对象克隆出写时复制的新地址空间。

mod mmap;
mod page_table;
mod vmmap;

pub use self::mmap::{do_mmap, do_munmap};
pub use self::page_table::{NullPageTable, PageTable};
pub use self::vmmap::{Dir, MapFlag, Prot, VmArea, VmMap};
