//! # 内核文件系统
//!
//! ## 分层（自上而下）
//!
//! 1. 系统调用层
//! 2. 文件描述符层
//! 3. 路径解析层
//! 4. 文件系统层（s5fs）
//! 5. 块设备驱动层
//!
//! ## 文件描述符层
//!
//! 一个进程可以访问多个文件，并通过**文件描述符表**管理。
//! dup 出来的描述符共享同一个文件句柄，因而共享读写位置。

mod file;
mod namev;
mod syscall;

pub use self::file::{FdTable, OpenFile};
pub use self::namev::{namev_dir, namev_open, namev_resolve};
pub use self::syscall::*;
