//! # 内核核心
//!
//! 自上而下的两条主干：
//! - 文件一侧：系统调用层、文件描述符层、路径解析层，压在 s5fs 之上；
//! - 内存一侧：每进程的虚存区管理，fork 经影子对象做写时复制。
//!
//! 线程、调度与缺页入口都是外部协作者；
//! 系统调用显式接收 [`proc::Process`]，不倚赖全局的“当前进程”。

#![no_std]

extern crate alloc;

pub mod config;
pub mod fs;
pub mod memory;
pub mod proc;
