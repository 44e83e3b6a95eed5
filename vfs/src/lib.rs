#![no_std]

extern crate alloc;

mod dirent;
mod error;
mod flags;
mod stat;

pub use self::{
    dirent::{DirEnt, VnodeKind},
    error::{encode, Errno, Result},
    flags::{access_of, whence, OpenFlag, SeekWhence},
    stat::Stat,
};

/// 文件名的最长可用长度（不计结尾的 NUL）
pub const NAME_LEN: usize = 27;
