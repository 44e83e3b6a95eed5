use crate::VnodeKind;

#[derive(Debug, Default, Clone, PartialEq)]
#[repr(C)]
pub struct Stat {
    /// 文件系统所在块设备的设备号
    pub dev: u32,
    /// Inode number
    pub ino: u32,
    pub mode: VnodeKind,
    /// 硬链接个数
    pub nlink: u32,
    /// 特殊文件的设备号
    pub rdev: u32,
    /// 文件大小（字节）
    pub size: u64,
    /// Optimal I/O block size
    pub blksize: u64,
    /// 实际占据的块数（数据块加间接索引块）
    pub blocks: u64,
}
