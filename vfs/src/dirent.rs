use alloc::string::String;

/// 系统调用所交换的目录项
#[derive(Debug, Default, Clone)]
pub struct DirEnt {
    /// Inode number
    pub ino: u32,
    pub name: String,
}

/// vnode 的类型标签，同时充当 `Stat::mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum VnodeKind {
    #[default]
    Regular,
    Directory,
    CharDev,
    BlockDev,
    Fifo,
}

impl VnodeKind {
    #[inline]
    pub fn is_dir(self) -> bool {
        self == VnodeKind::Directory
    }

    /// 字符设备与块设备的 inode 把间接块字段挪用作设备号
    #[inline]
    pub fn is_device(self) -> bool {
        matches!(self, VnodeKind::CharDev | VnodeKind::BlockDev)
    }
}
