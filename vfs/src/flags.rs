use enumflags2::{bitflags, BitFlags};

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 只写
    WRONLY = 0b0000_0000_0001,
    /// 读写兼备
    RDWR   = 0b0000_0000_0010,
    /// 写入一律追加到文件末尾
    APPEND = 0b0000_0001_0000,
    /// 文件不存在则创建
    CREAT  = 0b0010_0000_0000,
    /// 先清空文件，再交给用户
    TRUNC  = 0b0100_0000_0000,
}

impl OpenFlag {
    // enumflags2拒绝值为0的标志
    /// 只读
    pub const RDONLY: u32 = 0b0000_0000_0000;

    #[inline]
    pub fn read_only() -> BitFlags<OpenFlag> {
        BitFlags::from_bits_truncate(Self::RDONLY)
    }
}

/// 判断一组打开标志是否允许读/允许写
pub fn access_of(flags: BitFlags<OpenFlag>) -> (bool, bool) {
    if flags.contains(OpenFlag::WRONLY) {
        (false, true)
    } else if flags.contains(OpenFlag::RDWR) {
        (true, true)
    } else {
        (true, false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SeekWhence {
    Set = 0,
    Cur = 1,
    End = 2,
}

pub mod whence {
    pub const SEEK_SET: u32 = 0;
    pub const SEEK_CUR: u32 = 1;
    pub const SEEK_END: u32 = 2;
}

impl TryFrom<u32> for SeekWhence {
    type Error = crate::Errno;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            whence::SEEK_SET => Ok(SeekWhence::Set),
            whence::SEEK_CUR => Ok(SeekWhence::Cur),
            whence::SEEK_END => Ok(SeekWhence::End),
            _ => Err(crate::Errno::EINVAL),
        }
    }
}
