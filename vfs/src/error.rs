use core::fmt;

pub type Result<T> = core::result::Result<T, Errno>;

/// 错误即值：内核各层统一返回 POSIX 子集的错误码，
/// 系统调用入口把它取负后交还用户态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// 操作被打断（可取消的睡眠）
    EINTR = 4,
    /// 内存不足
    ENOMEM = 12,
    /// 权限不允许
    EPERM = 1,
    /// 文件或目录不存在
    ENOENT = 2,
    /// 描述符无效
    EBADF = 9,
    /// 权限检查失败
    EACCES = 13,
    /// 文件已存在
    EEXIST = 17,
    /// 设备不存在或不支持
    ENODEV = 19,
    /// 不是目录
    ENOTDIR = 20,
    /// 是目录
    EISDIR = 21,
    /// 参数无效
    EINVAL = 22,
    /// 进程打开的文件过多
    EMFILE = 24,
    /// 文件过大
    EFBIG = 27,
    /// 磁盘空间耗尽
    ENOSPC = 28,
    /// 文件名过长
    ENAMETOOLONG = 36,
    /// 目录非空
    ENOTEMPTY = 39,
    /// 不支持的操作
    ENOTSUP = 95,
}

impl Errno {
    /// 系统调用的约定返回值：负的错误码
    #[inline]
    pub fn as_isize(self) -> isize {
        -(self as i32 as isize)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 把 `Result<usize>` 编码成系统调用的原始返回值
#[inline]
pub fn encode(res: Result<usize>) -> isize {
    match res {
        Ok(n) => n as isize,
        Err(e) => e.as_isize(),
    }
}
