pub use memobj::PAGE_SIZE;

/// 用户映射可用的最低地址
pub const USER_MEM_LOW: usize = 0x0040_0000;
/// 用户映射可用的最高地址（开区间）
pub const USER_MEM_HIGH: usize = 0xc000_0000;

/// 每进程文件描述符表的容量
pub const NFILES: usize = 32;
