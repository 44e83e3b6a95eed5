//! 宿主侧的块设备实现：映像文件与内存盘。
//! mkfs 工具与集成测试都经由它们驱动整套文件系统。

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use memobj::{BlockDevice, PAGE_SIZE};

/// 以宿主文件充当块设备。
/// 映像在创建时就定好了尺寸，按偏移读写即可，
/// 不维护游标，也就无需内部加锁。
pub struct BlockFile(pub File);

impl BlockFile {
    #[inline]
    fn offset(block_id: usize) -> u64 {
        (block_id * PAGE_SIZE) as u64
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.0
            .read_exact_at(buf, Self::offset(block_id))
            .expect("block read within the image");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.0
            .write_all_at(buf, Self::offset(block_id))
            .expect("block write within the image");
    }
}

/// 测试用内存盘
pub struct MemDisk {
    data: Mutex<Vec<u8>>,
    id: u32,
}

impl MemDisk {
    pub fn new(total_blocks: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; total_blocks * PAGE_SIZE]),
            id: 0,
        }
    }

    pub fn with_id(total_blocks: usize, id: u32) -> Self {
        Self {
            data: Mutex::new(vec![0; total_blocks * PAGE_SIZE]),
            id,
        }
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let data = self.data.lock().unwrap();
        let start = block_id * PAGE_SIZE;
        buf.copy_from_slice(&data[start..start + buf.len()]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut data = self.data.lock().unwrap();
        let start = block_id * PAGE_SIZE;
        data[start..start + buf.len()].copy_from_slice(buf);
    }

    fn id(&self) -> u32 {
        self.id
    }
}
