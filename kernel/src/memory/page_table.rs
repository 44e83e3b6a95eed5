/// 页表协作接口。核心只在解除映射时失效页表项并冲刷 TLB；
/// 建立映射发生在缺页路径上，不属于本核心。
pub trait PageTable: Send + Sync {
    fn unmap_range(&self, vfn: usize, npages: usize);
    fn flush_range(&self, vfn: usize, npages: usize);
}

/// 尚未接上真实 MMU 时的空实现
pub struct NullPageTable;

impl PageTable for NullPageTable {
    fn unmap_range(&self, _vfn: usize, _npages: usize) {}

    fn flush_range(&self, _vfn: usize, _npages: usize) {}
}
