//! 页缓存与影子对象的行为测试

use std::sync::{Arc, Mutex};

use memobj::{BlockDevice, MemObj, PAGE_SIZE};

/// 最简的内存块设备，顺带记录写回次数
struct VecDisk {
    data: Mutex<Vec<u8>>,
    writes: Mutex<usize>,
}

impl VecDisk {
    fn new(blocks: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0; blocks * PAGE_SIZE]),
            writes: Mutex::new(0),
        })
    }

    fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    fn byte(&self, block: usize, off: usize) -> u8 {
        self.data.lock().unwrap()[block * PAGE_SIZE + off]
    }

    fn set_byte(&self, block: usize, off: usize, value: u8) {
        self.data.lock().unwrap()[block * PAGE_SIZE + off] = value;
    }
}

impl BlockDevice for VecDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let start = block_id * PAGE_SIZE;
        buf.copy_from_slice(&self.data.lock().unwrap()[start..start + buf.len()]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        *self.writes.lock().unwrap() += 1;
        let start = block_id * PAGE_SIZE;
        self.data.lock().unwrap()[start..start + buf.len()].copy_from_slice(buf);
    }
}

#[test]
fn frames_are_unique_per_index() {
    let mobj = MemObj::anon();
    let a = mobj.get_pframe(3, false).unwrap();
    let b = mobj.get_pframe(3, true).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &mobj.get_pframe(4, false).unwrap()));
}

#[test]
fn anon_pages_start_zeroed() {
    let mobj = MemObj::anon();
    let frame = mobj.get_pframe(0, false).unwrap();
    assert!(frame.lock().bytes().iter().all(|&b| b == 0));
    assert!(!frame.lock().is_dirty());
}

#[test]
fn block_dev_fills_from_disk_and_flushes_dirty() {
    let disk = VecDisk::new(4);
    disk.set_byte(2, 7, 0x5a);
    let mobj = MemObj::with_block_dev(disk.clone());

    let frame = mobj.get_pframe(2, false).unwrap();
    assert_eq!(0x5a, frame.lock().bytes()[7]);

    // 干净页不写回
    mobj.flush();
    assert_eq!(0, disk.write_count());

    frame.lock().bytes_mut()[7] = 0xa5;
    mobj.flush();
    assert_eq!(1, disk.write_count());
    assert_eq!(0xa5, disk.byte(2, 7));

    // 脏标记随写回清除，再次冲刷无事发生
    mobj.flush();
    assert_eq!(1, disk.write_count());
}

#[test]
fn drop_flushes_remaining_dirty_pages() {
    let disk = VecDisk::new(2);
    {
        let mobj = MemObj::with_block_dev(disk.clone());
        let frame = mobj.get_pframe(1, true).unwrap();
        frame.lock().bytes_mut()[0] = 9;
    }
    assert_eq!(9, disk.byte(1, 0));
}

#[test]
fn freed_frame_is_refetched() {
    let disk = VecDisk::new(2);
    let mobj = MemObj::with_block_dev(disk.clone());

    let frame = mobj.get_pframe(0, false).unwrap();
    drop(frame);
    assert!(mobj.find_pframe(0).is_some());
    mobj.free_pframe(0);
    assert!(mobj.find_pframe(0).is_none());

    disk.set_byte(0, 0, 42);
    let frame = mobj.get_pframe(0, false).unwrap();
    assert_eq!(42, frame.lock().bytes()[0]);
}

#[test]
fn shadow_reads_fall_through_without_copying() {
    let base = MemObj::anon();
    base.get_pframe(0, true).unwrap().lock().bytes_mut()[0] = 1;

    let shadow = MemObj::shadow(base.clone());
    let through = shadow.get_pframe(0, false).unwrap();
    // 读穿透拿到的就是底层的页帧
    assert!(Arc::ptr_eq(&through, &base.get_pframe(0, false).unwrap()));
    assert!(shadow.find_pframe(0).is_none());

    // 底层后续的改动对未复制的影子读可见
    base.get_pframe(0, true).unwrap().lock().bytes_mut()[0] = 2;
    assert_eq!(2, shadow.get_pframe(0, false).unwrap().lock().bytes()[0]);
}

#[test]
fn shadow_write_materializes_private_copy() {
    let base = MemObj::anon();
    base.get_pframe(0, true).unwrap().lock().bytes_mut()[0] = 1;

    let shadow = MemObj::shadow(base.clone());
    let private = shadow.get_pframe(0, true).unwrap();
    assert_eq!(1, private.lock().bytes()[0]);
    private.lock().bytes_mut()[0] = 7;

    // 此后经影子的读永远见到私有副本
    assert_eq!(7, shadow.get_pframe(0, false).unwrap().lock().bytes()[0]);
    base.get_pframe(0, true).unwrap().lock().bytes_mut()[0] = 9;
    assert_eq!(7, shadow.get_pframe(0, false).unwrap().lock().bytes()[0]);
    // 底层不受影子写的影响
    assert_eq!(9, base.get_pframe(0, false).unwrap().lock().bytes()[0]);
}

#[test]
fn collapse_merges_singly_referenced_chain() {
    let anon = MemObj::anon();
    anon.get_pframe(0, true).unwrap().lock().bytes_mut()[0] = 10;
    anon.get_pframe(1, true).unwrap().lock().bytes_mut()[0] = 11;

    let middle = MemObj::shadow(anon.clone());
    middle.get_pframe(1, true).unwrap().lock().bytes_mut()[0] = 21;
    let top = MemObj::shadow(middle);
    top.get_pframe(0, true).unwrap().lock().bytes_mut()[0] = 30;

    // middle 只被 top 引用，可以并入；本层已有的页优先
    top.collapse();
    assert_eq!(30, top.get_pframe(0, false).unwrap().lock().bytes()[0]);
    assert_eq!(21, top.find_pframe(1).unwrap().lock().bytes()[0]);

    // 链条已经立足于最底层，再坍缩是空操作
    top.collapse();
    assert_eq!(30, top.get_pframe(0, false).unwrap().lock().bytes()[0]);
}

#[test]
fn collapse_spares_shared_base() {
    let anon = MemObj::anon();
    let shared = MemObj::shadow(anon);
    shared.get_pframe(0, true).unwrap().lock().bytes_mut()[0] = 5;

    let left = MemObj::shadow(shared.clone());
    let right = MemObj::shadow(shared.clone());

    // shared 有两个引用者，谁都不许吞并它
    left.collapse();
    right.collapse();
    assert!(left.find_pframe(0).is_none());
    assert!(right.find_pframe(0).is_none());
    assert_eq!(5, left.get_pframe(0, false).unwrap().lock().bytes()[0]);
    assert_eq!(5, right.get_pframe(0, false).unwrap().lock().bytes()[0]);
}
