//! 地址空间与写时复制的集成测试

use std::sync::Arc;

use enumflags2::BitFlags;
use kernel::config::PAGE_SIZE;
use kernel::fs::{do_open, do_read, do_write};
use kernel::memory::{do_mmap, do_munmap, MapFlag, NullPageTable, Prot};
use kernel::proc::Process;
use s5fs::S5FileSystem;
use s5fs_fuse::MemDisk;
use vfs::{Errno, OpenFlag};

fn setup() -> (Arc<S5FileSystem>, Process) {
    let disk = Arc::new(MemDisk::new(512));
    let fs = S5FileSystem::format(disk, 512, 64).unwrap();
    let proc = Process::new(&fs, Arc::new(NullPageTable));
    (fs, proc)
}

fn rw() -> BitFlags<Prot> {
    Prot::Read | Prot::Write
}

/// 建好一个整页内容为 `fill` 的文件并以读写方式打开
fn page_file(proc: &Process, path: &str, fill: u8) -> usize {
    let fd = do_open(proc, path, OpenFlag::CREAT | OpenFlag::RDWR).unwrap();
    do_write(proc, fd, &vec![fill; PAGE_SIZE]).unwrap();
    fd
}

fn read_at(proc: &Process, vaddr: usize, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    proc.vm().lock().read(vaddr, &mut buf).unwrap();
    buf
}

fn write_at(proc: &Process, vaddr: usize, data: &[u8]) {
    proc.vm().lock().write(vaddr, data).unwrap();
}

#[test]
fn anon_mapping_round_trip() {
    let (_fs, proc) = setup();
    let addr = do_mmap(
        &proc,
        0,
        2 * PAGE_SIZE,
        rw(),
        MapFlag::Private | MapFlag::Anon,
        0,
        0,
    )
    .unwrap();
    assert_eq!(0, addr % PAGE_SIZE);

    // 匿名页初读为零
    assert!(read_at(&proc, addr, PAGE_SIZE).iter().all(|&b| b == 0));

    write_at(&proc, addr + 100, b"hello vm");
    assert_eq!(b"hello vm".to_vec(), read_at(&proc, addr + 100, 8));

    // 跨页写
    write_at(&proc, addr + PAGE_SIZE - 2, b"span");
    assert_eq!(b"span".to_vec(), read_at(&proc, addr + PAGE_SIZE - 2, 4));
}

#[test]
fn private_file_mapping_does_not_write_through() {
    let (_fs, proc) = setup();
    let fd = page_file(&proc, "/f", b'A');

    let addr = do_mmap(&proc, 0, PAGE_SIZE, rw(), MapFlag::Private.into(), fd, 0).unwrap();
    assert_eq!(vec![b'A'; 8], read_at(&proc, addr, 8));

    // 经映射写一个字节，文件本体不动
    write_at(&proc, addr, b"Z");
    assert_eq!(b"Z".to_vec(), read_at(&proc, addr, 1));

    let ro = do_open(&proc, "/f", OpenFlag::read_only()).unwrap();
    let mut first = [0u8; 1];
    assert_eq!(1, do_read(&proc, ro, &mut first).unwrap());
    assert_eq!(b'A', first[0]);
    let _ = fd;
}

#[test]
fn shared_file_mapping_writes_through() {
    let (_fs, proc) = setup();
    let fd = page_file(&proc, "/f", b'A');

    let addr = do_mmap(&proc, 0, PAGE_SIZE, rw(), MapFlag::Shared.into(), fd, 0).unwrap();
    write_at(&proc, addr, b"Z");

    let ro = do_open(&proc, "/f", OpenFlag::read_only()).unwrap();
    let mut first = [0u8; 1];
    assert_eq!(1, do_read(&proc, ro, &mut first).unwrap());
    assert_eq!(b'Z', first[0]);

    // 反向也成立：写文件，映射里可见
    let wr = do_open(&proc, "/f", OpenFlag::RDWR.into()).unwrap();
    do_write(&proc, wr, b"Q").unwrap();
    assert_eq!(b"Q".to_vec(), read_at(&proc, addr, 1));
}

#[test]
fn fork_copy_on_write() {
    let (_fs, proc) = setup();
    let addr = do_mmap(
        &proc,
        0,
        2 * PAGE_SIZE,
        rw(),
        MapFlag::Private | MapFlag::Anon,
        0,
        0,
    )
    .unwrap();
    write_at(&proc, addr, &vec![b'X'; 2 * PAGE_SIZE]);

    let child = proc.fork(Arc::new(NullPageTable));

    // 子进程改第 0 页
    child.vm().lock().write(addr, b"Y").unwrap();

    assert_eq!(b'X', read_at(&proc, addr, 1)[0]);
    assert_eq!(b'Y', {
        let mut buf = [0u8; 1];
        child.vm().lock().read(addr, &mut buf).unwrap();
        buf[0]
    });
    // 第 1 页两边都还是 X
    assert_eq!(b'X', read_at(&proc, addr + PAGE_SIZE, 1)[0]);
    let mut buf = [0u8; 1];
    child.vm().lock().read(addr + PAGE_SIZE, &mut buf).unwrap();
    assert_eq!(b'X', buf[0]);
}

#[test]
fn parent_writes_after_fork_stay_private() {
    let (_fs, proc) = setup();
    let addr = do_mmap(
        &proc,
        0,
        PAGE_SIZE,
        rw(),
        MapFlag::Private | MapFlag::Anon,
        0,
        0,
    )
    .unwrap();
    write_at(&proc, addr, b"before");

    let child = proc.fork(Arc::new(NullPageTable));
    write_at(&proc, addr, b"parent");

    let mut buf = vec![0u8; 6];
    child.vm().lock().read(addr, &mut buf).unwrap();
    assert_eq!(b"before".to_vec(), buf);
}

#[test]
fn shared_anon_mapping_is_visible_across_fork() {
    let (_fs, proc) = setup();
    let addr = do_mmap(
        &proc,
        0,
        PAGE_SIZE,
        rw(),
        MapFlag::Shared | MapFlag::Anon,
        0,
        0,
    )
    .unwrap();
    write_at(&proc, addr, b"common");

    let child = proc.fork(Arc::new(NullPageTable));
    child.vm().lock().write(addr, b"COMMON").unwrap();

    assert_eq!(b"COMMON".to_vec(), read_at(&proc, addr, 6));
}

#[test]
fn repeated_forks_keep_parent_data() {
    let (_fs, proc) = setup();
    let addr = do_mmap(
        &proc,
        0,
        PAGE_SIZE,
        rw(),
        MapFlag::Private | MapFlag::Anon,
        0,
        0,
    )
    .unwrap();
    write_at(&proc, addr, b"gen0");

    // 连续 fork 造出影子链，坍缩后父方数据不走样
    for generation in 0..4u8 {
        let child = proc.fork(Arc::new(NullPageTable));
        child.vm().lock().write(addr, &[b'0' + generation]).unwrap();
        drop(child);
        assert_eq!(b"gen0".to_vec(), read_at(&proc, addr, 4));
    }
    write_at(&proc, addr, b"gen5");
    assert_eq!(b"gen5".to_vec(), read_at(&proc, addr, 4));
}

#[test]
fn munmap_splits_mapping() {
    let (_fs, proc) = setup();
    let addr = do_mmap(
        &proc,
        0,
        4 * PAGE_SIZE,
        rw(),
        MapFlag::Private | MapFlag::Anon,
        0,
        0,
    )
    .unwrap();
    write_at(&proc, addr, b"head");
    write_at(&proc, addr + 3 * PAGE_SIZE, b"tail");

    // 挖掉中间两页
    do_munmap(&proc, addr + PAGE_SIZE, 2 * PAGE_SIZE).unwrap();

    assert_eq!(b"head".to_vec(), read_at(&proc, addr, 4));
    assert_eq!(b"tail".to_vec(), read_at(&proc, addr + 3 * PAGE_SIZE, 4));
    let mut buf = [0u8; 1];
    assert_eq!(
        Err(Errno::EINVAL),
        proc.vm().lock().read(addr + PAGE_SIZE, &mut buf)
    );
}

#[test]
fn map_fixed_replaces_existing() {
    let (_fs, proc) = setup();
    let addr = do_mmap(
        &proc,
        0,
        PAGE_SIZE,
        rw(),
        MapFlag::Private | MapFlag::Anon,
        0,
        0,
    )
    .unwrap();
    write_at(&proc, addr, b"old");

    let replaced = do_mmap(
        &proc,
        addr,
        PAGE_SIZE,
        rw(),
        MapFlag::Private | MapFlag::Anon | MapFlag::Fixed,
        0,
        0,
    )
    .unwrap();
    assert_eq!(addr, replaced);
    // 新映射是全新的匿名零页
    assert_eq!(vec![0u8; 3], read_at(&proc, addr, 3));

    // 不带 FIXED 撞上已有映射则拒绝
    assert_eq!(
        Err(Errno::EINVAL),
        do_mmap(
            &proc,
            addr,
            PAGE_SIZE,
            rw(),
            MapFlag::Private | MapFlag::Anon,
            0,
            0,
        )
    );
}

#[test]
fn mmap_argument_validation() {
    let (_fs, proc) = setup();
    let anon_private = MapFlag::Private | MapFlag::Anon;

    assert_eq!(
        Err(Errno::EINVAL),
        do_mmap(&proc, 0, 0, rw(), anon_private, 0, 0)
    );
    assert_eq!(
        Err(Errno::EINVAL),
        do_mmap(&proc, 0, PAGE_SIZE, rw(), MapFlag::Anon.into(), 0, 0)
    );
    assert_eq!(
        Err(Errno::EINVAL),
        do_mmap(
            &proc,
            0,
            PAGE_SIZE,
            rw(),
            MapFlag::Private | MapFlag::Shared | MapFlag::Anon,
            0,
            0,
        )
    );
    assert_eq!(
        Err(Errno::EINVAL),
        do_mmap(&proc, 0, PAGE_SIZE, rw(), anon_private, 0, 123)
    );

    // MAP_ANON 之下 fd 整个被忽略
    assert!(do_mmap(&proc, 0, PAGE_SIZE, rw(), anon_private, 999, 0).is_ok());
    // 文件映射则必须有有效描述符
    assert_eq!(
        Err(Errno::EBADF),
        do_mmap(&proc, 0, PAGE_SIZE, rw(), MapFlag::Private.into(), 999, 0)
    );

    assert_eq!(Err(Errno::EINVAL), do_munmap(&proc, 1, PAGE_SIZE));
    assert_eq!(Err(Errno::EINVAL), do_munmap(&proc, 0x1000, 0));
}

#[test]
fn mmap_access_checks() {
    let (_fs, proc) = setup();
    let fd = page_file(&proc, "/f", b'A');

    // 只读描述符拒绝可写的共享映射
    let ro = do_open(&proc, "/f", OpenFlag::read_only()).unwrap();
    assert_eq!(
        Err(Errno::EACCES),
        do_mmap(&proc, 0, PAGE_SIZE, rw(), MapFlag::Shared.into(), ro, 0)
    );
    // 只写描述符同样不够格：可写的共享映射要求完整的读写模式
    let wo = do_open(&proc, "/f", OpenFlag::WRONLY.into()).unwrap();
    assert_eq!(
        Err(Errno::EACCES),
        do_mmap(&proc, 0, PAGE_SIZE, rw(), MapFlag::Shared.into(), wo, 0)
    );
    assert!(do_mmap(
        &proc,
        0,
        PAGE_SIZE,
        Prot::Read.into(),
        MapFlag::Shared.into(),
        ro,
        0
    )
    .is_ok());

    // 目录不可映射
    let dirfd = do_open(&proc, "/", OpenFlag::read_only()).unwrap();
    assert_eq!(
        Err(Errno::EACCES),
        do_mmap(&proc, 0, PAGE_SIZE, rw(), MapFlag::Private.into(), dirfd, 0)
    );

    // 追加模式的描述符拒绝可写映射
    let append = do_open(&proc, "/f", OpenFlag::RDWR | OpenFlag::APPEND).unwrap();
    assert_eq!(
        Err(Errno::EACCES),
        do_mmap(&proc, 0, PAGE_SIZE, rw(), MapFlag::Shared.into(), append, 0)
    );

    let _ = fd;
}

#[test]
fn mapping_beyond_file_length_faults() {
    let (_fs, proc) = setup();
    let fd = page_file(&proc, "/f", b'A');

    // 映射两页但文件只有一页：第二页无从取页
    let addr = do_mmap(
        &proc,
        0,
        2 * PAGE_SIZE,
        rw(),
        MapFlag::Shared.into(),
        fd,
        0,
    )
    .unwrap();
    assert_eq!(vec![b'A'; 4], read_at(&proc, addr, 4));
    let mut buf = [0u8; 1];
    assert_eq!(
        Err(Errno::EINVAL),
        proc.vm().lock().read(addr + PAGE_SIZE, &mut buf)
    );
}

#[test]
fn file_mapping_with_page_offset() {
    let (_fs, proc) = setup();
    let fd = do_open(&proc, "/f", OpenFlag::CREAT | OpenFlag::RDWR).unwrap();
    do_write(&proc, fd, &vec![b'1'; PAGE_SIZE]).unwrap();
    do_write(&proc, fd, &vec![b'2'; PAGE_SIZE]).unwrap();

    // 从文件第 1 页起映射
    let addr = do_mmap(
        &proc,
        0,
        PAGE_SIZE,
        rw(),
        MapFlag::Shared.into(),
        fd,
        PAGE_SIZE,
    )
    .unwrap();
    assert_eq!(vec![b'2'; 8], read_at(&proc, addr, 8));
}
