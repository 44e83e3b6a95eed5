//! # 路径解析层
//!
//! 逐分量解析：连续分隔符合并，`.` 原地踏步，`..` 上行。
//! `.` 与 `..` 在磁盘上是真实的目录项，根目录的 `..` 指向自身，
//! 越过根的上行因此自然封顶。
//!
//! 查找每一步都在持有父目录锁的情况下进行，但不做手递手下行：
//! 拿到孩子后父目录的锁随即释放。

use alloc::sync::Arc;
use alloc::vec::Vec;

use enumflags2::BitFlags;
use s5fs::S5Node;
use vfs::{Errno, OpenFlag, Result, VnodeKind, NAME_LEN};

/// 绝对路径从根出发，相对路径从 `base`（通常是进程 cwd）出发
fn start_of(base: &Arc<S5Node>, path: &str) -> Arc<S5Node> {
    if path.starts_with('/') {
        base.fs().root()
    } else {
        Arc::clone(base)
    }
}

/// 解析到含末分量的父目录，返回（父目录，末分量）。
/// 空路径对应 `EINVAL`；路径只有分隔符时末分量视作 `.`。
pub fn namev_dir<'p>(base: &Arc<S5Node>, path: &'p str) -> Result<(Arc<S5Node>, &'p str)> {
    if path.is_empty() {
        return Err(Errno::EINVAL);
    }

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let (&last, parents) = match components.split_last() {
        Some(split) => split,
        None => (&".", &[][..]),
    };

    let mut cur = start_of(base, path);
    for &comp in parents {
        if comp.len() > NAME_LEN {
            return Err(Errno::ENAMETOOLONG);
        }
        cur = cur.lookup(comp)?;
    }
    if !cur.kind().is_dir() {
        return Err(Errno::ENOTDIR);
    }
    Ok((cur, last))
}

/// 解析整条路径到最终 vnode
pub fn namev_resolve(base: &Arc<S5Node>, path: &str) -> Result<Arc<S5Node>> {
    let (dir, name) = namev_dir(base, path)?;
    if name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    dir.lookup(name)
}

/// 查找末分量，`O_CREAT` 时按需经父目录的 mknod 创建。
/// 以 `/` 结尾的路径要求结果必须是目录。
pub fn namev_open(
    base: &Arc<S5Node>,
    path: &str,
    flags: BitFlags<OpenFlag>,
    kind: VnodeKind,
    devid: u32,
) -> Result<Arc<S5Node>> {
    let trailing_slash = path.ends_with('/');
    let (dir, name) = namev_dir(base, path)?;
    if name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    if trailing_slash && flags.contains(OpenFlag::CREAT) && !kind.is_dir() {
        return Err(Errno::EINVAL);
    }

    match dir.lookup(name) {
        Ok(node) => {
            if trailing_slash && !node.kind().is_dir() {
                return Err(Errno::ENOTDIR);
            }
            Ok(node)
        }
        Err(Errno::ENOENT) if flags.contains(OpenFlag::CREAT) => dir.mknod(name, kind, devid),
        Err(e) => Err(e),
    }
}
