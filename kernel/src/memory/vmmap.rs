use alloc::sync::Arc;
use alloc::vec::Vec;

use enumflags2::{bitflags, BitFlags};
use log::debug;
use memobj::{MemObj, PAGE_SIZE};
use s5fs::S5Node;
use vfs::{Errno, Result};

use super::page_table::PageTable;
use crate::config::{USER_MEM_HIGH, USER_MEM_LOW};

/// 用户空间最低可用页号
pub(crate) const USER_PAGE_LOW: usize = USER_MEM_LOW / PAGE_SIZE;
/// 用户空间页号上界（开区间）
pub(crate) const USER_PAGE_HIGH: usize = USER_MEM_HIGH / PAGE_SIZE;

/// 映射的访问权限
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prot {
    Read = 0b001,
    Write = 0b010,
    Exec = 0b100,
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapFlag {
    Shared = 0b0001,
    Private = 0b0010,
    Fixed = 0b0100,
    Anon = 0b1000,
}

/// 搜寻空闲区间的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    /// 自用户空间顶端向下
    HiLo,
    /// 自用户空间底端向上
    LoHi,
}

/// 一段连续的虚拟页区间，映射到某内存对象的某个页偏移处
pub struct VmArea {
    /// 左闭右开的页号区间
    pub start: usize,
    pub end: usize,
    /// 进内存对象的页偏移：区间第 k 页对应对象的第 off+k 页
    pub off: usize,
    pub prot: BitFlags<Prot>,
    pub flags: BitFlags<MapFlag>,
    pub(crate) mobj: Arc<MemObj>,
}

impl VmArea {
    #[inline]
    pub fn npages(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn mobj(&self) -> &Arc<MemObj> {
        &self.mobj
    }
}

/// 一个进程的地址空间：有序的虚存区加页表
pub struct VmMap {
    /// 始终按 start 严格升序且两两不相交
    areas: Vec<VmArea>,
    pt: Arc<dyn PageTable>,
}

impl VmMap {
    pub fn new(pt: Arc<dyn PageTable>) -> Self {
        Self {
            areas: Vec::new(),
            pt,
        }
    }

    #[inline]
    pub fn areas(&self) -> &[VmArea] {
        &self.areas
    }

    /// 包含给定虚拟页号的区
    pub fn lookup(&self, vfn: usize) -> Option<&VmArea> {
        self.areas
            .iter()
            .find(|area| area.start <= vfn && vfn < area.end)
    }

    /// 给定范围内没有任何映射
    pub fn is_range_empty(&self, lopage: usize, npages: usize) -> bool {
        let hi = lopage + npages;
        self.areas
            .iter()
            .all(|area| area.end <= lopage || hi <= area.start)
    }

    /// 首次适应地找一段 npages 页的空洞。
    /// HiLo 自用户空间顶端往下挑最高的，LoHi 反之。
    pub fn find_range(&self, npages: usize, dir: Dir) -> Option<usize> {
        if npages == 0 || npages > USER_PAGE_HIGH - USER_PAGE_LOW {
            return None;
        }

        match dir {
            Dir::HiLo => {
                let mut candidate = USER_PAGE_HIGH - npages;
                for area in self.areas.iter().rev() {
                    if area.end <= candidate {
                        break;
                    }
                    candidate = area.start.checked_sub(npages)?;
                }
                (candidate >= USER_PAGE_LOW).then_some(candidate)
            }
            Dir::LoHi => {
                let mut candidate = USER_PAGE_LOW;
                for area in &self.areas {
                    if area.start >= candidate + npages {
                        break;
                    }
                    candidate = candidate.max(area.end);
                }
                (candidate + npages <= USER_PAGE_HIGH).then_some(candidate)
            }
        }
    }

    /// 把新区插到有序的位置上；调用方保证范围无冲突
    pub fn insert(&mut self, area: VmArea) {
        debug_assert!(area.start < area.end);
        debug_assert!(self.is_range_empty(area.start, area.npages()));

        let index = self
            .areas
            .iter()
            .position(|a| a.start > area.start)
            .unwrap_or(self.areas.len());
        self.areas.insert(index, area);
    }

    /// 建立一个映射。
    /// 对象来源：匿名映射新建匿名对象，文件映射取 vnode 的内存对象；
    /// 范围来源：`lopage` 为 0 时搜空洞，MAP_FIXED 则铲平既有映射；
    /// MAP_PRIVATE 再兜上一层新影子对象。
    pub fn map(
        &mut self,
        file: Option<&Arc<S5Node>>,
        lopage: usize,
        npages: usize,
        prot: BitFlags<Prot>,
        flags: BitFlags<MapFlag>,
        off: usize,
        dir: Dir,
    ) -> Result<usize> {
        debug_assert!(off % PAGE_SIZE == 0);

        let mobj = if flags.contains(MapFlag::Anon) {
            MemObj::anon()
        } else {
            file.ok_or(Errno::EINVAL)?.mmap()?
        };

        let start = if lopage == 0 {
            self.find_range(npages, dir).ok_or(Errno::ENOMEM)?
        } else {
            if flags.contains(MapFlag::Fixed) {
                self.remove(lopage, npages);
            } else if !self.is_range_empty(lopage, npages) {
                return Err(Errno::EINVAL);
            }
            lopage
        };

        let mobj = if flags.contains(MapFlag::Private) {
            MemObj::shadow(mobj)
        } else {
            mobj
        };

        self.insert(VmArea {
            start,
            end: start + npages,
            off: off / PAGE_SIZE,
            prot,
            flags,
            mobj,
        });
        debug!("mapped [{start:#x}, {:#x}) pages", start + npages);
        Ok(start)
    }

    /// 腾空一段页号区间。对每个交叠的区恰好采取四种手术之一：
    /// 对分（区间嵌在内部）、右截断、左截断（偏移一并前移）、整体删除。
    pub fn remove(&mut self, lopage: usize, npages: usize) {
        let hi = lopage + npages;
        let mut i = 0;
        while i < self.areas.len() {
            let (start, end) = (self.areas[i].start, self.areas[i].end);
            if start >= hi || end <= lopage {
                i += 1;
                continue;
            }

            if start < lopage && hi < end {
                // 对分：尾段另立新区，与头段共享同一内存对象
                let area = &mut self.areas[i];
                let tail = VmArea {
                    start: hi,
                    end,
                    off: area.off + (hi - area.start),
                    prot: area.prot,
                    flags: area.flags,
                    mobj: Arc::clone(&area.mobj),
                };
                area.end = lopage;
                self.areas.insert(i + 1, tail);
                i += 2;
            } else if start < lopage {
                self.areas[i].end = lopage;
                i += 1;
            } else if hi < end {
                let area = &mut self.areas[i];
                area.off += hi - area.start;
                area.start = hi;
                i += 1;
            } else {
                self.areas.remove(i);
            }
        }

        // 变更落定后失效页表项并冲刷 TLB
        self.pt.unmap_range(lopage, npages);
        self.pt.flush_range(lopage, npages);
    }

    /// fork 语义的克隆。共享区直接共用对象；
    /// 私有区先坍缩既有影子链，再在原对象之上两侧各兜一层新影子，
    /// 父方的区改指己方影子，原引用随之让渡。
    pub fn fork(&mut self, pt: Arc<dyn PageTable>) -> VmMap {
        let mut child_areas = Vec::with_capacity(self.areas.len());

        for area in self.areas.iter_mut() {
            let child_mobj = if area.flags.contains(MapFlag::Shared) {
                Arc::clone(&area.mobj)
            } else {
                area.mobj.collapse();
                let base = Arc::clone(&area.mobj);
                let child_shadow = MemObj::shadow(Arc::clone(&base));
                area.mobj = MemObj::shadow(base);
                // 父方此后的写也要缺页进影子，旧的页表映射一并作废
                self.pt.unmap_range(area.start, area.end - area.start);
                self.pt.flush_range(area.start, area.end - area.start);
                child_shadow
            };

            child_areas.push(VmArea {
                start: area.start,
                end: area.end,
                off: area.off,
                prot: area.prot,
                flags: area.flags,
                mobj: child_mobj,
            });
        }

        VmMap {
            areas: child_areas,
            pt,
        }
    }

    /// 跨地址空间读：copy_from_user 的底座
    pub fn read(&self, vaddr: usize, buf: &mut [u8]) -> Result<()> {
        let mut addr = vaddr;
        let mut done = 0;
        while done < buf.len() {
            let vfn = addr / PAGE_SIZE;
            let area = self.lookup(vfn).ok_or(Errno::EINVAL)?;
            let pagenum = area.off + (vfn - area.start);

            let frame = area.mobj.get_pframe(pagenum, false)?;
            let frame = frame.lock();
            let in_off = addr % PAGE_SIZE;
            let count = (PAGE_SIZE - in_off).min(buf.len() - done);
            buf[done..done + count].copy_from_slice(&frame.bytes()[in_off..in_off + count]);
            drop(frame);

            done += count;
            addr += count;
        }
        Ok(())
    }

    /// 跨地址空间写：copy_to_user 的底座，写过的页都被标脏
    pub fn write(&self, vaddr: usize, buf: &[u8]) -> Result<()> {
        let mut addr = vaddr;
        let mut done = 0;
        while done < buf.len() {
            let vfn = addr / PAGE_SIZE;
            let area = self.lookup(vfn).ok_or(Errno::EINVAL)?;
            let pagenum = area.off + (vfn - area.start);

            let frame = area.mobj.get_pframe(pagenum, true)?;
            let mut frame = frame.lock();
            let in_off = addr % PAGE_SIZE;
            let count = (PAGE_SIZE - in_off).min(buf.len() - done);
            frame.bytes_mut()[in_off..in_off + count].copy_from_slice(&buf[done..done + count]);
            drop(frame);

            done += count;
            addr += count;
        }
        Ok(())
    }

    pub(crate) fn flush(&self, lopage: usize, npages: usize) {
        self.pt.flush_range(lopage, npages);
    }
}
