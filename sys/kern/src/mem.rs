// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memory objects, per-task page tables, and TLB shootdown: spec §4.4.
//!
//! A memory object is either `Anonymous` (zero-fill-on-demand, frames
//! allocated lazily and eligible for copy-on-write sharing between forked
//! tasks) or `PhysMap` (a fixed physical range, e.g. a framebuffer or MMIO
//! window, mapped as-is). A page table binds ranges of a memory object into
//! a task's virtual address space; the mapping bookkeeping itself
//! (`PageTable`) is architecture-independent, since every supported arch's
//! hardware table is just a cache of the same information. What differs per
//! arch is two things only: loading the table-base register
//! (`arch::activate_page_table`) and invalidating stale TLB entries
//! (`arch::invalidate_range` / the shootdown IPI), both of which live under
//! `arch`.

use abi::{ErrorKind, RegionAttributes};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::spinlock::Spinlock;

pub const PAGE_SIZE: u64 = 4096;
pub const PAGE_SHIFT: u32 = 12;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemObjectId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct PageTableId(pub u32);

enum MemObjectKind {
    /// Zero-fill-on-demand. `frames[i]` is the physical frame backing page
    /// `i`, allocated the first time it's touched.
    Anonymous { frames: Vec<Option<u64>> },
    /// A fixed physical window, mapped 1:1 from `base_frame`.
    PhysMap { base_frame: u64 },
}

struct MemObject {
    kind: MemObjectKind,
    size_pages: u64,
    refcount: u32,
}

#[derive(Clone, Copy)]
struct MappedPage {
    object: MemObjectId,
    /// Page index within the object.
    object_page: u64,
    attrs: RegionAttributes,
    /// Set when this page is a copy-on-write alias of an anonymous object's
    /// frame shared with another task; the next write fault duplicates it.
    cow: bool,
}

#[derive(Default)]
struct PageTable {
    pages: BTreeMap<u64, MappedPage>,
}

struct MemState {
    next_object: u64,
    objects: Vec<(MemObjectId, MemObject)>,
    next_table: u32,
    tables: Vec<(PageTableId, PageTable)>,
    /// Bump allocator over a physical range handed off by the bootloader.
    /// Pages are never individually freed in this kernel's model; an
    /// object's frames are reclaimed only when its refcount drops to zero
    /// (tracked, but bulk reclamation is left to a future allocator).
    next_frame: u64,
    frame_limit: u64,
}

static MEM: Spinlock<MemState> = Spinlock::new(MemState {
    next_object: 1,
    objects: Vec::new(),
    next_table: 1,
    tables: Vec::new(),
    next_frame: 0,
    frame_limit: 0,
});

/// Seeds the anonymous-page bump allocator from the bootloader's memory map.
/// Called once from `startup` before any task is created.
pub fn init_frame_allocator(base_frame: u64, frame_count: u64) {
    let mut m = MEM.lock();
    m.next_frame = base_frame;
    m.frame_limit = base_frame + frame_count;
}

fn alloc_frame(m: &mut MemState) -> Result<u64, ErrorKind> {
    if m.next_frame >= m.frame_limit {
        return Err(ErrorKind::NoMemory);
    }
    let f = m.next_frame;
    m.next_frame += 1;
    Ok(f)
}

/// Hands out one raw physical frame from the same bump allocator
/// `create_anonymous_object` draws from, with no backing `MemObject`.
///
/// For `arch` backends that need frames for their own bookkeeping (e.g.
/// hardware page-table levels) rather than for a task's address space.
/// Such frames are never tracked by a `MemObject` and so never appear in
/// `for_each_resolved_page`; callers are responsible for zeroing them if
/// they need to (see `arch::zero_frame`).
pub fn alloc_raw_frame() -> Result<u64, ErrorKind> {
    alloc_frame(&mut MEM.lock())
}

fn bytes_to_pages(len: u64) -> Result<u64, ErrorKind> {
    if len == 0 || !len.is_multiple_of(PAGE_SIZE) {
        return Err(ErrorKind::BadArgument);
    }
    Ok(len / PAGE_SIZE)
}

/// Creates a zero-fill-on-demand memory object of `size` bytes (must be
/// page-aligned).
pub fn create_anonymous_object(size: u64) -> Result<MemObjectId, ErrorKind> {
    let pages = bytes_to_pages(size)?;
    let mut m = MEM.lock();
    let id = MemObjectId(m.next_object);
    m.next_object += 1;
    m.objects.push((
        id,
        MemObject {
            kind: MemObjectKind::Anonymous {
                frames: alloc::vec![None; pages as usize],
            },
            size_pages: pages,
            refcount: 1,
        },
    ));
    Ok(id)
}

/// Creates a memory object that maps an existing physical range as-is, e.g.
/// a framebuffer or a module loaded by the bootloader.
pub fn create_phys_map_object(
    base: u64,
    size: u64,
) -> Result<MemObjectId, ErrorKind> {
    if !base.is_multiple_of(PAGE_SIZE) {
        return Err(ErrorKind::BadArgument);
    }
    let pages = bytes_to_pages(size)?;
    let mut m = MEM.lock();
    let id = MemObjectId(m.next_object);
    m.next_object += 1;
    m.objects.push((
        id,
        MemObject {
            kind: MemObjectKind::PhysMap {
                base_frame: base / PAGE_SIZE,
            },
            size_pages: pages,
            refcount: 1,
        },
    ));
    Ok(id)
}

/// Allocates a fresh, empty page table for a new task.
pub fn create_page_table() -> PageTableId {
    let mut m = MEM.lock();
    let id = PageTableId(m.next_table);
    m.next_table += 1;
    m.tables.push((id, PageTable::default()));
    id
}

fn find_object<'a>(
    m: &'a mut MemState,
    id: MemObjectId,
) -> Option<&'a mut MemObject> {
    m.objects.iter_mut().find(|(o, _)| *o == id).map(|(_, o)| o)
}

fn find_table<'a>(
    m: &'a mut MemState,
    id: PageTableId,
) -> Option<&'a mut PageTable> {
    m.tables.iter_mut().find(|(t, _)| *t == id).map(|(_, t)| t)
}

/// Maps `len` bytes of `object`, starting at `object_offset` bytes into it,
/// into `pt` at virtual address `vaddr`. All three of `object_offset`,
/// `vaddr`, and `len` must be page-aligned. Overwrites any existing mapping
/// in the affected range.
pub fn map_region(
    pt: PageTableId,
    object: MemObjectId,
    object_offset: u64,
    vaddr: u64,
    len: u64,
    attrs: RegionAttributes,
) -> Result<(), ErrorKind> {
    let npages = bytes_to_pages(len)?;
    if !object_offset.is_multiple_of(PAGE_SIZE) || !vaddr.is_multiple_of(PAGE_SIZE)
    {
        return Err(ErrorKind::BadArgument);
    }
    let first_object_page = object_offset / PAGE_SIZE;

    let mut m = MEM.lock();
    let obj_size_pages = find_object(&mut m, object)
        .ok_or(ErrorKind::NotFound)?
        .size_pages;
    if first_object_page + npages > obj_size_pages {
        return Err(ErrorKind::BadArgument);
    }

    let table = find_table(&mut m, pt).ok_or(ErrorKind::NotFound)?;
    for i in 0..npages {
        table.pages.insert(
            vaddr / PAGE_SIZE + i,
            MappedPage {
                object,
                object_page: first_object_page + i,
                attrs,
                cow: false,
            },
        );
    }
    Ok(())
}

/// Removes any mapping covering `[vaddr, vaddr+len)` from `pt` and shoots
/// down the range on every CPU currently running against this table.
pub fn delete_region(
    pt: PageTableId,
    vaddr: u64,
    len: u64,
) -> Result<(), ErrorKind> {
    let npages = bytes_to_pages(len)?;
    if !vaddr.is_multiple_of(PAGE_SIZE) {
        return Err(ErrorKind::BadArgument);
    }
    {
        let mut m = MEM.lock();
        let table = find_table(&mut m, pt).ok_or(ErrorKind::NotFound)?;
        for i in 0..npages {
            table.pages.remove(&(vaddr / PAGE_SIZE + i));
        }
    }
    shootdown(pt, vaddr, len);
    Ok(())
}

/// Reports whether a physical frame has actually been allocated for the
/// page at `vaddr` (as opposed to merely being mapped as zero-fill-on-
/// demand and not yet touched).
pub fn is_page_allocated(pt: PageTableId, vaddr: u64) -> Result<bool, ErrorKind> {
    let mut m = MEM.lock();
    let table = find_table(&mut m, pt).ok_or(ErrorKind::NotFound)?;
    let Some(mapping) = table.pages.get(&(vaddr / PAGE_SIZE)).copied() else {
        return Ok(false);
    };
    let object = find_object(&mut m, mapping.object).ok_or(ErrorKind::NotFound)?;
    Ok(match &object.kind {
        MemObjectKind::PhysMap { .. } => true,
        MemObjectKind::Anonymous { frames } => {
            frames[mapping.object_page as usize].is_some()
        }
    })
}

/// Resolves `vaddr` to a physical frame number, allocating and zeroing a
/// frame on first touch for anonymous objects, and duplicating the frame
/// (breaking the COW alias) if this is a write fault against a shared page.
/// Returns `None` if nothing is mapped there.
pub fn translate(
    pt: PageTableId,
    vaddr: u64,
    is_write: bool,
) -> Result<Option<u64>, ErrorKind> {
    let mut m = MEM.lock();
    let table = find_table(&mut m, pt).ok_or(ErrorKind::NotFound)?;
    let Some(mut mapping) = table.pages.get(&(vaddr / PAGE_SIZE)).copied() else {
        return Ok(None);
    };

    let needs_copy = is_write && mapping.cow;
    let object = find_object(&mut m, mapping.object).ok_or(ErrorKind::NotFound)?;
    let frame = match &mut object.kind {
        MemObjectKind::PhysMap { base_frame } => *base_frame + mapping.object_page,
        MemObjectKind::Anonymous { frames } => {
            let slot = &mut frames[mapping.object_page as usize];
            match (*slot, needs_copy) {
                (Some(f), false) => f,
                (existing, _) => {
                    let new_frame = alloc_frame(&mut m)?;
                    if let Some(src) = existing {
                        crate::arch::copy_frame(src, new_frame);
                    } else {
                        crate::arch::zero_frame(new_frame);
                    }
                    let object = find_object(&mut m, mapping.object).unwrap();
                    let MemObjectKind::Anonymous { frames } = &mut object.kind else {
                        unreachable!()
                    };
                    frames[mapping.object_page as usize] = Some(new_frame);
                    new_frame
                }
            }
        }
    };

    if needs_copy {
        mapping.cow = false;
        let table = find_table(&mut m, pt).unwrap();
        table.pages.insert(vaddr / PAGE_SIZE, mapping);
    }

    Ok(Some(frame))
}

/// Marks every page currently mapped from `object` in `pt` as copy-on-write.
/// Used when a task group forks: the child's page table is populated by
/// re-mapping the parent's anonymous objects with `cow = true` on both
/// sides.
pub fn mark_cow(pt: PageTableId, object: MemObjectId) -> Result<(), ErrorKind> {
    let mut m = MEM.lock();
    let table = find_table(&mut m, pt).ok_or(ErrorKind::NotFound)?;
    for mapping in table.pages.values_mut() {
        if mapping.object == object {
            mapping.cow = true;
        }
    }
    Ok(())
}

/// Calls `f(vaddr, phys_addr, attrs)` for every page of `pt` that has
/// actually been resolved to a physical frame (pages that are mapped but
/// still zero-fill-on-demand and untouched are skipped). Used by
/// `arch::activate_page_table` to (re)build the real hardware table before
/// switching to it.
pub fn for_each_resolved_page(
    pt: PageTableId,
    mut f: impl FnMut(u64, u64, RegionAttributes),
) -> Result<(), ErrorKind> {
    let mut m = MEM.lock();
    let table = find_table(&mut m, pt).ok_or(ErrorKind::NotFound)?;
    let pages: Vec<(u64, MappedPage)> =
        table.pages.iter().map(|(&v, &p)| (v, p)).collect();
    for (vpage, mapping) in pages {
        let object =
            find_object(&mut m, mapping.object).ok_or(ErrorKind::NotFound)?;
        let frame = match &object.kind {
            MemObjectKind::PhysMap { base_frame } => {
                Some(*base_frame + mapping.object_page)
            }
            MemObjectKind::Anonymous { frames } => {
                frames[mapping.object_page as usize]
            }
        };
        if let Some(frame) = frame {
            f(vpage * PAGE_SIZE, frame * PAGE_SIZE, mapping.attrs);
        }
    }
    Ok(())
}

/// Activates `pt` as the current CPU's active address space.
pub fn activate(pt: PageTableId) {
    crate::arch::activate_page_table(pt);
}

/// Invalidates `[vaddr, vaddr+len)` in the TLBs of every CPU that might have
/// cached a translation through `pt`, via IPI if necessary.
pub fn shootdown(pt: PageTableId, vaddr: u64, len: u64) {
    crate::arch::shootdown_range(pt, vaddr, len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_and_translate_anonymous() {
        init_frame_allocator(0, 1024);
        let obj = create_anonymous_object(PAGE_SIZE).unwrap();
        let pt = create_page_table();
        map_region(pt, obj, 0, 0x1000, PAGE_SIZE, RegionAttributes::READ).unwrap();
        assert!(!is_page_allocated(pt, 0x1000).unwrap());
        let frame = translate(pt, 0x1000, false).unwrap().unwrap();
        assert!(is_page_allocated(pt, 0x1000).unwrap());
        // Same page, touched again, resolves to the same frame.
        assert_eq!(translate(pt, 0x1000, false).unwrap(), Some(frame));
    }

    #[test]
    fn cow_write_fault_duplicates_frame() {
        init_frame_allocator(1024, 1024);
        let obj = create_anonymous_object(PAGE_SIZE).unwrap();
        let pt_a = create_page_table();
        let pt_b = create_page_table();
        map_region(pt_a, obj, 0, 0x2000, PAGE_SIZE, RegionAttributes::READ).unwrap();
        map_region(pt_b, obj, 0, 0x2000, PAGE_SIZE, RegionAttributes::READ).unwrap();
        let shared = translate(pt_a, 0x2000, false).unwrap().unwrap();
        mark_cow(pt_a, obj).unwrap();
        mark_cow(pt_b, obj).unwrap();

        let after_write = translate(pt_a, 0x2000, true).unwrap().unwrap();
        assert_ne!(shared, after_write);
        // The other table's mapping is untouched until it also faults.
        assert_eq!(translate(pt_b, 0x2000, false).unwrap(), Some(shared));
    }

    #[test]
    fn delete_region_clears_mapping() {
        init_frame_allocator(2048, 16);
        let obj = create_anonymous_object(PAGE_SIZE).unwrap();
        let pt = create_page_table();
        map_region(pt, obj, 0, 0x3000, PAGE_SIZE, RegionAttributes::READ).unwrap();
        delete_region(pt, 0x3000, PAGE_SIZE).unwrap();
        assert_eq!(translate(pt, 0x3000, false).unwrap(), None);
    }

    #[test]
    fn unaligned_region_rejected() {
        let obj = create_anonymous_object(PAGE_SIZE).unwrap();
        let pt = create_page_table();
        assert_eq!(
            map_region(pt, obj, 0, 1, PAGE_SIZE, RegionAttributes::READ)
                .unwrap_err(),
            ErrorKind::BadArgument
        );
    }
}
