// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup: early boot and CPU bring-up.
//!
//! The bootstrap processor (BSP) enters at [`start_kernel`] with the
//! physical address of the bootloader's tag chain (the hand-off format
//! documented on `abi::bootinfo`). It walks the chain, seeds the frame
//! allocator from the `MEMORY_MAP` tag, builds the task table from the
//! build-time app descriptor, and resumes the highest-priority
//! `START_AT_BOOT` task.
//!
//! Application processors (APs) are woken by the platform's own means
//! (trampoline code in low memory, INIT-SIPI-SIPI on x86, `PSCI` elsewhere
//! -- all arch-specific and out of scope here) and enter at
//! [`start_application_processor`] once they're running in long mode /
//! the kernel's normal execution environment. They wait for the BSP to
//! finish the global init above, then just join the scheduler.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use abi::bootinfo::{
    FdtDescriptor, FramebufferDescriptor, LoadTagGeneric, MemoryMapDescriptor,
    RsdpDescriptor, StackDescriptor,
};

use crate::mem::{self, MemObjectId, PageTableId};
use crate::task::{self, Task};
use crate::timer;

/// Fields of the bootloader hand-off the kernel itself consumes. Fields a
/// given platform's bootloader didn't provide stay `None`; tags the kernel
/// doesn't recognize are skipped via `offset_to_next` without complaint, so
/// a newer bootloader can add tags without breaking older kernels.
#[derive(Default)]
pub struct BootInfo {
    pub stack: Option<StackDescriptor>,
    pub framebuffer: Option<FramebufferDescriptor>,
    pub rsdp: Option<RsdpDescriptor>,
    pub fdt: Option<FdtDescriptor>,
    pub memory_map: Option<MemoryMapDescriptor>,
    pub module_count: usize,
}

/// Walks the tag chain starting at `base` until `LoadTagGeneric::CLOSE`.
///
/// # Safety
///
/// `base` must point to a valid tag chain as constructed by the
/// bootloader: each tag's `offset_to_next` must either be zero (this is
/// the last tag) or land on another well-formed `LoadTagGeneric`, and the
/// whole chain must be mapped and readable.
unsafe fn walk_tags(base: *const u8) -> BootInfo {
    let mut info = BootInfo::default();
    let mut cursor = base;
    loop {
        let header =
            core::ptr::read_unaligned(cursor as *const LoadTagGeneric);
        match header.tag {
            LoadTagGeneric::CLOSE => break,
            LoadTagGeneric::STACK_DESCRIPTOR => {
                info.stack = Some(core::ptr::read_unaligned(
                    cursor as *const StackDescriptor,
                ));
            }
            LoadTagGeneric::FRAMEBUFFER => {
                info.framebuffer = Some(core::ptr::read_unaligned(
                    cursor as *const FramebufferDescriptor,
                ));
            }
            LoadTagGeneric::RSDP => {
                info.rsdp = Some(core::ptr::read_unaligned(
                    cursor as *const RsdpDescriptor,
                ));
            }
            LoadTagGeneric::FDT => {
                info.fdt = Some(core::ptr::read_unaligned(
                    cursor as *const FdtDescriptor,
                ));
            }
            LoadTagGeneric::MEMORY_MAP => {
                info.memory_map = Some(core::ptr::read_unaligned(
                    cursor as *const MemoryMapDescriptor,
                ));
            }
            LoadTagGeneric::MODULES => {
                info.module_count += 1;
            }
            // ARGUMENTS, ENVIRONMENT, and anything a future bootloader adds
            // that this kernel predates: `offset_to_next` is enough to
            // step over it.
            _ => {}
        }
        if header.offset_to_next == 0 {
            break;
        }
        cursor = cursor.add(header.offset_to_next as usize);
    }
    info
}

/// Set once the BSP has finished building the task table; APs spin on this
/// before touching it.
static KERNEL_READY: AtomicBool = AtomicBool::new(false);

/// Creates one memory object per region descriptor in the app image,
/// identity-mapping its physical range. This kernel's regions are already
/// architecture-independent virtual ranges (unlike the MPU-window layout
/// this crate started from); rather than reconstructing each task's
/// backing store from loaded ELF modules at boot, pmOS treats the linked
/// physical address of a region as also being its physical backing,
/// matching the old model's physical-equals-virtual simplicity while
/// still going through the real `mem` COW-capable page tables instead of
/// an MPU. A userspace loader task is responsible for anything fancier
/// (position-independent relocation, lazy module loading) above this.
fn region_objects(
    region_descs: &'static [abi::RegionDesc],
) -> Vec<MemObjectId> {
    region_descs
        .iter()
        .map(|r| {
            mem::create_phys_map_object(r.base, r.size).unwrap_or_else(|_| {
                crate::fail::die(
                    "boot region is not page-aligned or empty",
                )
            })
        })
        .collect()
}

/// Builds a fresh page table for `descriptor`, mapping in each of its
/// owned regions from `objects`/`region_descs`.
fn build_page_table(
    descriptor: &abi::TaskDesc,
    region_descs: &'static [abi::RegionDesc],
    objects: &[MemObjectId],
) -> PageTableId {
    let pt = mem::create_page_table();
    for &region_index in &descriptor.regions {
        let region = &region_descs[region_index as usize];
        if region.size == 0 {
            // Index 0 is conventionally a no-access placeholder; skip it
            // rather than mapping a zero-length range.
            continue;
        }
        mem::map_region(
            pt,
            objects[region_index as usize],
            0,
            region.base,
            region.size,
            region.attributes,
        )
        .unwrap_or_else(|_| crate::fail::die("boot region failed to map"));
    }
    pt
}

/// The main kernel entry point, called once by the bootstrap processor.
///
/// `boot_info_phys` is the physical address of the bootloader's tag
/// chain, mapped 1:1 at this point in boot (before the kernel has
/// installed its own page tables, early boot code runs against an
/// identity or bootloader-provided mapping -- see each `arch` module's
/// own entry trampoline).
///
/// # Safety
///
/// Must be called exactly once per boot, before any AP calls
/// `start_application_processor`, and `boot_info_phys` must point to a
/// valid tag chain per `walk_tags`.
pub unsafe fn start_kernel(boot_info_phys: u64) -> ! {
    crate::heap::init();

    crate::klog!("pmos: parsing boot hand-off");
    let info = walk_tags(boot_info_phys as *const u8);

    let memory_map = info.memory_map.unwrap_or_else(|| {
        crate::fail::die("bootloader hand-off is missing a MEMORY_MAP tag")
    });
    mem::init_frame_allocator(
        memory_map.phys_base / mem::PAGE_SIZE,
        memory_map.frame_count,
    );

    timer::init(PMOS_NUM_CPUS);
    task::init_current(PMOS_NUM_CPUS);

    let objects = region_objects(&PMOS_REGION_DESCS);
    let mut tasks = Vec::with_capacity(PMOS_TASK_COUNT);
    for descriptor in &PMOS_TASK_DESCS {
        let pt = build_page_table(descriptor, &PMOS_REGION_DESCS, &objects);
        let region_table = region_table_for(descriptor, &PMOS_REGION_DESCS);
        let mut task = Task::from_descriptor(descriptor, region_table, pt);
        crate::arch::reinitialize(&mut task);
        tasks.push(task);
    }
    task::init_tasks(tasks);

    klog!("pmos: scheduling first task");
    KERNEL_READY.store(true, Ordering::Release);

    enter_scheduler(0)
}

/// Entry point for an application processor, called once it's running in
/// the kernel's normal execution environment (arch-specific trampoline
/// code has already set up a stack and whatever paging mode the platform
/// needs by this point).
///
/// # Safety
///
/// Must be called exactly once per AP, after `start_kernel` has been
/// entered on the BSP (though not necessarily after it has finished --
/// this function waits).
pub unsafe fn start_application_processor(cpu: usize) -> ! {
    while !KERNEL_READY.load(Ordering::Acquire) {
        core::hint::spin_loop();
    }
    enter_scheduler(cpu)
}

/// Common tail of both entry points: picks this CPU's first task and
/// resumes it. Never returns.
unsafe fn enter_scheduler(cpu: usize) -> ! {
    let (idx, pt) = task::with_tasks(|tasks| {
        let idx = task::select(tasks.len() - 1, tasks, cpu);
        (idx, tasks[idx].page_table())
    });
    task::set_current(cpu, idx);
    mem::activate(pt);

    // Safety: `task_ptr` is valid forever once `init_tasks` has run, which
    // it has -- `enter_scheduler` is only reachable after that point on
    // every path above. We deliberately don't hold `TASKS` locked across
    // `arch::resume`, which never returns: doing so would leave the lock
    // held forever and wedge every other CPU out of the task table.
    let task = &*task::task_ptr(idx);
    crate::arch::resume(task)
}

/// Builds `descriptor`'s array of region references from the flat
/// `region_descs` table, per its `regions` index list, leaking it to get
/// the `'static` lifetime `Task::region_table` wants. Each task leaks one
/// small array exactly once at boot; this is not a per-task-restart cost,
/// since a restart reuses the same table rather than rebuilding it.
fn region_table_for(
    descriptor: &abi::TaskDesc,
    region_descs: &'static [abi::RegionDesc],
) -> &'static [&'static abi::RegionDesc] {
    let table: Vec<&'static abi::RegionDesc> = descriptor
        .regions
        .iter()
        .map(|&index| &region_descs[index as usize])
        .collect();
    Box::leak(table.into_boxed_slice())
}

/// Returns the task index that is the default owner of `gsi` per the
/// boot-time app descriptor, if any. Used by `SetInterrupt` to check that
/// the calling task is allowed to bind it.
pub fn irq_owner_task(gsi: abi::Gsi) -> Option<usize> {
    PMOS_INTERRUPTS
        .iter()
        .find(|i| i.gsi == gsi)
        .map(|i| i.owner.task as usize)
}

include!(concat!(env!("OUT_DIR"), "/kconfig.rs"));
