// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for x86_64.
//!
//! Physical memory is accessed through a direct map at [`PHYS_MAP_BASE`],
//! the same -2GiB-region convention most higher-half x86_64 kernels use:
//! `phys + PHYS_MAP_BASE` is always a valid virtual alias of physical
//! address `phys`, set up by the bootloader hand-off before any of this
//! code runs.
//!
//! `mem`'s `PageTable` bookkeeping (what's mapped where, COW state) is
//! architecture-independent; this module's job is to turn that bookkeeping
//! into a real PML4/PDPT/PD/PT hierarchy and load it into CR3, and to
//! invalidate stale translations -- locally via `invlpg`, and on other CPUs
//! via a shootdown IPI through the Local APIC.

use core::sync::atomic::{AtomicU64, Ordering};

use abi::{Gsi, RegionAttributes};
use alloc::vec::Vec;
use x86_64::instructions::interrupts;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::{
    Page, PageTable as HwPageTable, PageTableFlags, PageTableIndex, PhysFrame,
    Size4KiB,
};
use x86_64::{PhysAddr, VirtAddr};

use crate::mem::PageTableId;
use crate::spinlock::Spinlock;
use crate::task::{ArchState, Task};
use crate::time::Timestamp;

pub const PHYS_MAP_BASE: u64 = 0xFFFF_FFFF_8000_0000;

#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedState {
    // Argument registers, in the order a `syscall`-instruction trampoline
    // would have spilled them (rcx/r11 are clobbered by `syscall` itself, so
    // r10 stands in for the fourth argument as usual on this platform).
    rdi: u64,
    rsi: u64,
    rdx: u64,
    r10: u64,
    r8: u64,
    r9: u64,
    r12: u64,
    /// Syscall descriptor in, result code out.
    rax: u64,
    /// Result value out; callee-saved the rest of the time.
    rbx: u64,
    rbp: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rsp: u64,
    rip: u64,
    rflags: u64,
}

impl ArchState for SavedState {
    fn stack_pointer(&self) -> u64 {
        self.rsp
    }

    fn arg0(&self) -> u64 {
        self.rdi
    }
    fn arg1(&self) -> u64 {
        self.rsi
    }
    fn arg2(&self) -> u64 {
        self.rdx
    }
    fn arg3(&self) -> u64 {
        self.r10
    }
    fn arg4(&self) -> u64 {
        self.r8
    }
    fn arg5(&self) -> u64 {
        self.r9
    }
    fn arg6(&self) -> u64 {
        self.r12
    }

    fn syscall_descriptor(&self) -> u32 {
        self.rax as u32
    }

    fn ret0(&mut self, x: u64) {
        self.rax = x
    }
    fn ret1(&mut self, x: u64) {
        self.rbx = x
    }
    fn ret2(&mut self, x: u64) {
        self.rbp = x
    }
    fn ret3(&mut self, x: u64) {
        self.r13 = x
    }
    fn ret4(&mut self, x: u64) {
        self.r14 = x
    }
    fn ret5(&mut self, x: u64) {
        self.r15 = x
    }
}

pub fn reinitialize(task: &mut Task) {
    *task.save_mut() = SavedState::default();
    let descriptor = task.descriptor();
    let save = task.save_mut();
    save.rsp = descriptor.initial_stack;
    save.rip = descriptor.entry_point;
    // Interrupt flag set, reserved bit 1 set; everything else clear.
    save.rflags = 0x202;
}

pub fn now() -> Timestamp {
    // Safety: `rdtsc` has no side effects beyond reading a counter.
    Timestamp::from(unsafe { core::arch::x86_64::_rdtsc() })
}

pub fn disable_interrupts() -> bool {
    let was_enabled = interrupts::are_enabled();
    interrupts::disable();
    was_enabled
}

pub fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        interrupts::enable();
    }
}

/// Physical frame the directed-IPI "halt" vector lands on. Not an entry
/// point for anything else; AP startup installs a handler at this vector
/// that parks the core in `hlt` forever.
const HALT_IPI_VECTOR: u8 = 0xFE;
const SHOOTDOWN_IPI_VECTOR: u8 = 0xFD;

pub fn halt_other_cpus() {
    local_apic().send_ipi_all_excluding_self(HALT_IPI_VECTOR);
}

fn phys_to_virt(phys: u64) -> *mut u8 {
    (phys + PHYS_MAP_BASE) as *mut u8
}

pub fn copy_frame(src_frame: u64, dst_frame: u64) {
    // Safety: both frames come from `mem`'s allocator, which never hands out
    // a frame outside the range the bootloader described as usable RAM, and
    // that range is covered by the direct map.
    unsafe {
        core::ptr::copy_nonoverlapping(
            phys_to_virt(src_frame * crate::mem::PAGE_SIZE),
            phys_to_virt(dst_frame * crate::mem::PAGE_SIZE),
            crate::mem::PAGE_SIZE as usize,
        );
    }
}

pub fn zero_frame(frame: u64) {
    // Safety: see `copy_frame`.
    unsafe {
        core::ptr::write_bytes(
            phys_to_virt(frame * crate::mem::PAGE_SIZE),
            0,
            crate::mem::PAGE_SIZE as usize,
        );
    }
}

/// PML4 frames, one per activated `PageTableId`, drawn from `mem`'s own
/// frame allocator (`mem::alloc_raw_frame`) rather than a separate pool:
/// these frames back no `MemObject` and so never show up in
/// `for_each_resolved_page`, but there's no reason to seed and track a
/// second bump range when one already exists and covers all of usable RAM.
static TABLE_ROOTS: Spinlock<Vec<(PageTableId, u64)>> = Spinlock::new(Vec::new());

fn alloc_table_frame() -> u64 {
    let frame = crate::mem::alloc_raw_frame()
        .unwrap_or_else(|_| crate::fail::die("out of memory for hardware page tables"));
    zero_frame(frame);
    frame
}

fn root_frame(pt: PageTableId) -> u64 {
    let mut roots = TABLE_ROOTS.lock();
    if let Some((_, frame)) = roots.iter().find(|(id, _)| *id == pt) {
        return *frame;
    }
    let frame = alloc_table_frame();
    roots.push((pt, frame));
    frame
}

fn hw_table(frame: u64) -> &'static mut HwPageTable {
    // Safety: frame was allocated (and zeroed) by `alloc_table_frame`, and
    // the direct map covers it.
    unsafe { &mut *(phys_to_virt(frame * crate::mem::PAGE_SIZE) as *mut HwPageTable) }
}

fn get_or_create_next(entry: &mut x86_64::structures::paging::PageTableEntry) -> u64 {
    if entry.flags().contains(PageTableFlags::PRESENT) {
        return entry.addr().as_u64() / crate::mem::PAGE_SIZE;
    }
    let frame = alloc_table_frame();
    entry.set_addr(
        PhysAddr::new(frame * crate::mem::PAGE_SIZE),
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
    );
    frame
}

fn pte_flags(attrs: RegionAttributes) -> PageTableFlags {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    if attrs.contains(RegionAttributes::WRITE) {
        flags |= PageTableFlags::WRITABLE;
    }
    if !attrs.contains(RegionAttributes::EXECUTE) {
        flags |= PageTableFlags::NO_EXECUTE;
    }
    if attrs.contains(RegionAttributes::DEVICE) || attrs.contains(RegionAttributes::DMA) {
        flags |= PageTableFlags::NO_CACHE | PageTableFlags::WRITE_THROUGH;
    }
    flags
}

fn install_page(pml4_frame: u64, vaddr: u64, paddr: u64, attrs: RegionAttributes) {
    let virt = VirtAddr::new(vaddr);
    let p4i = PageTableIndex::new((virt.as_u64() >> 39) as u16 & 0x1FF);
    let p3i = PageTableIndex::new((virt.as_u64() >> 30) as u16 & 0x1FF);
    let p2i = PageTableIndex::new((virt.as_u64() >> 21) as u16 & 0x1FF);
    let p1i = PageTableIndex::new((virt.as_u64() >> 12) as u16 & 0x1FF);

    let p4 = hw_table(pml4_frame);
    let p3 = hw_table(get_or_create_next(&mut p4[p4i]));
    let p2 = hw_table(get_or_create_next(&mut p3[p3i]));
    let p1 = hw_table(get_or_create_next(&mut p2[p2i]));
    p1[p1i].set_addr(PhysAddr::new(paddr), pte_flags(attrs));
}

/// Rebuilds the hardware table for `pt` from `mem`'s bookkeeping and loads
/// it into CR3.
pub fn activate_page_table(pt: PageTableId) {
    let frame = root_frame(pt);
    let _ = crate::mem::for_each_resolved_page(pt, |vaddr, paddr, attrs| {
        install_page(frame, vaddr, paddr, attrs);
    });
    // Safety: `frame` is a PML4 this module built and keeps zero-initialized
    // outside the entries it explicitly populated.
    unsafe {
        Cr3::write(
            PhysFrame::containing_address(PhysAddr::new(frame * crate::mem::PAGE_SIZE)),
            Cr3Flags::empty(),
        );
    }
}

pub fn shootdown_range(_pt: PageTableId, vaddr: u64, len: u64) {
    let pages = len.div_ceil(crate::mem::PAGE_SIZE).max(1);
    for i in 0..pages {
        x86_64::instructions::tlb::flush(Page::<Size4KiB>::containing_address(
            VirtAddr::new(vaddr + i * crate::mem::PAGE_SIZE),
        ));
    }
    local_apic().send_ipi_all_excluding_self(SHOOTDOWN_IPI_VECTOR);
}

/// xAPIC registers, accessed through the direct map at their fixed physical
/// base. Real platforms vary in whether x2APIC (MSR-based) is preferred;
/// this kernel only implements the universally-present xAPIC MMIO form.
struct LocalApic {
    base: *mut u32,
}

const APIC_BASE_PHYS: u64 = 0xFEE0_0000;
const APIC_REG_ICR_LOW: usize = 0x300 / 4;
const APIC_REG_ICR_HIGH: usize = 0x310 / 4;

const ICR_DELIVERY_FIXED: u32 = 0;
const ICR_DEST_ALL_EXCLUDING_SELF: u32 = 0b11 << 18;

fn local_apic() -> LocalApic {
    LocalApic {
        base: phys_to_virt(APIC_BASE_PHYS) as *mut u32,
    }
}

impl LocalApic {
    fn write(&self, reg: usize, value: u32) {
        // Safety: the direct map covers the fixed APIC MMIO page, and these
        // registers tolerate being written in this order on every
        // implementation this kernel targets.
        unsafe { self.base.add(reg).write_volatile(value) }
    }

    fn send_ipi_all_excluding_self(&self, vector: u8) {
        self.write(APIC_REG_ICR_HIGH, 0);
        self.write(
            APIC_REG_ICR_LOW,
            vector as u32 | ICR_DELIVERY_FIXED | ICR_DEST_ALL_EXCLUDING_SELF,
        );
    }
}

/// I/O APIC, accessed through its fixed MMIO window. Masking a GSI clears
/// bit 16 of its low redirection-table dword (and unmasking sets it).
const IOAPIC_BASE_PHYS: u64 = 0xFEC0_0000;
const IOAPIC_REGSEL: usize = 0x00 / 4;
const IOAPIC_WIN: usize = 0x10 / 4;
const IOAPIC_REDTBL_BASE: u32 = 0x10;
const IOAPIC_MASKED: u32 = 1 << 16;

fn ioapic_set_masked(gsi: Gsi, masked: bool) {
    let base = phys_to_virt(IOAPIC_BASE_PHYS) as *mut u32;
    let low_index = IOAPIC_REDTBL_BASE + gsi.0 * 2;
    // Safety: the direct map covers the fixed IOAPIC MMIO page; select/
    // window is the standard two-register access pattern for this device.
    unsafe {
        base.add(IOAPIC_REGSEL).write_volatile(low_index);
        let mut low = base.add(IOAPIC_WIN).read_volatile();
        if masked {
            low |= IOAPIC_MASKED;
        } else {
            low &= !IOAPIC_MASKED;
        }
        base.add(IOAPIC_REGSEL).write_volatile(low_index);
        base.add(IOAPIC_WIN).write_volatile(low);
    }
}

pub fn mask_gsi(gsi: Gsi) {
    ioapic_set_masked(gsi, true);
}

pub fn unmask_gsi(gsi: Gsi) {
    ioapic_set_masked(gsi, false);
}

const APIC_REG_ID: usize = 0x20 / 4;

/// Reads the calling CPU's local APIC id out of its own APIC, for
/// `Sysnum::GetLapicId`.
pub fn lapic_id() -> u32 {
    let apic = local_apic();
    // Safety: the direct map covers the fixed APIC MMIO page; the ID
    // register is read-only and always present.
    (unsafe { apic.base.add(APIC_REG_ID).read_volatile() }) >> 24
}

static TSC_CALIBRATED: AtomicU64 = AtomicU64::new(0);

/// Records the measured TSC frequency (Hz), so callers that need wall-clock
/// time can convert `now()` ticks. Calibration itself happens in startup,
/// timed against the platform's PIT or HPET.
pub fn set_tsc_frequency(hz: u64) {
    TSC_CALIBRATED.store(hz, Ordering::Relaxed);
}

pub fn tsc_frequency() -> u64 {
    TSC_CALIBRATED.load(Ordering::Relaxed)
}

const USER_CS_SELECTOR: u64 = 0x1B;
const USER_SS_SELECTOR: u64 = 0x23;

/// Loads `task`'s saved register file and drops to ring 3 via `iretq`.
/// Never returns; this is the last thing `startup` does on a given CPU.
pub fn resume(task: &Task) -> ! {
    let s = task.save();
    unsafe {
        core::arch::asm!(
            "push {ss}",
            "push {rsp}",
            "push {rflags}",
            "push {cs}",
            "push {rip}",
            "iretq",
            ss = in(reg) USER_SS_SELECTOR,
            rsp = in(reg) s.rsp,
            rflags = in(reg) s.rflags,
            cs = in(reg) USER_CS_SELECTOR,
            rip = in(reg) s.rip,
            in("rdi") s.rdi,
            in("rsi") s.rsi,
            in("rdx") s.rdx,
            in("r10") s.r10,
            in("r8") s.r8,
            in("r9") s.r9,
            options(noreturn),
        )
    }
}
