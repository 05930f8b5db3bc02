// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test backend.
//!
//! Backs the crate's own unit tests, which run as ordinary host threads
//! rather than on bare metal. There's no real MMU, APIC, or timer here:
//! paging and interrupt-controller hooks are bookkeeping-only, and the
//! clock is whatever `advance_clock` says it is.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use abi::Gsi;

use crate::mem::PageTableId;
use crate::task::{ArchState, Task};
use crate::time::Timestamp;

#[derive(Debug, Default)]
pub struct SavedState {
    args: [u64; 7],
    rets: [u64; 6],
    descriptor: u32,
}

impl ArchState for SavedState {
    fn stack_pointer(&self) -> u64 {
        0
    }

    fn arg0(&self) -> u64 {
        self.args[0]
    }
    fn arg1(&self) -> u64 {
        self.args[1]
    }
    fn arg2(&self) -> u64 {
        self.args[2]
    }
    fn arg3(&self) -> u64 {
        self.args[3]
    }
    fn arg4(&self) -> u64 {
        self.args[4]
    }
    fn arg5(&self) -> u64 {
        self.args[5]
    }
    fn arg6(&self) -> u64 {
        self.args[6]
    }

    fn syscall_descriptor(&self) -> u32 {
        self.descriptor
    }

    fn ret0(&mut self, x: u64) {
        self.rets[0] = x
    }
    fn ret1(&mut self, x: u64) {
        self.rets[1] = x
    }
    fn ret2(&mut self, x: u64) {
        self.rets[2] = x
    }
    fn ret3(&mut self, x: u64) {
        self.rets[3] = x
    }
    fn ret4(&mut self, x: u64) {
        self.rets[4] = x
    }
    fn ret5(&mut self, x: u64) {
        self.rets[5] = x
    }
}

/// Test helper: stages the arguments and syscall number a real trap entry
/// would have copied out of the register file.
impl SavedState {
    pub fn stage(&mut self, descriptor: u32, args: [u64; 7]) {
        self.descriptor = descriptor;
        self.args = args;
    }
}

pub fn reinitialize(task: &mut Task) {
    *task.save_mut() = SavedState::default();
}

static CLOCK: AtomicU64 = AtomicU64::new(0);

/// Advances the simulated clock. Only meaningful to tests that exercise
/// `timer::poll_expired` against `arch::now()`.
pub fn advance_clock(ticks: u64) {
    CLOCK.fetch_add(ticks, Ordering::Relaxed);
}

pub fn now() -> Timestamp {
    CLOCK.load(Ordering::Relaxed).into()
}

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

pub fn disable_interrupts() -> bool {
    INTERRUPTS_ENABLED.swap(false, Ordering::Acquire)
}

pub fn restore_interrupts(was_enabled: bool) {
    INTERRUPTS_ENABLED.store(was_enabled, Ordering::Release);
}

pub fn halt_other_cpus() {}

pub fn copy_frame(_src_frame: u64, _dst_frame: u64) {}

pub fn zero_frame(_frame: u64) {}

pub fn activate_page_table(_pt: PageTableId) {}

pub fn shootdown_range(_pt: PageTableId, _vaddr: u64, _len: u64) {}

pub fn mask_gsi(_gsi: Gsi) {}

pub fn unmask_gsi(_gsi: Gsi) {}

pub fn lapic_id() -> u32 {
    0
}

/// No host thread ever needs to "enter user mode"; tests drive syscalls
/// directly through `SavedState::stage` instead of booting.
pub fn resume(_task: &Task) -> ! {
    unimplemented!("sim backend has no user mode to resume into")
}
