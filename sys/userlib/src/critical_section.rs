// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An implementation to support the `critical-section` crate within a task.
//!
//! A task here never runs a second thread or an asynchronous interrupt
//! handler inside its own address space -- an IPC wait is the only thing
//! that can suspend it, and it resumes exactly where it left off. That
//! means a critical section needs no code at all within a task; the
//! property critical sections exist to guarantee already holds.
//!
//! Opt out of this if you're doing something unusual with shared memory
//! across a task boundary; by default that's hard to arrange, but if
//! you've arranged it anyway, you know what you're asking for.

use critical_section::RawRestoreState;

struct TaskCriticalSection;
critical_section::set_impl!(TaskCriticalSection);

unsafe impl critical_section::Impl for TaskCriticalSection {
    #[inline(always)]
    unsafe fn acquire() -> RawRestoreState {
        // No action required.
    }

    #[inline(always)]
    unsafe fn release(_token: RawRestoreState) {
        // Again, no action required.
    }
}
