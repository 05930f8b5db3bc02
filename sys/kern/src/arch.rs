// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! For this to work, each architecture support module must define the same
//! set of names:
//!
//! - `SavedState`, implementing `task::ArchState`, for the syscall register
//!   file saved/restored across a context switch.
//! - `reinitialize(task)`, which resets a task's `SavedState` and initial
//!   stack frame for a (re)start.
//! - `now()`, the kernel's monotonic timestamp source.
//! - `disable_interrupts() -> bool` / `restore_interrupts(bool)`, the
//!   primitive `spinlock::Spinlock` builds on.
//! - `halt_other_cpus()`, used once by `fail::die` on a fatal kernel error.
//! - `copy_frame`/`zero_frame`, raw physical-frame primitives for `mem`'s
//!   copy-on-write and zero-fill-on-demand paths.
//! - `activate_page_table`/`shootdown_range`, the only two paging operations
//!   that actually depend on the host MMU's table format; `mem`'s own
//!   bookkeeping (`PageTable`, mapping, COW) is architecture-independent.
//! - `mask_gsi`/`unmask_gsi`, the interrupt-controller half of `irq`'s
//!   mask-notify-unmask handshake.
//! - `lapic_id()`, the calling CPU's platform-native identifier, backing
//!   `Sysnum::GetLapicId`.
//! - `resume(task) -> !`, loads `task`'s `SavedState` into the real register
//!   file and drops to user mode. Used once per CPU, at the end of
//!   `startup::start_kernel`; a syscall's return to user mode instead
//!   happens in the raw trap-entry trampoline that calls `syscall_entry`,
//!   which reloads the (possibly different) current task's state itself
//!   after that function returns.
//!
//! `sim` backs the crate's own unit tests, which run on the host and have no
//! real MMU, APIC, or timer to program; it takes priority over the real
//! per-target backends below so `cargo test` never tries to inline-assemble
//! privileged instructions.

cfg_if::cfg_if! {
    // Note: cfg_if! is slightly touchy about ordering and expression
    // complexity; this chain seems to be the best compromise.

    if #[cfg(test)] {
        #[macro_use]
        pub mod sim;
        pub use sim::*;
    } else if #[cfg(target_arch = "x86_64")] {
        #[macro_use]
        pub mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(target_arch = "x86")] {
        #[macro_use]
        pub mod i686;
        pub use i686::*;
    } else if #[cfg(target_arch = "riscv64")] {
        #[macro_use]
        pub mod riscv64;
        pub use riscv64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        #[macro_use]
        pub mod aarch64;
        pub use aarch64::*;
    } else if #[cfg(target_arch = "loongarch64")] {
        #[macro_use]
        pub mod loongarch64;
        pub use loongarch64::*;
    } else {
        compile_error!("support for this architecture not implemented");
    }
}
