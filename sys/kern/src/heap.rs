// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel heap: spec §5, "a single freelist guarded by one lock".
//!
//! `mem`, `port`, `timer`, and `irq` all reach for `alloc` (`Vec`,
//! `VecDeque`, `BTreeMap`, `BinaryHeap`) for their bookkeeping. This is the
//! `#[global_allocator]` that backs them, carved out of a static region
//! reserved by the linker script rather than discovered at boot, since the
//! kernel's own data structures need to start allocating before any
//! platform memory map has been walked.

use core::sync::atomic::{AtomicBool, Ordering};

use linked_list_allocator::LockedHeap;

/// Backing store for the kernel heap. Sized generously relative to the
/// kernel's own bookkeeping (task/port/timer tables); application memory is
/// never drawn from here, only from frames handed out by `mem`.
const HEAP_SIZE: usize = 2 * 1024 * 1024;

#[repr(align(16))]
struct HeapStorage([u8; HEAP_SIZE]);

static mut HEAP_STORAGE: HeapStorage = HeapStorage([0; HEAP_SIZE]);

#[cfg_attr(not(test), global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global allocator. Must be called exactly once, before
/// any code reaches for `alloc`, and before interrupts are enabled.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }
    // Safety: called once, before any other CPU is running and before the
    // allocator is used, so no concurrent access to `HEAP_STORAGE` or the
    // allocator's internal state is possible yet.
    unsafe {
        let base = core::ptr::addr_of_mut!(HEAP_STORAGE.0) as *mut u8;
        ALLOCATOR.lock().init(base, HEAP_SIZE);
    }
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    crate::fail::die(format_args!("kernel heap exhausted: {layout:?}"))
}
