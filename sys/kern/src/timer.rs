// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-CPU timer core: spec §4.3.
//!
//! Each CPU owns one min-heap of pending deadlines. `RequestTimer` pushes an
//! entry onto the calling CPU's heap; the CPU's timer interrupt handler
//! calls `poll_expired` to pop everything that's come due and turn it into
//! `Timer_Reply` messages on the requesting task's port.

use abi::{ErrorKind, MessageKind, PortId, TimerReply};
use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cmp::Reverse;
use zerocopy::IntoBytes;

use crate::spinlock::Spinlock;
use crate::time::Timestamp;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerId(pub u64);

struct Entry {
    deadline: Timestamp,
    id: TimerId,
    port: PortId,
    extra: [u32; 3],
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.deadline, self.id.0) == (other.deadline, other.id.0)
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    /// `id` is allocated in strict insertion order per CPU (see
    /// `request_timer`'s `next_id`), so keying on `(deadline, id)` makes two
    /// equal-deadline timers pop id-ascending -- i.e. insertion order, per
    /// spec §5 "ties are broken by insertion order." `BinaryHeap` gives no
    /// such guarantee on `deadline` alone.
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.deadline, self.id.0).cmp(&(other.deadline, other.id.0))
    }
}

#[derive(Default)]
struct CpuTimers {
    next_id: u64,
    heap: BinaryHeap<Reverse<Entry>>,
}

struct TimerState {
    per_cpu: Vec<CpuTimers>,
}

static TIMERS: Spinlock<TimerState> = Spinlock::new(TimerState {
    per_cpu: Vec::new(),
});

/// Allocates the per-CPU heaps. Called once at startup once the CPU count
/// is known.
pub fn init(num_cpus: usize) {
    let mut t = TIMERS.lock();
    t.per_cpu.clear();
    t.per_cpu.resize_with(num_cpus, CpuTimers::default);
}

/// Schedules a timer on `cpu`'s heap, firing no earlier than `deadline`. On
/// expiry, a `Timer_Reply { id, extra }` message is sent to `port`.
pub fn request_timer(
    cpu: usize,
    deadline: Timestamp,
    port: PortId,
    extra: [u32; 3],
) -> Result<TimerId, ErrorKind> {
    let mut t = TIMERS.lock();
    let cpu_timers = t.per_cpu.get_mut(cpu).ok_or(ErrorKind::NotFound)?;
    let id = TimerId(cpu_timers.next_id);
    cpu_timers.next_id += 1;
    cpu_timers.heap.push(Reverse(Entry {
        deadline,
        id,
        port,
        extra,
    }));
    Ok(id)
}

/// Removes a still-pending timer before it fires. Returns `false` if it had
/// already fired or never existed (cheap to call speculatively; this
/// kernel does not track cancelled-but-not-yet-popped ids beyond removal).
pub fn cancel_timer(cpu: usize, id: TimerId) -> Result<bool, ErrorKind> {
    let mut t = TIMERS.lock();
    let cpu_timers = t.per_cpu.get_mut(cpu).ok_or(ErrorKind::NotFound)?;
    let before = cpu_timers.heap.len();
    cpu_timers.heap.retain(|Reverse(e)| e.id != id);
    Ok(cpu_timers.heap.len() != before)
}

/// Pops every entry on `cpu`'s heap whose deadline has passed, and enqueues
/// its `Timer_Reply` message. Called from the per-CPU timer interrupt
/// handler; never blocks.
pub fn poll_expired(cpu: usize, now: Timestamp) {
    let due = {
        let mut t = TIMERS.lock();
        let Some(cpu_timers) = t.per_cpu.get_mut(cpu) else {
            return;
        };
        let mut due = Vec::new();
        while let Some(Reverse(top)) = cpu_timers.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Reverse(entry) = cpu_timers.heap.pop().unwrap();
            due.push(entry);
        }
        due
    };

    for entry in due {
        let reply = TimerReply {
            kind: MessageKind::TIMER_REPLY,
            id: entry.id.0 as u32,
            extra: entry.extra,
        };
        let _ = crate::port::send_from_kernel(entry.port, reply.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_pop_in_deadline_order() {
        init(1);
        let port = PortId(1);
        request_timer(0, Timestamp::from(10), port, [1, 0, 0]).unwrap();
        request_timer(0, Timestamp::from(5), port, [2, 0, 0]).unwrap();
        request_timer(0, Timestamp::from(20), port, [3, 0, 0]).unwrap();

        // Nothing due yet.
        poll_expired(0, Timestamp::from(0));

        // Both of the first two are now due; the third isn't.
        poll_expired(0, Timestamp::from(10));

        let mut t = TIMERS.lock();
        assert_eq!(t.per_cpu[0].heap.len(), 1);
    }

    #[test]
    fn equal_deadline_timers_pop_in_insertion_order() {
        init(1);
        let port = PortId(1);
        let first = request_timer(0, Timestamp::from(10), port, [1, 0, 0]).unwrap();
        let second = request_timer(0, Timestamp::from(10), port, [2, 0, 0]).unwrap();
        let third = request_timer(0, Timestamp::from(10), port, [3, 0, 0]).unwrap();

        let mut t = TIMERS.lock();
        let cpu_timers = &mut t.per_cpu[0];
        let popped: Vec<_> = core::iter::from_fn(|| cpu_timers.heap.pop())
            .map(|Reverse(e)| e.id)
            .collect();
        assert_eq!(popped, alloc::vec![first, second, third]);
    }

    #[test]
    fn cancel_removes_pending_timer() {
        init(1);
        let id = request_timer(0, Timestamp::from(100), PortId(1), [0, 0, 0])
            .unwrap();
        assert!(cancel_timer(0, id).unwrap());
        assert!(!cancel_timer(0, id).unwrap());
    }
}
