// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks, task groups, and the per-CPU scheduler.

use abi::{
    FaultInfo, Generation, PortId, Priority, SchedState, TaskId, TaskState,
    UsageError,
};
use alloc::vec::Vec;

use crate::app::{RegionAttributes, RegionDesc, RegionDescExt, TaskDesc};
use crate::err::UserError;
use crate::mem::PageTableId;
use crate::spinlock::Spinlock;
use crate::time::Timestamp;
use crate::umem::USlice;

/// Internal representation of a task.
///
/// Fields are private to this module so that task-state invariants --
/// keeping `state` and the scheduler's runqueue membership in sync -- stay
/// centralized here.
#[repr(C)] // so the location of `save` is predictable from arch code
#[derive(Debug)]
pub struct Task {
    /// Saved machine state of the user program.
    save: crate::arch::SavedState,
    // NOTE: it is critical that the above field appear first!
    /// Current priority of the task.
    priority: Priority,
    /// State used to make status and scheduling decisions.
    state: TaskState,
    /// Restart count for this task. We increment this whenever we
    /// reinitialize the task. The low bits become the task's generation
    /// number.
    generation: u32,
    /// CPU affinity: 0 = any CPU, N = CPU N-1.
    affinity: u32,
    /// Which CPU currently owns this task's runqueue slot.
    owning_cpu: usize,
    /// Page table this task runs against.
    page_table: PageTableId,

    /// Static table defining this task's memory regions, as loaded from the
    /// boot-time app descriptor. A task may later replace this via
    /// `transfer_region`/`delete_region`, tracked in `extra_regions`.
    region_table: &'static [&'static RegionDesc],
    /// Regions added or removed from `region_table` at runtime.
    extra_regions: Vec<RegionDesc>,

    /// Task groups this task is a member of.
    groups: Vec<TaskGroupId>,

    /// Pointer to the descriptor used to create this task, so it can be
    /// restarted.
    descriptor: &'static TaskDesc,

    /// Whether this slot is occupied by a live process. Tasks flagged
    /// `START_AT_BOOT` in the app descriptor are claimed from the moment
    /// the table is built; the remaining descriptor slots sit unclaimed
    /// until `create_process` picks one for a spawned child, per the
    /// static-configuration design in the crate root doc comment.
    claimed: bool,

    /// Port to notify (with a `Task_Fault` message) if this task faults.
    /// Set by the `SetPort` syscall; `None` means faults are silent except
    /// for the task being stopped.
    fault_port: Option<PortId>,
    /// Short diagnostic label set by `SetTaskName`, surfaced in fault logs.
    label: alloc::vec::Vec<u8>,
    /// Rights attached to the most recent message popped by
    /// `GetFirstMessage`, cached here for a following `AcceptRights` call.
    last_attached: abi::AttachedRights,
    /// User receive buffer (address, length) for a `GetFirstMessage` call
    /// that found its port empty and parked in `BlockedOnPort`. The waking
    /// side needs this to actually deliver the message -- the syscall that
    /// blocked already returned to the scheduler, so there's no longer a
    /// live argument register to read it back from.
    pending_recv: Option<(u64, u64)>,
}

impl Task {
    /// Creates a `Task` in its initial state, filling in fields from
    /// `descriptor`.
    pub fn from_descriptor(
        descriptor: &'static TaskDesc,
        region_table: &'static [&'static RegionDesc],
        page_table: PageTableId,
    ) -> Self {
        let start_at_boot = descriptor
            .flags
            .contains(crate::app::TaskFlags::START_AT_BOOT);
        Task {
            priority: Priority(descriptor.priority as u8),
            state: if start_at_boot {
                TaskState::Healthy(SchedState::Runnable)
            } else {
                TaskState::default()
            },
            claimed: start_at_boot,

            descriptor,
            region_table,
            extra_regions: Vec::new(),
            groups: Vec::new(),

            generation: 0,
            affinity: 0,
            owning_cpu: 0,
            page_table,
            save: crate::arch::SavedState::default(),

            fault_port: None,
            label: alloc::vec::Vec::new(),
            last_attached: [None; abi::MAX_ATTACHED_RIGHTS],
            pending_recv: None,
        }
    }

    /// Tests whether this task has access to `slice` as normal memory with
    /// *all* of the given access attributes, and none of `DEVICE`/`DMA`.
    /// Used to validate kernel accesses into task memory (e.g. syscall
    /// argument buffers).
    ///
    /// Any task can "access" an empty slice; it confers no authority.
    #[must_use]
    pub fn can_access<T>(&self, slice: &USlice<T>, atts: RegionAttributes) -> bool {
        if slice.is_empty() {
            return true;
        }
        let covers = |region: &RegionDesc| {
            region.covers(slice)
                && region.attributes.contains(atts)
                && !region.attributes.contains(RegionAttributes::DEVICE)
                && !region.attributes.contains(RegionAttributes::DMA)
        };
        self.region_table.iter().map(|r| *r).any(covers)
            || self.extra_regions.iter().any(covers)
    }

    #[must_use]
    pub fn try_read<'a, T>(&'a self, slice: &'a USlice<T>) -> Result<&'a [T], FaultInfo>
    where
        T: zerocopy::FromBytes,
    {
        if self.can_access(slice, RegionAttributes::READ) {
            unsafe { Ok(slice.assume_readable()) }
        } else {
            Err(FaultInfo::MemoryAccess {
                address: Some(slice.base_addr() as u64),
                source: abi::FaultSource::Kernel,
            })
        }
    }

    #[must_use]
    pub fn try_write<'a, T>(
        &'a mut self,
        slice: &'a mut USlice<T>,
    ) -> Result<&'a mut [T], FaultInfo>
    where
        T: zerocopy::FromBytes,
    {
        if self.can_access(slice, RegionAttributes::WRITE) {
            unsafe { Ok(slice.assume_writable()) }
        } else {
            Err(FaultInfo::MemoryAccess {
                address: Some(slice.base_addr() as u64),
                source: abi::FaultSource::Kernel,
            })
        }
    }

    /// Checks if this task is in a potentially schedulable state.
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Healthy(SchedState::Runnable)
    }

    /// Moves this task into `BlockedOnPort(port)`, remembering the receive
    /// buffer `get_first_message` was called with so the waking side can
    /// deliver into it directly -- see `pending_recv`.
    pub fn block_on_port(&mut self, port: PortId, buf_addr: u64, buf_len: u64) {
        self.state = TaskState::Healthy(SchedState::BlockedOnPort(port));
        self.pending_recv = Some((buf_addr, buf_len));
    }

    /// The receive buffer passed to the `get_first_message` call that parked
    /// this task, if it is currently `BlockedOnPort`.
    pub fn pending_recv(&self) -> Option<(u64, u64)> {
        self.pending_recv
    }

    /// Clears the remembered receive buffer once a blocked `get_first_message`
    /// has been delivered (or abandoned, e.g. by `kill`).
    pub fn clear_pending_recv(&mut self) {
        self.pending_recv = None;
    }

    /// Reports whether this task is currently blocked waiting for a message
    /// on exactly `port`. Doesn't change state -- callers that find this
    /// `true` must still deliver the message and call `set_healthy_state`
    /// (or the equivalent) themselves, since delivery can fail (e.g. a
    /// memory fault copying into the receive buffer) and must not silently
    /// wake the task without having filled its buffer.
    #[must_use]
    pub fn is_blocked_on(&self, port: PortId) -> bool {
        self.state.is_blocked_on_port(port)
    }

    /// Rewrites this task's state back to its initial form, to effect a
    /// task restart. Does not reinitialize application memory; the memory
    /// object backing this task's regions is reloaded by the caller before
    /// `start_process`.
    pub fn reinitialize(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.state = TaskState::default();
        self.extra_regions.clear();
        self.fault_port = None;
        self.last_attached = [None; abi::MAX_ATTACHED_RIGHTS];
        self.pending_recv = None;
        crate::arch::reinitialize(self);
    }

    pub fn descriptor(&self) -> &'static TaskDesc {
        self.descriptor
    }

    pub fn region_table(&self) -> &'static [&'static RegionDesc] {
        self.region_table
    }

    pub fn page_table(&self) -> PageTableId {
        self.page_table
    }

    pub fn affinity(&self) -> u32 {
        self.affinity
    }

    pub fn set_affinity(&mut self, affinity: u32) {
        self.affinity = affinity;
    }

    pub fn owning_cpu(&self) -> usize {
        self.owning_cpu
    }

    pub fn set_owning_cpu(&mut self, cpu: usize) {
        self.owning_cpu = cpu;
    }

    pub fn groups(&self) -> &[TaskGroupId] {
        &self.groups
    }

    pub fn join_group(&mut self, group: TaskGroupId) {
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }

    pub fn leave_group(&mut self, group: TaskGroupId) {
        self.groups.retain(|g| *g != group);
    }

    pub fn generation(&self) -> Generation {
        const MASK: u8 = ((1u32 << (16 - TaskId::INDEX_BITS)) - 1) as u8;
        Generation::from(self.generation as u8 & MASK)
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Alters this task's state from one healthy state to another.
    ///
    /// To deliver a fault, use `force_fault` instead. The only supported
    /// way out of a fault state is `reinitialize`.
    ///
    /// # Panics
    ///
    /// If the task is currently faulted.
    pub fn set_healthy_state(&mut self, s: SchedState) {
        let last = core::mem::replace(&mut self.state, s.into());
        if let TaskState::Faulted { .. } = last {
            panic!("set_healthy_state on a faulted task");
        }
    }

    pub fn save(&self) -> &crate::arch::SavedState {
        &self.save
    }

    pub fn save_mut(&mut self) -> &mut crate::arch::SavedState {
        &mut self.save
    }

    /// Whether this slot currently backs a live process.
    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// Claims this slot for a newly spawned process. The caller is
    /// responsible for having picked an unclaimed, non-`START_AT_BOOT` slot
    /// via `find_unclaimed_slot`.
    pub fn claim(&mut self) {
        self.claimed = true;
    }

    /// Releases this slot back to the spawn pool. A `START_AT_BOOT` task is
    /// never released; it restarts in place via `reinitialize` instead.
    pub fn release(&mut self) {
        self.claimed = false;
    }

    /// Adds a dynamically mapped region to this task's access table, on top
    /// of the static `region_table` loaded from the app descriptor.
    pub fn add_extra_region(&mut self, region: RegionDesc) {
        self.extra_regions.push(region);
    }

    /// Drops the extra region whose base address is `base`. Returns `true`
    /// if one was found and removed.
    pub fn remove_extra_region(&mut self, base: u64) -> bool {
        let before = self.extra_regions.len();
        self.extra_regions.retain(|r| r.base != base);
        self.extra_regions.len() != before
    }

    /// Rewrites the attributes of the extra region based at `base`. Returns
    /// `false` if no such region exists.
    pub fn set_extra_region_attributes(
        &mut self,
        base: u64,
        attrs: RegionAttributes,
    ) -> bool {
        match self.extra_regions.iter_mut().find(|r| r.base == base) {
            Some(r) => {
                r.attributes = attrs;
                true
            }
            None => false,
        }
    }

    pub fn fault_port(&self) -> Option<PortId> {
        self.fault_port
    }

    pub fn set_fault_port(&mut self, port: Option<PortId>) {
        self.fault_port = port;
    }

    pub fn label(&self) -> &[u8] {
        &self.label
    }

    pub fn set_label(&mut self, label: alloc::vec::Vec<u8>) {
        self.label = label;
    }

    pub fn last_attached(&self) -> abi::AttachedRights {
        self.last_attached
    }

    pub fn set_last_attached(&mut self, attached: abi::AttachedRights) {
        self.last_attached = attached;
    }

    /// Wakes a task blocked in `get_port_by_name`, making it runnable.
    /// Returns `true` if the task actually changed state.
    #[must_use]
    pub fn wake_if_blocked_on_named_port(&mut self) -> bool {
        if self.state.is_blocked_on_named_port() {
            self.state = TaskState::Healthy(SchedState::Runnable);
            true
        } else {
            false
        }
    }
}

/// Names a task group. Allocated monotonically, like `PortId`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskGroupId(pub u64);

/// A named collection of tasks used for namespace scoping and bulk
/// notification, per spec §3/§4.2.
#[derive(Debug, Default)]
pub struct TaskGroup {
    pub members: Vec<TaskId>,
    /// Port + notification mask pairs to publish `Kernel_Group_Notifier`
    /// events to.
    pub notifiers: Vec<(PortId, u32)>,
}

impl TaskGroup {
    pub fn add_member(&mut self, id: TaskId) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    pub fn remove_member(&mut self, id: TaskId) {
        self.members.retain(|m| *m != id);
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.members.contains(&id)
    }
}

/// Interface implemented by the `arch::SavedState` type, giving
/// architecture-independent access to the syscall register file.
///
/// Architectures implement the `argN`/`retN` functions and
/// `syscall_descriptor`; everything else in `syscalls.rs` is written
/// against this trait.
pub trait ArchState: Default {
    fn stack_pointer(&self) -> u64;

    fn arg0(&self) -> u64;
    fn arg1(&self) -> u64;
    fn arg2(&self) -> u64;
    fn arg3(&self) -> u64;
    fn arg4(&self) -> u64;
    fn arg5(&self) -> u64;
    fn arg6(&self) -> u64;

    /// Reads the syscall descriptor (number).
    fn syscall_descriptor(&self) -> u32;

    fn ret0(&mut self, _: u64);
    fn ret1(&mut self, _: u64);
    fn ret2(&mut self, _: u64);
    fn ret3(&mut self, _: u64);
    fn ret4(&mut self, _: u64);
    fn ret5(&mut self, _: u64);

    /// Sets `result`/`value` the way every syscall does on return:
    /// `result == 0` on success, else a negated POSIX errno.
    fn set_result(&mut self, result: i32, value: u64) {
        self.ret0(result as i64 as u64);
        self.ret1(value);
    }
}

/// Return value for operations that can have scheduling implications.
/// Marked `must_use` because forgetting to act on it would silently starve
/// a newly-runnable task.
#[derive(Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextTask {
    /// Fine to keep running whatever task we were just running.
    Same,
    /// We need to switch tasks, but this routine hasn't concluded which one
    /// -- the scheduler needs to figure it out.
    Other,
    /// We need to switch tasks, and we already know which one (an
    /// optimization available in certain wake-on-same-CPU cases).
    Specific(usize),
}

impl NextTask {
    pub fn combine(self, other: Self) -> Self {
        use NextTask::*;
        match (self, other) {
            (x, y) if x == y => x,
            (Specific(_), Specific(_)) => Other,
            (Specific(x), _) | (_, Specific(x)) => Specific(x),
            (Other, _) | (_, Other) => Other,
            (Same, Same) => Same,
        }
    }
}

/// Checks a user-provided `TaskId` for validity against `table`.
///
/// On success, returns an index usable to dereference `table` without
/// panicking.
pub fn check_task_id_against_table(
    table: &[Task],
    id: TaskId,
) -> Result<usize, UserError> {
    if id.index() >= table.len() {
        return Err(FaultInfo::SyscallUsage(UsageError::TaskOutOfRange).into());
    }

    let table_generation = table[id.index()].generation();
    if table_generation != id.generation() {
        return Err(UserError::Recoverable(
            abi::ErrorKind::NotFound,
            NextTask::Same,
        ));
    }

    Ok(id.index())
}

/// Selects a new task to run on this CPU after `previous`. Tries to be
/// fair, within priority order.
///
/// # Panics
///
/// If no task owned by this CPU is runnable.
pub fn select(previous: usize, tasks: &[Task], cpu: usize) -> usize {
    priority_scan(previous, tasks, |t| {
        t.owning_cpu() == cpu && t.is_runnable()
    })
    .expect("no tasks runnable on this cpu")
}

/// Scans `tasks` for the next task, after `previous`, that satisfies
/// `pred`. If more than one satisfies `pred`, returns the most important
/// one; ties go to the first one after `previous`, mod `tasks.len()`.
///
/// # Panics
///
/// If `previous` is not a valid index in `tasks`.
pub fn priority_scan(
    previous: usize,
    tasks: &[Task],
    pred: impl Fn(&Task) -> bool,
) -> Option<usize> {
    assert!(previous < tasks.len());
    let search_order = (previous + 1..tasks.len()).chain(0..previous + 1);
    let mut choice = None;
    for i in search_order {
        if !pred(&tasks[i]) {
            continue;
        }

        if let Some((_, prio)) = choice {
            if !tasks[i].priority.is_more_important_than(prio) {
                continue;
            }
        }

        choice = Some((i, tasks[i].priority));
    }

    choice.map(|(idx, _)| idx)
}

/// Puts a task into a forced fault condition.
///
/// The task will not be scheduled again until the fault is cleared by an
/// explicit restart. If the task was already faulted, the earlier fault
/// information is replaced (double faults are expected to be rare).
///
/// Returns a `NextTask` on the assumption that, if you're faulting tasks,
/// one of them is probably the current one.
pub fn force_fault(tasks: &mut [Task], index: usize, fault: FaultInfo) -> NextTask {
    let task = &mut tasks[index];
    task.state = match task.state {
        TaskState::Healthy(sched) => TaskState::Faulted {
            original_state: sched,
            fault,
        },
        TaskState::Faulted { original_state, .. } => TaskState::Faulted {
            fault,
            original_state,
        },
    };
    NextTask::Other
}

/// Finds the first descriptor slot that is not `START_AT_BOOT` and is not
/// currently claimed by a live process. Used by `create_process` to pick a
/// home for a spawned task; the static table itself never grows.
pub fn find_unclaimed_slot(tasks: &[Task]) -> Option<usize> {
    tasks
        .iter()
        .position(|t| !t.is_claimed() && !t.descriptor().flags.contains(crate::app::TaskFlags::START_AT_BOOT))
}

/// Produces a current `TaskId` (i.e. one with the correct generation) for
/// `tasks[index]`.
pub fn current_id(tasks: &[Task], index: usize) -> TaskId {
    TaskId::for_index_and_gen(index, tasks[index].generation())
}

/// The global task table, populated once at boot from the app descriptor.
/// Guarded the same way `port::PORTS`/`mem::MEM`/`timer::TIMERS` are.
static TASKS: Spinlock<Vec<Task>> = Spinlock::new(Vec::new());

/// The task index each CPU is currently running, indexed by CPU number.
static CURRENT: Spinlock<Vec<usize>> = Spinlock::new(Vec::new());

/// Installs the boot-time task table. Must be called exactly once, before
/// any CPU starts scheduling.
pub fn init_tasks(tasks: Vec<Task>) {
    *TASKS.lock() = tasks;
}

/// Runs `f` with exclusive access to the task table.
pub fn with_tasks<R>(f: impl FnOnce(&mut [Task]) -> R) -> R {
    f(&mut TASKS.lock())
}

/// Returns a raw pointer to `tasks[index]`, valid for the rest of the
/// program. Sound because `init_tasks` builds the table's backing
/// allocation exactly once at boot and it's never reallocated afterward
/// (the table never grows; `create_process` only ever claims an existing
/// slot). Used by `startup` and the arch-specific trap entry to hand a
/// task to `arch::resume` without holding `TASKS` locked across the jump
/// to user mode, which would wedge every other CPU out of the table
/// forever.
pub fn task_ptr(index: usize) -> *const Task {
    TASKS.lock().as_ptr().wrapping_add(index)
}

/// Reserves one `CURRENT` slot per CPU. Must be called exactly once, before
/// any CPU starts scheduling, after the CPU count is known from the
/// bootloader hand-off.
pub fn init_current(num_cpus: usize) {
    CURRENT.lock().resize(num_cpus, 0);
}

/// Records that CPU `cpu` is now running `tasks[idx]`.
pub fn set_current(cpu: usize, idx: usize) {
    CURRENT.lock()[cpu] = idx;
}

/// Returns the task index CPU `cpu` is currently running.
pub fn current(cpu: usize) -> usize {
    CURRENT.lock()[cpu]
}

struct GroupState {
    next_id: u64,
    groups: Vec<(TaskGroupId, TaskGroup)>,
}

/// The global task group table. Groups are never destroyed individually;
/// they live for the duration of the boot, same as ports.
static GROUPS: Spinlock<GroupState> = Spinlock::new(GroupState {
    next_id: 1,
    groups: Vec::new(),
});

/// Allocates a fresh, empty task group.
pub fn create_task_group() -> TaskGroupId {
    let mut g = GROUPS.lock();
    let id = TaskGroupId(g.next_id);
    g.next_id += 1;
    g.groups.push((id, TaskGroup::default()));
    id
}

/// Runs `f` with exclusive access to the group named `id`, if it exists.
pub fn with_group_mut<R>(
    id: TaskGroupId,
    f: impl FnOnce(&mut TaskGroup) -> R,
) -> Option<R> {
    let mut g = GROUPS.lock();
    g.groups.iter_mut().find(|(i, _)| *i == id).map(|(_, grp)| f(grp))
}
