// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and userspace.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Magic number at the start of an application descriptor (`App`), to
/// reassure the kernel that it is not reading uninitialized memory.
pub const CURRENT_APP_MAGIC: u32 = 0x1DE_fa7a1;

/// Number of region slots in a `TaskDesc` record. May be less than the
/// architecture's number of mappable regions to improve context-switch
/// performance. (Changing this alters the ABI.)
pub const REGIONS_PER_TASK: usize = 8;

/// Maximum number of rights that may be attached to a single message.
pub const MAX_ATTACHED_RIGHTS: usize = 4;

pub const TASK_ID_INDEX_BITS: usize = 10;

/// Names a particular incarnation of a task.
///
/// A `TaskId` combines two fields, a task index (which can be predicted at
/// compile time) and a task generation number. The generation number begins
/// counting at zero and wraps on overflow. Critically, the generation number
/// of a task is incremented when it is restarted. Attempts to correspond
/// with a task using an outdated generation number will return `DEAD`. This
/// helps provide assurance that your peer has not lost its memory between
/// steps of a multi-step IPC sequence.
///
/// If the IPC can be retried against a fresh instance of the peer, it's
/// reasonable to simply increment the generation number and try again, using
/// `TaskId::next_generation`.
///
/// The task index is in the lower `TaskId::INDEX_BITS` bits, while the
/// generation is in the remaining top bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskId(pub u16);

impl TaskId {
    /// The all-ones `TaskId` is reserved; no task ever has this id.
    pub const KERNEL: Self = Self(!0);

    /// Reserved TaskId for an unbound userlib::task_slot!()
    pub const UNBOUND: Self = Self(Self::INDEX_MASK - 1);

    /// Number of bits in a `TaskId` used to represent task index, rather
    /// than generation number. This must currently be 15 or smaller.
    pub const INDEX_BITS: u32 = 10;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u16 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `TaskId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId(
            (index as u16 & Self::INDEX_MASK)
                | (gen.0 as u16) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        usize::from(self.0 & Self::INDEX_MASK)
    }

    /// Extracts the generation part of this ID.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u8)
    }

    pub fn next_generation(self) -> Self {
        Self::for_index_and_gen(self.index(), self.generation().next())
    }
}

/// Type used to track generation numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(u8);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        const MASK: u16 = 0xFFFF << TaskId::INDEX_BITS >> TaskId::INDEX_BITS;
        Generation(self.0.wrapping_add(1) & MASK as u8)
    }
}

impl From<u8> for Generation {
    fn from(x: u8) -> Self {
        Self(x)
    }
}

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means numerically
/// greater / less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Default,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Application header, read by the kernel to load the application descriptor
/// tables produced by `build/kconfig`.
///
/// One copy of this appears immediately before the `RegionDesc`/`TaskDesc`/
/// `Interrupt` records it counts.
#[derive(Clone, Debug, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct App {
    /// Reassures the kernel it is dealing with this kind of descriptor.
    /// Should have the value `CURRENT_APP_MAGIC`.
    pub magic: u32,
    /// Number of tasks. This many `TaskDesc` records immediately follow the
    /// `RegionDesc` records that follow this header.
    pub task_count: u32,
    /// Number of memory regions in the address space layout. This many
    /// `RegionDesc` records immediately follow this header.
    pub region_count: u32,
    /// Number of interrupt response records that follow the `TaskDesc`
    /// records.
    pub irq_count: u32,
    /// Bitmask to post to task 0 when any task faults.
    pub fault_notification: u32,

    /// Reserved expansion space; pads this structure to 32 bytes. Adjust
    /// when fields are added above.
    pub zeroed_expansion_space: [u8; 32 - (5 * 4)],
}

/// Record describing a single task.
#[derive(Clone, Debug, FromBytes, KnownLayout, Immutable, Serialize, Deserialize)]
#[repr(C)]
pub struct TaskDesc {
    /// Identifies memory regions this task has access to, by index in the
    /// `RegionDesc` table. If the task needs fewer than `REGIONS_PER_TASK`
    /// regions, it should use remaining entries to name a region that
    /// confers no access; by convention, this is usually entry 0.
    pub regions: [u8; REGIONS_PER_TASK],
    /// Address of the task's entry point. Must fall within one of the
    /// task's memory regions (the kernel *will* check this).
    pub entry_point: u64,
    /// Address of the task's initial stack pointer, to be loaded at
    /// (re)start. Must point into or *just past* one of the task's memory
    /// regions (the kernel *will* check this).
    pub initial_stack: u64,
    /// Initial priority of this task.
    pub priority: u32,
    /// Collection of boolean flags controlling task behavior.
    pub flags: TaskFlags,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, FromBytes, KnownLayout, Immutable, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct TaskFlags: u32 {
        const START_AT_BOOT = 1 << 0;
        const RESERVED = !1;
    }
}

/// Description of one memory region within a task's address space.
///
/// A memory region can be shared by multiple tasks; regions can overlap to
/// provide, e.g., one read-only and one read-write view onto the same
/// backing.
#[derive(Clone, Debug, FromBytes, KnownLayout, Immutable, Serialize, Deserialize)]
#[repr(C)]
pub struct RegionDesc {
    /// Virtual base address of the region. Must meet the target
    /// architecture's page alignment requirements.
    pub base: u64,
    /// Size of the region, in bytes. Must be a whole number of pages.
    pub size: u64,
    /// Flags describing what can be done with this region.
    pub attributes: RegionAttributes,
    /// Reserved word, must be zero.
    pub reserved_zero: u32,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, FromBytes, KnownLayout, Immutable, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct RegionAttributes: u32 {
        /// Region can be read by tasks that include it.
        const READ = 1 << 0;
        /// Region can be written by tasks that include it.
        const WRITE = 1 << 1;
        /// Region can contain executable code for tasks that include it.
        const EXECUTE = 1 << 2;
        /// Region contains memory-mapped registers. Discourages the kernel
        /// from treating it as cacheable or using bulk-copy instructions.
        const DEVICE = 1 << 3;
        /// Region can be used for DMA or communication with other
        /// processors. Heavily restricts caching and will hurt performance
        /// if overused.
        ///
        /// Ignored for `DEVICE` memory, which is already not cached.
        const DMA = 1 << 4;

        const RESERVED = !((1 << 5) - 1);
    }
}

/// A GSI (global system interrupt), the architecture-independent interrupt
/// index used throughout the dispatcher.
#[derive(
    Copy,
    Clone,
    Debug,
    FromBytes,
    KnownLayout,
    Immutable,
    Serialize,
    Deserialize,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
)]
#[repr(transparent)]
pub struct Gsi(pub u32);

/// Struct naming the task that owns the default (boot-time) binding for a
/// GSI, and the notification mask it expects.
#[derive(
    Copy,
    Clone,
    Debug,
    FromBytes,
    KnownLayout,
    Immutable,
    Serialize,
    Deserialize,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
)]
pub struct InterruptOwner {
    /// Which task to notify, by index.
    pub task: u32,
    /// Which notification bits to set.
    pub notification: u32,
}

/// Description of one boot-time interrupt binding, feeding
/// `PMOS_TASK_IRQ_LOOKUP`. User-space may rebind or add GSIs at runtime
/// through `irq::Dispatcher`; this table only supplies the default.
#[derive(Clone, Debug, FromBytes, KnownLayout, Immutable, Serialize, Deserialize)]
pub struct Interrupt {
    /// Which GSI is being hooked.
    pub gsi: Gsi,
    /// The default owner of this interrupt.
    pub owner: InterruptOwner,
}

pub const FIRST_DEAD_CODE: u32 = 0xffff_ff00;

/// Response code returned by the kernel if the peer died or was restarted.
///
/// This always has the top 24 bits set to 1, with the `generation` in the
/// bottom 8 bits.
pub const fn dead_response_code(new_generation: Generation) -> u32 {
    FIRST_DEAD_CODE | new_generation.0 as u32
}

/// Utility for checking whether a code indicates that the peer was
/// restarted, and extracting the generation if it is.
pub const fn extract_new_generation(code: u32) -> Option<Generation> {
    if (code & FIRST_DEAD_CODE) == FIRST_DEAD_CODE {
        Some(Generation(code as u8))
    } else {
        None
    }
}

/// State used to make scheduling decisions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum TaskState {
    /// Task is healthy and can be scheduled subject to the `SchedState`
    /// requirements.
    Healthy(SchedState),
    /// Task has been stopped by a fault and must not be scheduled without
    /// intervention.
    Faulted {
        /// Information about the fault.
        fault: FaultInfo,
        /// Record of the previous healthy state at the time the fault was
        /// taken.
        original_state: SchedState,
    },
}

impl TaskState {
    /// Checks if a task in this state is blocked waiting for a message on
    /// `port`.
    pub fn is_blocked_on_port(&self, port: PortId) -> bool {
        matches!(self, TaskState::Healthy(SchedState::BlockedOnPort(p)) if *p == port)
    }

    /// Checks if a task in this state can be woken by a named-port
    /// resolution.
    pub fn is_blocked_on_named_port(&self) -> bool {
        matches!(self, TaskState::Healthy(SchedState::BlockedOnNamedPort))
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Healthy(SchedState::Paused)
    }
}

/// Scheduler parameters for a healthy task.
///
/// Unlike a rendezvous-IPC kernel, pmOS delivery is asynchronous: a task
/// never blocks waiting to *send* (the message is queued), only waiting to
/// *receive* (the queue is empty) or on a timer/named-port resolution.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum SchedState {
    /// This task could be scheduled on its CPU.
    Runnable,
    /// This task is blocked waiting for a message to arrive on the named
    /// port.
    BlockedOnPort(PortId),
    /// This task is blocked waiting for one of its requested timers to
    /// fire.
    BlockedOnTimer,
    /// This task is blocked waiting for a named-port lookup to resolve.
    BlockedOnNamedPort,
    /// This task is paused by an explicit `pause` syscall (or has not yet
    /// been started) and is ignored for scheduling purposes.
    Paused,
}

impl From<SchedState> for TaskState {
    fn from(s: SchedState) -> Self {
        Self::Healthy(s)
    }
}

/// A record describing a fault taken by a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum FaultInfo {
    /// The task has violated memory access rules. This may have come from a
    /// page-fault while executing the task (`source` `User`), from
    /// overflowing a stack, or from checks on kernel syscall arguments
    /// (`source` `Kernel`).
    MemoryAccess {
        /// Problematic address that the task accessed, or asked the kernel
        /// to access. `None` when the architecture's fault reporting
        /// doesn't provide a precise address.
        address: Option<u64>,
        /// Origin of the fault.
        source: FaultSource,
    },
    /// A task has overflowed its stack. We can always determine the bad
    /// stack address, but not necessarily the faulting PC.
    StackOverflow { address: u64 },
    /// A task has induced a bus error (e.g. access to an unbacked physical
    /// address through a `DEVICE` region).
    BusError {
        address: Option<u64>,
        source: FaultSource,
    },
    /// Divide-by-zero.
    DivideByZero,
    /// Attempt to execute non-executable memory.
    IllegalText,
    /// Execution of an illegal instruction.
    IllegalInstruction,
    /// Other invalid operation, with an architecture-specific 64-bit code,
    /// for faults that aren't general across architectures or don't carry
    /// enough diagnostic information to name more specifically.
    InvalidOperation(u64),
    /// Arguments passed to a syscall were invalid.
    SyscallUsage(UsageError),
    /// A task has explicitly aborted itself with a panic.
    Panic,
    /// A fault has been injected into this task by another task.
    Injected(TaskId),
    /// A fault has been delivered by a server task via `reply_fault`.
    FromServer(TaskId, ReplyFaultReason),
}

impl From<UsageError> for FaultInfo {
    fn from(e: UsageError) -> Self {
        Self::SyscallUsage(e)
    }
}

/// A kernel-defined fault, arising from how a user task behaved.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum UsageError {
    /// A program used an undefined syscall number.
    BadSyscallNumber,
    /// A program specified a slice as a syscall argument, but the slice is
    /// patently invalid: it is either unaligned for its type, or expressed
    /// such that it would wrap around the end of the address space. Neither
    /// condition is ever legal, so this represents a malfunction in the
    /// caller.
    InvalidSlice,
    /// A program named a task id that will never be valid, as it's out of
    /// range.
    TaskOutOfRange,
    /// A program named a valid task id, but attempted to perform an
    /// operation on it that is illegal or otherwise forbidden.
    IllegalTask,
    /// A program named a port, right, memory-object, or region id that is
    /// out of range for its namespace.
    IdOutOfRange,
    OffsetOutOfRange,
    NoSuchGsi,
    BadKernelMessage,
    BadReplyFaultReason,
}

/// Origin of a fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum FaultSource {
    /// User code did something that was intercepted by the processor.
    User,
    /// User code asked the kernel to do something bad on its behalf.
    Kernel,
}

/// Reasons a server might cite when using the `reply_fault` syscall.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum ReplyFaultReason {
    /// The message named an operation number unknown to the server --
    /// almost certainly indicating the client intended a different kind of
    /// server.
    UndefinedOperation = 0,
    /// The message sent by the client had the wrong size to even attempt
    /// parsing.
    BadMessageSize = 1,
    /// The server attempted to parse the message and couldn't.
    BadMessageContents = 2,
    /// The client did not attach the rights required for the operation, or
    /// attached them with the wrong kind.
    BadRights = 3,
    /// The client did not provide a reply buffer large enough to receive
    /// the server's reply.
    ReplyBufferTooSmall = 4,
    /// Application-defined: the client attempted to operate on a resource
    /// not available to it due to access control.
    AccessViolation = 5,
}

impl core::convert::TryFrom<u32> for ReplyFaultReason {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::UndefinedOperation),
            1 => Ok(Self::BadMessageSize),
            2 => Ok(Self::BadMessageContents),
            3 => Ok(Self::BadRights),
            4 => Ok(Self::ReplyBufferTooSmall),
            5 => Ok(Self::AccessViolation),
            _ => Err(()),
        }
    }
}

pub mod bootinfo;
pub mod error;
pub mod ipc;
pub mod sysnum;

pub use error::ErrorKind;
pub use ipc::{
    AttachedRights, KernelInterrupt, MessageInfo, MessageKind,
    NamedPortNotification, PortId, RightId, RightKind, TaskFault, TimerReply,
};
pub use sysnum::Sysnum;
