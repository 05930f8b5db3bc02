// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Port, right, and message envelope types shared between the kernel and
//! userspace.

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{TaskId, MAX_ATTACHED_RIGHTS};

/// Names a kernel-owned mailbox. Port ids are allocated monotonically for
/// the life of a boot and are never reused.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct PortId(pub u64);

impl PortId {
    /// No port ever has this id; used as a sentinel in descriptor tables
    /// before a port is created.
    pub const NONE: Self = Self(0);
}

/// Names a right within a task-group's rights namespace. Right ids are
/// local to their namespace, unlike `PortId`, which is global.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct RightId(pub u32);

impl RightId {
    /// Sent by the kernel itself (e.g. `Kernel_Interrupt`, `Timer_Reply`);
    /// never a valid caller-namespace id.
    pub const KERNEL: Self = Self(0);
}

/// The two flavors of right a task may hold over a port.
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
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum RightKind {
    /// May be duplicated and used repeatedly to send messages.
    SendMany = 0,
    /// Single-use; consumed the moment a message is successfully enqueued
    /// through it.
    SendOnce = 1,
}

/// Fixed-capacity set of rights attached to one message, per spec: up to
/// four rights ride along with a single send, baked into the wire ABI as a
/// fixed-size array rather than a dynamically sized one.
pub type AttachedRights = [Option<RightId>; MAX_ATTACHED_RIGHTS];

/// Side-band fields the kernel reports for a queued message, independent of
/// the message's own payload framing.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Task that called `send`.
    pub sender: TaskId,
    /// The right the sender invoked (`RightId::KERNEL` for kernel-
    /// originated messages).
    pub right: RightId,
    /// Size of the payload, in bytes.
    pub size: usize,
    /// Number of rights attached to the message.
    pub attached_count: u8,
}

/// The 32-bit tag that begins every IPC payload, naming the message kind.
/// The rest of the payload is kind-specific and always begins on an 8-byte
/// boundary.
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
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct MessageKind(pub u32);

macro_rules! message_kinds {
    ($($name:ident = $val:expr),* $(,)?) => {
        impl MessageKind {
            $(pub const $name: Self = Self($val);)*
        }
    };
}

message_kinds! {
    KERNEL_INTERRUPT = 0,
    KERNEL_NAMED_PORT_NOTIFICATION = 1,
    TIMER_REPLY = 2,
    MUTEX_UNLOCK = 3,
    THREAD_FINISHED = 4,
    DISK_REGISTER = 5,
    DISK_REGISTER_REPLY = 6,
    WRITE_PLAIN = 7,
    REGISTER_LOG_OUTPUT = 8,
    REGISTER_LOG_OUTPUT_REPLY = 9,
    FRAMEBUFFER_REQUEST = 10,
    FRAMEBUFFER_REPLY = 11,
    REQUEST_SERIAL = 12,
    SERIAL_REPLY = 13,
    REGISTER_PROCESS = 14,
    REGISTER_PROCESS_REPLY = 15,
    REQUEST_FORK = 16,
    REQUEST_FORK_REPLY = 17,
    OPEN = 18,
    OPEN_REPLY = 19,
    MOUNT_FS = 20,
    MOUNT_FS_REPLY = 21,
    REGISTER_FS = 22,
    REGISTER_FS_REPLY = 23,
    BUS_PUBLISH_OBJECT = 24,
    TASK_FAULT = 25,
}

/// Payload of a `Task_Fault` message: delivered to a task's fault port (set
/// via `SetPort`) when it is forced into a faulted state.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct TaskFault {
    pub kind: MessageKind,
    pub task: u32,
}

/// Payload of a `Kernel_Interrupt` message: "GSI fired."
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct KernelInterrupt {
    pub kind: MessageKind,
    pub interrupt_id: u32,
}

/// Payload of a `Timer_Reply` message: the requested timer fired.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct TimerReply {
    pub kind: MessageKind,
    pub id: u32,
    pub extra: [u32; 3],
}

/// Payload of a `Kernel_Named_Port_Notification` message: a previously
/// unresolved name has been published, or will never be (port-closed).
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct NamedPortNotification {
    pub kind: MessageKind,
    pub resolved: u32,
}
