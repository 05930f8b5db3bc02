// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The syscall-level error vocabulary shared between the kernel and
//! userspace. Every syscall that can fail reports one of these; the syscall
//! trampoline is responsible for translating it into the negated POSIX
//! errno userspace expects.

/// A kernel error kind, returned by a syscall that failed for reasons other
/// than a task fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    /// Operation is valid but not implemented on this arch/build.
    NotSupported = 0,
    /// Caller lacks ownership, isn't in the right task-group, or isn't
    /// bound to the resource.
    Permission = 1,
    /// Nonsense id, out-of-range alignment, or zero size.
    BadArgument = 2,
    /// Task/port/right/memory-object/region id is unknown.
    NotFound = 3,
    /// Duplicate registration (port name, interrupt binding).
    Exists = 4,
    /// Interrupt already active, or task already paused/running.
    Busy = 5,
    /// Frame allocator or kernel heap exhausted.
    NoMemory = 6,
    /// Target port was gone between right creation and send.
    PortClosed = 7,
    /// Non-blocking peek found an empty queue.
    NoMessages = 8,
    /// Object's owner has terminated.
    Closed = 9,
    /// ELF or IPC payload failed structural checks.
    Format = 10,
    /// A blocking syscall returned early because the task was killed while
    /// blocked.
    Interrupted = 11,
}

impl ErrorKind {
    /// Translates this kind into the negative POSIX errno value the
    /// syscall ABI returns in the `result` word. The mapping is total: no
    /// kernel error kind is ever silently dropped at this boundary.
    pub const fn to_negated_errno(self) -> i32 {
        match self {
            Self::NotSupported => -NOSYS,
            Self::Permission => -EPERM,
            Self::BadArgument => -EINVAL,
            Self::NotFound => -ENOENT,
            Self::Exists => -EEXIST,
            Self::Busy => -EBUSY,
            Self::NoMemory => -ENOMEM,
            Self::PortClosed => -EIDRM,
            Self::NoMessages => -EAGAIN,
            Self::Closed => -EBADF,
            Self::Format => -EINVAL,
            Self::Interrupted => -EINTR,
        }
    }

    /// Inverse of `to_negated_errno`, used by userspace to recover the
    /// original kind from a syscall's result word. `code` must be `< 0`;
    /// an errno this table doesn't recognize maps to `NotSupported` rather
    /// than panicking, since a newer kernel might report a code an older
    /// userlib predates.
    pub const fn from_negated_errno(code: i32) -> Self {
        match -code {
            EPERM => Self::Permission,
            ENOENT => Self::NotFound,
            EEXIST => Self::Exists,
            EBUSY => Self::Busy,
            ENOMEM => Self::NoMemory,
            EIDRM => Self::PortClosed,
            EAGAIN => Self::NoMessages,
            EBADF => Self::Closed,
            EINTR => Self::Interrupted,
            _ => Self::NotSupported,
        }
    }
}

const EPERM: i32 = 1;
const ENOENT: i32 = 2;
const EAGAIN: i32 = 11;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const EEXIST: i32 = 17;
const EINVAL: i32 = 22;
const EBADF: i32 = 9;
const EIDRM: i32 = 43;
const EINTR: i32 = 4;
const NOSYS: i32 = 38;
