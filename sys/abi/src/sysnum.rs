// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Syscall numbers, stable for the life of a boot. Userspace linking
//! assumes the same numbering the kernel's `syscalls.rs` dispatches on.

/// Enumeration of syscall numbers.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sysnum {
    GetTaskId = 0,
    CreateProcess = 1,
    CreateNormalRegion = 2,
    CreatePhysMapRegion = 3,
    StartProcess = 4,
    GetPageTable = 5,
    Exit = 6,
    GetMessageInfo = 7,
    GetFirstMessage = 8,
    SendMessagePort = 9,
    SetPort = 10,
    SetAttribute = 11,
    IsPageAllocated = 12,
    GetLapicId = 13,
    SetInterrupt = 14,
    NamePort = 15,
    GetPortByName = 16,
    SetLogPort = 17,
    RequestNamedPort = 18,
    TransferRegion = 19,
    CreateMemObject = 20,
    DeleteRegion = 21,
    LoadExecutable = 22,
    ConfigureSystem = 23,
    SetPriority = 24,
    SetTaskName = 25,
    CreatePort = 26,
    CreateTaskGroup = 27,
    AddToTaskGroup = 28,
    RemoveFromTaskGroup = 29,
    IsInTaskGroup = 30,
    SetNotifyMask = 31,
    RequestTimer = 32,
    SetAffinity = 33,
    CompleteInterrupt = 34,
    Yield = 35,
    Pause = 36,
    Resume = 37,
    Kill = 38,
    CreateRight = 39,
    DeleteRight = 40,
    AcceptRights = 41,
    GetTime = 42,
}

pub const NUM_SYSCALLS: u32 = 43;

/// We use an explicit `TryFrom` impl for `Sysnum` instead of `FromPrimitive`
/// because the kernel doesn't depend on `num-traits` and this seems okay.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        use Sysnum::*;
        Ok(match x {
            0 => GetTaskId,
            1 => CreateProcess,
            2 => CreateNormalRegion,
            3 => CreatePhysMapRegion,
            4 => StartProcess,
            5 => GetPageTable,
            6 => Exit,
            7 => GetMessageInfo,
            8 => GetFirstMessage,
            9 => SendMessagePort,
            10 => SetPort,
            11 => SetAttribute,
            12 => IsPageAllocated,
            13 => GetLapicId,
            14 => SetInterrupt,
            15 => NamePort,
            16 => GetPortByName,
            17 => SetLogPort,
            18 => RequestNamedPort,
            19 => TransferRegion,
            20 => CreateMemObject,
            21 => DeleteRegion,
            22 => LoadExecutable,
            23 => ConfigureSystem,
            24 => SetPriority,
            25 => SetTaskName,
            26 => CreatePort,
            27 => CreateTaskGroup,
            28 => AddToTaskGroup,
            29 => RemoveFromTaskGroup,
            30 => IsInTaskGroup,
            31 => SetNotifyMask,
            32 => RequestTimer,
            33 => SetAffinity,
            34 => CompleteInterrupt,
            35 => Yield,
            36 => Pause,
            37 => Resume,
            38 => Kill,
            39 => CreateRight,
            40 => DeleteRight,
            41 => AcceptRights,
            42 => GetTime,
            _ => return Err(()),
        })
    }
}
