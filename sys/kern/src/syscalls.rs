// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall implementation.
//!
//! This builds on architecture-specific parts defined in the `arch::*` modules.
//!
//! # Syscall implementations
//!
//! With only a couple of exceptions, syscalls are implemented by functions with
//! the signature:
//!
//! ```ignore
//! fn syscall(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError>;
//! ```
//!
//! `tasks` is the task table, and `caller` is the index of the task within it
//! that triggered the syscall. On return, a `NextTask` indicates success with a
//! possible scheduling hint, while a `UserError` indicates a condition that
//! needs to either be returned as a response code or recorded as a fault. A
//! common wrapper takes care of the final side effects (setting the result
//! registers, or turning an `Unrecoverable` error into a fault), reducing
//! code in each syscall.
//!
//! Arguments are read out of `task.save()` through the `task::ArchState`
//! trait's `argN` accessors; results are written back through `retN`. The
//! architecture's low-level entry sequence is responsible for loading
//! `tasks[task::current(cpu)]`'s saved state back into registers once this
//! module returns -- see `syscall_entry` below.

use core::convert::TryFrom;

use abi::{
    ErrorKind, FaultInfo, Gsi, MessageKind, PortId, RegionAttributes,
    RegionDesc, RightId, RightKind, SchedState, Sysnum, TaskFault, TaskId,
    TaskState, UsageError,
};
use alloc::vec::Vec;
use zerocopy::IntoBytes;

use crate::err::UserError;
use crate::irq;
use crate::mem::{self, MemObjectId};
use crate::port;
use crate::task::{self, current_id, ArchState, NextTask, Task, TaskGroupId};
use crate::time::Timestamp;
use crate::timer;
use crate::umem::USlice;

/// Entry point accessed by arch-specific syscall entry sequence.
///
/// Before calling this, task volatile state (e.g. callee-save registers) must
/// be stored safely into the `SavedState` struct of the `Task`.
///
/// `nr` is the syscall number passed from user code.
///
/// `task` is a pointer to the current Task.
#[no_mangle]
pub unsafe extern "C" fn syscall_entry(nr: u32, task: *mut Task) {
    crate::profiling::event_syscall_enter(nr);

    // The task pointer is about to alias our task table, at which point it
    // could not be dereferenced -- so we'll shed our ability to dereference it.
    let task_addr = task as usize;

    task::with_tasks(|tasks| {
        let idx =
            (task_addr - tasks.as_ptr() as usize) / core::mem::size_of::<Task>();
        let cpu = tasks[idx].owning_cpu();

        let next = match safe_syscall_entry(nr, idx, tasks) {
            NextTask::Same => idx,
            NextTask::Specific(i) => i,
            NextTask::Other => task::select(idx, tasks, cpu),
        };
        task::set_current(cpu, next);
    });

    crate::profiling::event_syscall_exit();
}

/// Factored out of `syscall_entry` to encapsulate the bits that don't need
/// unsafe.
fn safe_syscall_entry(nr: u32, current: usize, tasks: &mut [Task]) -> NextTask {
    let res = match Sysnum::try_from(nr) {
        Ok(Sysnum::GetTaskId) => get_task_id(tasks, current),
        Ok(Sysnum::CreateProcess) => create_process(tasks, current),
        Ok(Sysnum::CreateNormalRegion) => create_normal_region(tasks, current),
        Ok(Sysnum::CreatePhysMapRegion) => create_phys_map_region(tasks, current),
        Ok(Sysnum::StartProcess) => start_process(tasks, current),
        Ok(Sysnum::GetPageTable) => get_page_table(tasks, current),
        Ok(Sysnum::Exit) => exit(tasks, current),
        Ok(Sysnum::GetMessageInfo) => get_message_info(tasks, current),
        Ok(Sysnum::GetFirstMessage) => get_first_message(tasks, current),
        Ok(Sysnum::SendMessagePort) => send_message_port(tasks, current),
        Ok(Sysnum::SetPort) => set_port(tasks, current),
        Ok(Sysnum::SetAttribute) => set_attribute(tasks, current),
        Ok(Sysnum::IsPageAllocated) => is_page_allocated(tasks, current),
        Ok(Sysnum::GetLapicId) => get_lapic_id(tasks, current),
        Ok(Sysnum::SetInterrupt) => set_interrupt(tasks, current),
        Ok(Sysnum::NamePort) => name_port(tasks, current),
        Ok(Sysnum::GetPortByName) => get_port_by_name(tasks, current),
        Ok(Sysnum::SetLogPort) => set_log_port(tasks, current),
        Ok(Sysnum::RequestNamedPort) => request_named_port(tasks, current),
        Ok(Sysnum::TransferRegion) => transfer_region(tasks, current),
        Ok(Sysnum::CreateMemObject) => create_mem_object(tasks, current),
        Ok(Sysnum::DeleteRegion) => delete_region(tasks, current),
        Ok(Sysnum::LoadExecutable) => load_executable(tasks, current),
        Ok(Sysnum::ConfigureSystem) => configure_system(tasks, current),
        Ok(Sysnum::SetPriority) => set_priority(tasks, current),
        Ok(Sysnum::SetTaskName) => set_task_name(tasks, current),
        Ok(Sysnum::CreatePort) => create_port(tasks, current),
        Ok(Sysnum::CreateTaskGroup) => create_task_group(tasks, current),
        Ok(Sysnum::AddToTaskGroup) => add_to_task_group(tasks, current),
        Ok(Sysnum::RemoveFromTaskGroup) => remove_from_task_group(tasks, current),
        Ok(Sysnum::IsInTaskGroup) => is_in_task_group(tasks, current),
        Ok(Sysnum::SetNotifyMask) => set_notify_mask(tasks, current),
        Ok(Sysnum::RequestTimer) => request_timer(tasks, current),
        Ok(Sysnum::SetAffinity) => set_affinity(tasks, current),
        Ok(Sysnum::CompleteInterrupt) => complete_interrupt(tasks, current),
        Ok(Sysnum::Yield) => yield_now(),
        Ok(Sysnum::Pause) => pause(tasks, current),
        Ok(Sysnum::Resume) => resume(tasks, current),
        Ok(Sysnum::Kill) => kill(tasks, current),
        Ok(Sysnum::CreateRight) => create_right(tasks, current),
        Ok(Sysnum::DeleteRight) => delete_right(tasks, current),
        Ok(Sysnum::AcceptRights) => accept_rights(tasks, current),
        Ok(Sysnum::GetTime) => get_time(tasks, current),
        Err(_) => {
            Err(FaultInfo::SyscallUsage(UsageError::BadSyscallNumber).into())
        }
    };
    match res {
        Ok(nt) => {
            tasks[current].save_mut().ret0(0);
            nt
        }
        Err(UserError::Recoverable(code, hint)) => {
            tasks[current].save_mut().set_result(code.to_negated_errno(), 0);
            hint
        }
        Err(UserError::Unrecoverable(fault)) => {
            let fault_port = tasks[current].fault_port();
            let next = task::force_fault(tasks, current, fault);
            if let Some(port) = fault_port {
                let msg = TaskFault {
                    kind: MessageKind::TASK_FAULT,
                    task: current as u32,
                };
                let _ = port::send_from_kernel(port, msg.as_bytes());
            }
            next
        }
    }
}

/// Reads the seven general-purpose syscall argument registers.
fn args(tasks: &[Task], caller: usize) -> [u64; 7] {
    let s = tasks[caller].save();
    [s.arg0(), s.arg1(), s.arg2(), s.arg3(), s.arg4(), s.arg5(), s.arg6()]
}

/// Validates and copies `len` bytes from `caller`'s memory at `addr`.
fn read_user_bytes(
    tasks: &mut [Task],
    caller: usize,
    addr: u64,
    len: u64,
) -> Result<Vec<u8>, UserError> {
    let slice = USlice::<u8>::from_raw(addr as usize, len as usize)?;
    let bytes = tasks[caller].try_read(&slice)?;
    Ok(bytes.to_vec())
}

/// Pops the head message of `port` into `idx`'s receive buffer and writes
/// its result registers, the same delivery `get_first_message` performs for
/// an immediately-available message. Shared by the non-blocking path and by
/// `wake_blocked_on_port`, which must perform this same pop+copy+reg-write
/// when waking a task that blocked on an empty port -- see spec §8 scenario
/// 1 and the ordering invariant in §8/§5 ("messages on a single port are
/// totally ordered").
fn deliver_first_message(
    tasks: &mut [Task],
    idx: usize,
    port_id: PortId,
    buf_addr: u64,
    buf_len: u64,
) -> Result<(), UserError> {
    let mut slice = USlice::<u8>::from_raw(buf_addr as usize, buf_len as usize)?;
    let buf = tasks[idx].try_write(&mut slice)?;
    let (info, attached) = port::get_first_message(port_id, buf)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[idx].set_last_attached(attached);
    tasks[idx].clear_pending_recv();

    let s = tasks[idx].save_mut();
    s.ret0(0);
    s.ret1(info.sender.0 as u64);
    s.ret2(info.right.0 as u64);
    s.ret3(info.size as u64);
    s.ret4(info.attached_count as u64);
    Ok(())
}

/// Wakes every task parked on `port`, delivering a message into each one
/// that's actually waiting on it -- for as long as the port still has
/// messages queued -- and folds the scheduling hints together. A task that
/// stays blocked (because the queue ran dry before reaching it) is left
/// alone; its `pending_recv` buffer is still valid for the next `send`.
fn wake_blocked_on_port(tasks: &mut [Task], port: PortId) -> NextTask {
    let mut next = NextTask::Same;
    for idx in 0..tasks.len() {
        if !tasks[idx].is_blocked_on(port) {
            continue;
        }
        match port::get_message_info(port) {
            Ok(Some(_)) => {}
            _ => break,
        }
        let Some((buf_addr, buf_len)) = tasks[idx].pending_recv() else {
            continue;
        };
        match deliver_first_message(tasks, idx, port, buf_addr, buf_len) {
            Ok(()) => {
                tasks[idx].set_healthy_state(SchedState::Runnable);
                next = next.combine(NextTask::Other);
            }
            Err(UserError::Recoverable(code, hint)) => {
                tasks[idx].clear_pending_recv();
                tasks[idx].set_healthy_state(SchedState::Runnable);
                tasks[idx].save_mut().set_result(code.to_negated_errno(), 0);
                next = next.combine(hint);
            }
            Err(UserError::Unrecoverable(fault)) => {
                next = next.combine(task::force_fault(tasks, idx, fault));
            }
        }
    }
    next
}

/// Wakes each task in `woken` (ids returned by `port::name_port`) that's
/// still parked in `BlockedOnNamedPort`, writing the just-resolved `port`
/// into its result registers -- the same `ret1`/`ret2` shape the
/// non-blocking `get_port_by_name` success path writes. Without this a
/// woken looker-up would resume believing its syscall succeeded with
/// whatever garbage was left in those registers, never learning which port
/// its name resolved to (spec §8 scenario 1's "T2 is unblocked and receives
/// a send-right id").
fn wake_blocked_on_named_port(
    tasks: &mut [Task],
    woken: Vec<TaskId>,
    port: PortId,
) -> NextTask {
    let mut next = NextTask::Same;
    for id in woken {
        if let Ok(idx) = task::check_task_id_against_table(tasks, id) {
            if tasks[idx].wake_if_blocked_on_named_port() {
                let s = tasks[idx].save_mut();
                s.ret0(0);
                s.ret1(1);
                s.ret2(port.0);
                next = next.combine(NextTask::Other);
            }
        }
    }
    next
}

fn get_task_id(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let id = current_id(tasks, caller);
    tasks[caller].save_mut().ret1(id.0 as u64);
    Ok(NextTask::Same)
}

/// Claims the first unclaimed, non-`START_AT_BOOT` descriptor slot and
/// (re)initializes it. The static region/entry-point layout for the new
/// process comes straight from its `TaskDesc`, per the static-configuration
/// design this kernel follows.
fn create_process(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let idx = task::find_unclaimed_slot(tasks)
        .ok_or(UserError::Recoverable(ErrorKind::NoMemory, NextTask::Same))?;
    tasks[idx].claim();
    tasks[idx].reinitialize();
    let id = current_id(tasks, idx);
    tasks[caller].save_mut().ret1(id.0 as u64);
    Ok(NextTask::Same)
}

fn create_normal_region(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [size, vaddr, attrs_bits, ..] = args(tasks, caller);
    let attrs = RegionAttributes::from_bits_truncate(attrs_bits as u32);
    let obj = mem::create_anonymous_object(size)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    let pt = tasks[caller].page_table();
    mem::map_region(pt, obj, 0, vaddr, size, attrs)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[caller].add_extra_region(RegionDesc {
        base: vaddr,
        size,
        attributes: attrs,
        reserved_zero: 0,
    });
    tasks[caller].save_mut().ret1(obj.0);
    Ok(NextTask::Same)
}

fn create_phys_map_region(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [phys_base, size, vaddr, attrs_bits, ..] = args(tasks, caller);
    let attrs = RegionAttributes::from_bits_truncate(attrs_bits as u32);
    let obj = mem::create_phys_map_object(phys_base, size)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    let pt = tasks[caller].page_table();
    mem::map_region(pt, obj, 0, vaddr, size, attrs)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[caller].add_extra_region(RegionDesc {
        base: vaddr,
        size,
        attributes: attrs,
        reserved_zero: 0,
    });
    tasks[caller].save_mut().ret1(obj.0);
    Ok(NextTask::Same)
}

fn start_process(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_id, ..] = args(tasks, caller);
    let idx = task::check_task_id_against_table(tasks, TaskId(raw_id as u16))?;
    tasks[idx].set_healthy_state(SchedState::Runnable);
    Ok(NextTask::Other)
}

fn get_page_table(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_id, ..] = args(tasks, caller);
    let idx = task::check_task_id_against_table(tasks, TaskId(raw_id as u16))?;
    let pt = tasks[idx].page_table();
    tasks[caller].save_mut().ret1(pt.0 as u64);
    Ok(NextTask::Same)
}

fn exit(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    tasks[caller].set_healthy_state(SchedState::Paused);
    if !tasks[caller]
        .descriptor()
        .flags
        .contains(crate::app::TaskFlags::START_AT_BOOT)
    {
        tasks[caller].release();
    }
    Ok(NextTask::Other)
}

fn get_message_info(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_port, ..] = args(tasks, caller);
    let info = port::get_message_info(PortId(raw_port))
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    let s = tasks[caller].save_mut();
    match info {
        Some(info) => {
            s.ret1(1);
            s.ret2(info.sender.0 as u64);
            s.ret3(info.right.0 as u64);
            s.ret4(info.size as u64);
            s.ret5(info.attached_count as u64);
        }
        None => s.ret1(0),
    }
    Ok(NextTask::Same)
}

/// Blocks the caller on `port` if it's empty, otherwise pops the head
/// message into the caller's buffer.
fn get_first_message(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_port, buf_addr, buf_len, ..] = args(tasks, caller);
    let port_id = PortId(raw_port);

    let has_message = port::get_message_info(port_id)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?
        .is_some();
    if !has_message {
        tasks[caller].block_on_port(port_id, buf_addr, buf_len);
        return Ok(NextTask::Other);
    }

    deliver_first_message(tasks, caller, port_id, buf_addr, buf_len)?;
    Ok(NextTask::Same)
}

fn send_message_port(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_right, payload_addr, payload_len, r0, r1, r2, r3] =
        args(tasks, caller);
    let right = RightId(raw_right as u32);
    let mut attached: abi::AttachedRights = [None; abi::MAX_ATTACHED_RIGHTS];
    for (slot, raw) in attached.iter_mut().zip([r0, r1, r2, r3]) {
        if raw != 0 {
            *slot = Some(RightId(raw as u32));
        }
    }

    let slice = USlice::<u8>::from_raw(payload_addr as usize, payload_len as usize)?;
    let payload = tasks[caller].try_read(&slice)?.to_vec();
    let sender = current_id(tasks, caller);

    let outcome = port::send(sender, right, &payload, attached)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    Ok(wake_blocked_on_port(tasks, outcome.port))
}

/// Sets the port that receives a `Task_Fault` message if this task is later
/// forced into a fault state. `PortId::NONE` clears it.
fn set_port(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_port, ..] = args(tasks, caller);
    let port = if raw_port == PortId::NONE.0 {
        None
    } else {
        Some(PortId(raw_port))
    };
    tasks[caller].set_fault_port(port);
    Ok(NextTask::Same)
}

fn set_attribute(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [base, attrs_bits, ..] = args(tasks, caller);
    let attrs = RegionAttributes::from_bits_truncate(attrs_bits as u32);
    if !tasks[caller].set_extra_region_attributes(base, attrs) {
        return Err(UserError::Recoverable(ErrorKind::NotFound, NextTask::Same));
    }
    Ok(NextTask::Same)
}

fn is_page_allocated(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [vaddr, ..] = args(tasks, caller);
    let pt = tasks[caller].page_table();
    let allocated = mem::is_page_allocated(pt, vaddr)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[caller].save_mut().ret1(allocated as u64);
    Ok(NextTask::Same)
}

fn get_lapic_id(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let id = crate::arch::lapic_id();
    tasks[caller].save_mut().ret1(id as u64);
    Ok(NextTask::Same)
}

/// Binds a GSI to a port. A task may only bind a GSI that the boot-time
/// descriptor names it as the default owner of; `startup` derives that table
/// from the app descriptor's `Interrupt` records.
fn set_interrupt(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_gsi, raw_port, ..] = args(tasks, caller);
    let gsi = Gsi(raw_gsi as u32);
    if let Some(owner) = crate::startup::irq_owner_task(gsi) {
        if owner != caller {
            return Err(UserError::Recoverable(ErrorKind::Permission, NextTask::Same));
        }
    }
    irq::register(gsi, PortId(raw_port))
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    Ok(NextTask::Same)
}

fn name_port(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_port, name_addr, name_len, ..] = args(tasks, caller);
    let port_id = PortId(raw_port);
    let name = read_user_bytes(tasks, caller, name_addr, name_len)?;
    let woken = port::name_port(&name, port_id)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    Ok(wake_blocked_on_named_port(tasks, woken, port_id))
}

/// Resolves `name` if it's already bound, otherwise parks the caller until
/// some task calls `NamePort` with that exact name.
fn get_port_by_name(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [name_addr, name_len, ..] = args(tasks, caller);
    let name = read_user_bytes(tasks, caller, name_addr, name_len)?;
    match port::lookup_name(&name) {
        Some(port) => {
            let s = tasks[caller].save_mut();
            s.ret1(1);
            s.ret2(port.0);
            Ok(NextTask::Same)
        }
        None => {
            let id = current_id(tasks, caller);
            port::register_pending_lookup(&name, id);
            tasks[caller].set_healthy_state(SchedState::BlockedOnNamedPort);
            Ok(NextTask::Other)
        }
    }
}

fn set_log_port(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_port, ..] = args(tasks, caller);
    crate::klog::set_port(PortId(raw_port))
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    Ok(NextTask::Same)
}

/// Creates a fresh port and publishes it under `name` in one step -- the
/// usual way a server registers itself, as distinct from the client-side
/// `GetPortByName`.
fn request_named_port(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [name_addr, name_len, ..] = args(tasks, caller);
    let name = read_user_bytes(tasks, caller, name_addr, name_len)?;
    let new_port = port::create_port();
    let woken = port::name_port(&name, new_port)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    let next = wake_blocked_on_named_port(tasks, woken, new_port);
    tasks[caller].save_mut().ret1(new_port.0);
    Ok(next)
}

fn transfer_region(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_obj, raw_target, vaddr, size, attrs_bits, ..] = args(tasks, caller);
    let target = task::check_task_id_against_table(tasks, TaskId(raw_target as u16))?;
    let attrs = RegionAttributes::from_bits_truncate(attrs_bits as u32);
    let pt = tasks[target].page_table();
    mem::map_region(pt, MemObjectId(raw_obj), 0, vaddr, size, attrs)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[target].add_extra_region(RegionDesc {
        base: vaddr,
        size,
        attributes: attrs,
        reserved_zero: 0,
    });
    Ok(NextTask::Same)
}

fn create_mem_object(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [size, kind, phys_base, ..] = args(tasks, caller);
    let id = if kind == 0 {
        mem::create_anonymous_object(size)
    } else {
        mem::create_phys_map_object(phys_base, size)
    }
    .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[caller].save_mut().ret1(id.0);
    Ok(NextTask::Same)
}

fn delete_region(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [vaddr, size, ..] = args(tasks, caller);
    let pt = tasks[caller].page_table();
    mem::delete_region(pt, vaddr, size)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[caller].remove_extra_region(vaddr);
    Ok(NextTask::Same)
}

/// Maps a read-only, executable view of a loaded module's memory object
/// into a (usually freshly created, not-yet-started) process, ahead of
/// `StartProcess`.
fn load_executable(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_target, raw_obj, vaddr, size, ..] = args(tasks, caller);
    let target = task::check_task_id_against_table(tasks, TaskId(raw_target as u16))?;
    let attrs = RegionAttributes::READ | RegionAttributes::EXECUTE;
    let pt = tasks[target].page_table();
    mem::map_region(pt, MemObjectId(raw_obj), 0, vaddr, size, attrs)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[target].add_extra_region(RegionDesc {
        base: vaddr,
        size,
        attributes: attrs,
        reserved_zero: 0,
    });
    Ok(NextTask::Same)
}

/// Supervisor-only system (re)configuration. Currently supports only
/// extending the anonymous-frame pool (op 0), e.g. after the bootloader
/// reports additional usable memory.
fn configure_system(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [op, a, b, ..] = args(tasks, caller);
    match op {
        0 => {
            mem::init_frame_allocator(a, b);
            Ok(NextTask::Same)
        }
        _ => Err(UserError::Recoverable(ErrorKind::BadArgument, NextTask::Same)),
    }
}

fn set_priority(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_id, raw_priority, ..] = args(tasks, caller);
    let idx = task::check_task_id_against_table(tasks, TaskId(raw_id as u16))?;
    tasks[idx].set_priority(abi::Priority(raw_priority as u8));
    Ok(NextTask::Other)
}

/// Sets the caller's own diagnostic label, truncated to 32 bytes.
fn set_task_name(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [addr, len, ..] = args(tasks, caller);
    let len = len.min(32);
    let label = read_user_bytes(tasks, caller, addr, len)?;
    tasks[caller].set_label(label);
    Ok(NextTask::Same)
}

/// Spec §4.1: `create_port(owner) → port_id, right_id(send-many)`. Returns
/// both the new port and an initial send-many right to it -- the right a
/// caller needs to hand out (e.g. via `name_port`) before anyone else can
/// reach the port at all.
fn create_port(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let (new_port, right) = port::create_port_with_right();
    let s = tasks[caller].save_mut();
    s.ret1(new_port.0);
    s.ret2(right.0 as u64);
    Ok(NextTask::Same)
}

fn create_task_group(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let group = task::create_task_group();
    tasks[caller].save_mut().ret1(group.0);
    Ok(NextTask::Same)
}

fn add_to_task_group(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_group, raw_task, ..] = args(tasks, caller);
    let group = TaskGroupId(raw_group);
    let target = task::check_task_id_against_table(tasks, TaskId(raw_task as u16))?;
    let id = current_id(tasks, target);
    task::with_group_mut(group, |g| g.add_member(id))
        .ok_or(UserError::Recoverable(ErrorKind::NotFound, NextTask::Same))?;
    tasks[target].join_group(group);
    Ok(NextTask::Same)
}

fn remove_from_task_group(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_group, raw_task, ..] = args(tasks, caller);
    let group = TaskGroupId(raw_group);
    let target = task::check_task_id_against_table(tasks, TaskId(raw_task as u16))?;
    let id = current_id(tasks, target);
    task::with_group_mut(group, |g| g.remove_member(id))
        .ok_or(UserError::Recoverable(ErrorKind::NotFound, NextTask::Same))?;
    tasks[target].leave_group(group);
    Ok(NextTask::Same)
}

fn is_in_task_group(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_group, raw_task, ..] = args(tasks, caller);
    let group = TaskGroupId(raw_group);
    let target = task::check_task_id_against_table(tasks, TaskId(raw_task as u16))?;
    let id = current_id(tasks, target);
    let contains = task::with_group_mut(group, |g| g.contains(id))
        .ok_or(UserError::Recoverable(ErrorKind::NotFound, NextTask::Same))?;
    tasks[caller].save_mut().ret1(contains as u64);
    Ok(NextTask::Same)
}

fn set_notify_mask(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_group, raw_port, mask, ..] = args(tasks, caller);
    let group = TaskGroupId(raw_group);
    let port_id = PortId(raw_port);
    task::with_group_mut(group, |g| {
        g.notifiers.retain(|(p, _)| *p != port_id);
        g.notifiers.push((port_id, mask as u32));
    })
    .ok_or(UserError::Recoverable(ErrorKind::NotFound, NextTask::Same))?;
    let _ = caller;
    Ok(NextTask::Same)
}

fn request_timer(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [deadline, raw_port, e0, e1, e2, ..] = args(tasks, caller);
    let cpu = tasks[caller].owning_cpu();
    let id = timer::request_timer(
        cpu,
        Timestamp::from(deadline),
        PortId(raw_port),
        [e0 as u32, e1 as u32, e2 as u32],
    )
    .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[caller].save_mut().ret1(id.0);
    Ok(NextTask::Same)
}

fn set_affinity(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_id, affinity, ..] = args(tasks, caller);
    let idx = task::check_task_id_against_table(tasks, TaskId(raw_id as u16))?;
    tasks[idx].set_affinity(affinity as u32);
    Ok(NextTask::Same)
}

fn complete_interrupt(
    tasks: &mut [Task],
    caller: usize,
) -> Result<NextTask, UserError> {
    let [raw_gsi, raw_port, ..] = args(tasks, caller);
    irq::complete_interrupt(Gsi(raw_gsi as u32), PortId(raw_port))
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    Ok(NextTask::Same)
}

fn yield_now() -> Result<NextTask, UserError> {
    Ok(NextTask::Other)
}

fn pause(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    tasks[caller].set_healthy_state(SchedState::Paused);
    Ok(NextTask::Other)
}

fn resume(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_id, ..] = args(tasks, caller);
    let idx = task::check_task_id_against_table(tasks, TaskId(raw_id as u16))?;
    tasks[idx].set_healthy_state(SchedState::Runnable);
    Ok(NextTask::Other)
}

fn kill(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_id, ..] = args(tasks, caller);
    let idx = task::check_task_id_against_table(tasks, TaskId(raw_id as u16))?;
    if !matches!(tasks[idx].state(), TaskState::Faulted { .. }) {
        tasks[idx].set_healthy_state(SchedState::Paused);
    }
    if !tasks[idx]
        .descriptor()
        .flags
        .contains(crate::app::TaskFlags::START_AT_BOOT)
    {
        tasks[idx].release();
    }
    Ok(NextTask::Other)
}

fn create_right(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_port, raw_kind, ..] = args(tasks, caller);
    let kind = if raw_kind == 0 {
        RightKind::SendMany
    } else {
        RightKind::SendOnce
    };
    let right = port::create_right(PortId(raw_port), kind)
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    tasks[caller].save_mut().ret1(right.0 as u64);
    Ok(NextTask::Same)
}

fn delete_right(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let [raw_right, ..] = args(tasks, caller);
    port::delete_right(RightId(raw_right as u32))
        .map_err(|e| UserError::Recoverable(e, NextTask::Same))?;
    Ok(NextTask::Same)
}

/// Checks which rights attached to the last message popped by
/// `GetFirstMessage` are still alive, one bit per slot.
fn accept_rights(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let attached = tasks[caller].last_attached();
    let alive = port::accept_rights(attached);
    let packed = alive
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &a)| acc | ((a as u64) << i));
    tasks[caller].save_mut().ret1(packed);
    Ok(NextTask::Same)
}

fn get_time(tasks: &mut [Task], caller: usize) -> Result<NextTask, UserError> {
    let now: u64 = crate::arch::now().into();
    tasks[caller].save_mut().ret1(now);
    Ok(NextTask::Same)
}
