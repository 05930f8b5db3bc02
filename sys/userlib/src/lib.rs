// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User task support library.
//!
//! This contains syscall stubs and the types needed to use them, and
//! re-exports the contents of the `abi` crate that gets shared with the
//! kernel.
//!
//! # Syscall ABI
//!
//! Every syscall takes up to seven `u64` arguments and returns up to six:
//! the first, `ret0`, is `0` on success or a negated POSIX errno on
//! failure; the rest carry whatever payload that particular call produces.
//! Each architecture pins these to a fixed set of registers (see each
//! `kern::arch` backend's `SavedState`); [`raw_syscall`] is the one place
//! in this crate that has to know what they are.
//!
//! [`raw_syscall`] itself is implemented as a naked trampoline per
//! architecture, because Rust's inline-asm operand binding can't name a
//! couple of the registers this ABI uses for return values (notably the
//! frame pointer) -- a naked function's body is untouched assembly, so it
//! can push, use, and restore them like any other register.

#![no_std]

#[macro_use]
pub mod macros;

pub mod hl;
pub mod task_slot;

pub use abi::*;
pub use num_derive::{FromPrimitive, ToPrimitive};
pub use num_traits::{FromPrimitive, ToPrimitive};

/// Group id returned by `sys_create_task_group`. Opaque outside the
/// kernel; namespaced separately from `TaskId`/`PortId`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct TaskGroupId(pub u64);

/// Reads the current monotonic kernel timestamp, in ticks since boot.
#[inline(always)]
pub fn sys_get_time() -> u64 {
    raw0(Sysnum::GetTime, [0; 7])[0]
}

/// Returns the caller's own `TaskId` (index and current generation).
#[inline(always)]
pub fn sys_get_task_id() -> TaskId {
    TaskId(raw0(Sysnum::GetTaskId, [0; 7])[0] as u16)
}

/// Claims an unused task slot and (re)initializes it from its build-time
/// descriptor. Returns the new task's id.
#[inline(always)]
pub fn sys_create_process() -> Result<TaskId, ErrorKind> {
    let out = raw1(Sysnum::CreateProcess, [0; 7])?;
    Ok(TaskId(out[0] as u16))
}

/// Maps a freshly allocated anonymous region into the caller's own address
/// space at `vaddr`. Returns the backing memory object's id.
#[inline(always)]
pub fn sys_create_normal_region(
    size: u64,
    vaddr: u64,
    attributes: RegionAttributes,
) -> Result<u64, ErrorKind> {
    let out = raw1(
        Sysnum::CreateNormalRegion,
        [size, vaddr, attributes.bits() as u64, 0, 0, 0, 0],
    )?;
    Ok(out[0])
}

/// Maps a view of physical memory starting at `phys_base` into the
/// caller's address space at `vaddr`. Returns the backing memory object's
/// id. Requires whatever privilege the kernel's region-descriptor checks
/// demand of the caller -- ordinary tasks get this only for regions their
/// build-time descriptor already names.
#[inline(always)]
pub fn sys_create_phys_map_region(
    phys_base: u64,
    size: u64,
    vaddr: u64,
    attributes: RegionAttributes,
) -> Result<u64, ErrorKind> {
    let out = raw1(
        Sysnum::CreatePhysMapRegion,
        [phys_base, size, vaddr, attributes.bits() as u64, 0, 0, 0],
    )?;
    Ok(out[0])
}

/// Marks `task` runnable. Used by a supervisor after `CreateProcess` and
/// `LoadExecutable` have set up a fresh process.
#[inline(always)]
pub fn sys_start_process(task: TaskId) -> Result<(), ErrorKind> {
    raw1(Sysnum::StartProcess, [task.0 as u64, 0, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Returns `task`'s page table id. Mostly useful when building a new
/// process's address space out from under it before `StartProcess`.
#[inline(always)]
pub fn sys_get_page_table(task: TaskId) -> Result<u32, ErrorKind> {
    let out = raw1(Sysnum::GetPageTable, [task.0 as u64, 0, 0, 0, 0, 0, 0])?;
    Ok(out[0] as u32)
}

/// Voluntarily ends the caller's current incarnation. Tasks whose
/// descriptor marks them `START_AT_BOOT` are reinitialized and restarted
/// by the kernel rather than being released for good.
#[inline(always)]
pub fn sys_exit() -> ! {
    let _ = raw1(Sysnum::Exit, [0; 7]);
    // The kernel never schedules us again after `Exit`; if it somehow did,
    // looping is safer than falling off the end of this function.
    loop {
        core::hint::spin_loop();
    }
}

/// Non-blocking peek: does `port` have a message waiting? `None` if the
/// port id is unknown to us (e.g. it belongs to another task's namespace).
#[inline(always)]
pub fn sys_get_message_info(port: PortId) -> Option<MessageInfo> {
    let out = raw1(Sysnum::GetMessageInfo, [port.0, 0, 0, 0, 0, 0, 0]).ok()?;
    if out[0] == 0 {
        None
    } else {
        Some(MessageInfo {
            sender: TaskId(out[1] as u16),
            right: RightId(out[2] as u32),
            size: out[3] as usize,
            attached_count: out[4] as u8,
        })
    }
}

/// Blocks until `port` has a message, then copies it (and remembers which
/// attached rights are still alive) into `buffer`. Returns the message's
/// side-band info; the payload itself is the first `info.size` bytes of
/// `buffer`.
#[inline(always)]
pub fn sys_get_first_message(
    port: PortId,
    buffer: &mut [u8],
) -> Result<MessageInfo, ErrorKind> {
    let out = raw1(
        Sysnum::GetFirstMessage,
        [port.0, buffer.as_mut_ptr() as u64, buffer.len() as u64, 0, 0, 0, 0],
    )?;
    Ok(MessageInfo {
        sender: TaskId(out[0] as u16),
        right: RightId(out[1] as u32),
        size: out[2] as usize,
        attached_count: out[3] as u8,
    })
}

/// Sends `payload` through `right`, optionally attaching up to
/// `MAX_ATTACHED_RIGHTS` rights for the recipient to accept.
#[inline(always)]
pub fn sys_send_message_port(
    right: RightId,
    payload: &[u8],
    attached: AttachedRights,
) -> Result<(), ErrorKind> {
    let raw_rights = attached.map(|r| r.map_or(0u64, |r| r.0 as u64));
    raw1(
        Sysnum::SendMessagePort,
        [
            right.0 as u64,
            payload.as_ptr() as u64,
            payload.len() as u64,
            raw_rights[0],
            raw_rights[1],
            raw_rights[2],
            raw_rights[3],
        ],
    )?;
    Ok(())
}

/// Sets (or, with `None`, clears) the port that receives a `Task_Fault`
/// message if the caller is later forced into a fault state.
#[inline(always)]
pub fn sys_set_fault_port(port: Option<PortId>) -> Result<(), ErrorKind> {
    raw1(Sysnum::SetPort, [port.map_or(PortId::NONE.0, |p| p.0), 0, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Changes the attributes of an already-mapped extra region whose base
/// address is `base` (e.g. toggling write permission on a buffer shared
/// with another task).
#[inline(always)]
pub fn sys_set_attribute(
    base: u64,
    attributes: RegionAttributes,
) -> Result<(), ErrorKind> {
    raw1(Sysnum::SetAttribute, [base, attributes.bits() as u64, 0, 0, 0, 0, 0])?;
    Ok(())
}

#[inline(always)]
pub fn sys_is_page_allocated(vaddr: u64) -> Result<bool, ErrorKind> {
    let out = raw1(Sysnum::IsPageAllocated, [vaddr, 0, 0, 0, 0, 0, 0])?;
    Ok(out[0] != 0)
}

#[inline(always)]
pub fn sys_get_lapic_id() -> u32 {
    raw0(Sysnum::GetLapicId, [0; 7])[0] as u32
}

/// Binds `gsi` to `port`: the kernel posts a `Kernel_Interrupt` message to
/// `port` each time the interrupt fires, until `sys_complete_interrupt`
/// re-arms it. Fails with `Permission` unless the caller is the GSI's
/// build-time default owner.
#[inline(always)]
pub fn sys_set_interrupt(gsi: Gsi, port: PortId) -> Result<(), ErrorKind> {
    raw1(Sysnum::SetInterrupt, [gsi.0 as u64, port.0, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Re-arms `gsi` at the interrupt controller after the handler task has
/// finished servicing it.
#[inline(always)]
pub fn sys_complete_interrupt(gsi: Gsi, port: PortId) -> Result<(), ErrorKind> {
    raw1(Sysnum::CompleteInterrupt, [gsi.0 as u64, port.0, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Publishes `port` under `name`, waking any task already blocked in
/// `sys_get_port_by_name` on it.
#[inline(always)]
pub fn sys_name_port(name: &[u8], port: PortId) -> Result<(), ErrorKind> {
    raw1(
        Sysnum::NamePort,
        [name.as_ptr() as u64, name.len() as u64, port.0, 0, 0, 0, 0],
    )?;
    Ok(())
}

/// Resolves `name` if it's already bound; otherwise blocks until some task
/// names a port with exactly this name.
#[inline(always)]
pub fn sys_get_port_by_name(name: &[u8]) -> Result<PortId, ErrorKind> {
    let out = raw1(
        Sysnum::GetPortByName,
        [name.as_ptr() as u64, name.len() as u64, 0, 0, 0, 0, 0],
    )?;
    Ok(PortId(out[1]))
}

/// Sets the port `klog!` output is mirrored to as `Write_Plain` messages.
#[inline(always)]
pub fn sys_set_log_port(port: PortId) -> Result<(), ErrorKind> {
    raw1(Sysnum::SetLogPort, [port.0, 0, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Creates a fresh port and publishes it under `name` in one step -- the
/// usual way a server registers itself, as distinct from the client-side
/// `sys_get_port_by_name`.
#[inline(always)]
pub fn sys_request_named_port(name: &[u8]) -> Result<PortId, ErrorKind> {
    let out = raw1(
        Sysnum::RequestNamedPort,
        [name.as_ptr() as u64, name.len() as u64, 0, 0, 0, 0, 0],
    )?;
    Ok(PortId(out[0]))
}

/// Maps memory object `object` into `target`'s address space at `vaddr`.
#[inline(always)]
pub fn sys_transfer_region(
    object: u64,
    target: TaskId,
    vaddr: u64,
    size: u64,
    attributes: RegionAttributes,
) -> Result<(), ErrorKind> {
    raw1(
        Sysnum::TransferRegion,
        [object, target.0 as u64, vaddr, size, attributes.bits() as u64, 0, 0],
    )?;
    Ok(())
}

/// Creates a memory object: an anonymous zero-filled region if `phys_base`
/// is `None`, or an identity view of physical memory starting at that
/// address otherwise.
#[inline(always)]
pub fn sys_create_mem_object(
    size: u64,
    phys_base: Option<u64>,
) -> Result<u64, ErrorKind> {
    let (kind, base) = match phys_base {
        Some(base) => (1u64, base),
        None => (0u64, 0),
    };
    let out = raw1(Sysnum::CreateMemObject, [size, kind, base, 0, 0, 0, 0])?;
    Ok(out[0])
}

#[inline(always)]
pub fn sys_delete_region(vaddr: u64, size: u64) -> Result<(), ErrorKind> {
    raw1(Sysnum::DeleteRegion, [vaddr, size, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Maps a read-only, executable view of memory object `object` into
/// `target`, ahead of `sys_start_process`.
#[inline(always)]
pub fn sys_load_executable(
    target: TaskId,
    object: u64,
    vaddr: u64,
    size: u64,
) -> Result<(), ErrorKind> {
    raw1(Sysnum::LoadExecutable, [target.0 as u64, object, vaddr, size, 0, 0, 0])?;
    Ok(())
}

/// Extends the kernel's anonymous-frame pool to cover
/// `[base_frame, base_frame + frame_count)`. Supervisor-only in practice:
/// any other caller's `configure_system` request will simply be honored
/// with frames the caller had no business granting, so this should only
/// ever be invoked by the task the boot configuration trusts with it.
#[inline(always)]
pub fn sys_configure_system_extend_memory(
    base_frame: u64,
    frame_count: u64,
) -> Result<(), ErrorKind> {
    raw1(Sysnum::ConfigureSystem, [0, base_frame, frame_count, 0, 0, 0, 0])?;
    Ok(())
}

#[inline(always)]
pub fn sys_set_priority(task: TaskId, priority: Priority) -> Result<(), ErrorKind> {
    raw1(Sysnum::SetPriority, [task.0 as u64, priority.0 as u64, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Sets the caller's own diagnostic label, truncated to 32 bytes.
#[inline(always)]
pub fn sys_set_task_name(label: &[u8]) -> Result<(), ErrorKind> {
    let len = label.len().min(32);
    raw1(Sysnum::SetTaskName, [label.as_ptr() as u64, len as u64, 0, 0, 0, 0, 0])?;
    Ok(())
}

#[inline(always)]
pub fn sys_create_port() -> PortId {
    PortId(raw0(Sysnum::CreatePort, [0; 7])[0])
}

#[inline(always)]
pub fn sys_create_task_group() -> TaskGroupId {
    TaskGroupId(raw0(Sysnum::CreateTaskGroup, [0; 7])[0])
}

#[inline(always)]
pub fn sys_add_to_task_group(
    group: TaskGroupId,
    task: TaskId,
) -> Result<(), ErrorKind> {
    raw1(Sysnum::AddToTaskGroup, [group.0, task.0 as u64, 0, 0, 0, 0, 0])?;
    Ok(())
}

#[inline(always)]
pub fn sys_remove_from_task_group(
    group: TaskGroupId,
    task: TaskId,
) -> Result<(), ErrorKind> {
    raw1(Sysnum::RemoveFromTaskGroup, [group.0, task.0 as u64, 0, 0, 0, 0, 0])?;
    Ok(())
}

#[inline(always)]
pub fn sys_is_in_task_group(
    group: TaskGroupId,
    task: TaskId,
) -> Result<bool, ErrorKind> {
    let out = raw1(Sysnum::IsInTaskGroup, [group.0, task.0 as u64, 0, 0, 0, 0, 0])?;
    Ok(out[0] != 0)
}

/// Registers `port` to receive a notification (with `mask` folded into the
/// posted bits) whenever any member of `group` changes liveness.
#[inline(always)]
pub fn sys_set_notify_mask(
    group: TaskGroupId,
    port: PortId,
    mask: u32,
) -> Result<(), ErrorKind> {
    raw1(Sysnum::SetNotifyMask, [group.0, port.0, mask as u64, 0, 0, 0, 0])?;
    Ok(())
}

/// Asks for a `Timer_Reply` message on `port` at `deadline`, carrying
/// `extra` as its three opaque correlation words. Returns a handle that
/// can be used to match the eventual reply up to this particular request.
#[inline(always)]
pub fn sys_request_timer(
    deadline: u64,
    port: PortId,
    extra: [u32; 3],
) -> Result<u64, ErrorKind> {
    let out = raw1(
        Sysnum::RequestTimer,
        [
            deadline,
            port.0,
            extra[0] as u64,
            extra[1] as u64,
            extra[2] as u64,
            0,
            0,
        ],
    )?;
    Ok(out[0])
}

#[inline(always)]
pub fn sys_set_affinity(task: TaskId, affinity: u32) -> Result<(), ErrorKind> {
    raw1(Sysnum::SetAffinity, [task.0 as u64, affinity as u64, 0, 0, 0, 0, 0])?;
    Ok(())
}

#[inline(always)]
pub fn sys_yield() {
    let _ = raw1(Sysnum::Yield, [0; 7]);
}

#[inline(always)]
pub fn sys_pause() {
    let _ = raw1(Sysnum::Pause, [0; 7]);
}

#[inline(always)]
pub fn sys_resume(task: TaskId) -> Result<(), ErrorKind> {
    raw1(Sysnum::Resume, [task.0 as u64, 0, 0, 0, 0, 0, 0])?;
    Ok(())
}

#[inline(always)]
pub fn sys_kill(task: TaskId) -> Result<(), ErrorKind> {
    raw1(Sysnum::Kill, [task.0 as u64, 0, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Creates a right of `kind` over `port`, usable by this task (or anything
/// it hands the id to within its own namespace) to send through.
#[inline(always)]
pub fn sys_create_right(port: PortId, kind: RightKind) -> Result<RightId, ErrorKind> {
    let out = raw1(Sysnum::CreateRight, [port.0, kind as u64, 0, 0, 0, 0, 0])?;
    Ok(RightId(out[0] as u32))
}

#[inline(always)]
pub fn sys_delete_right(right: RightId) -> Result<(), ErrorKind> {
    raw1(Sysnum::DeleteRight, [right.0 as u64, 0, 0, 0, 0, 0, 0])?;
    Ok(())
}

/// Checks which of the rights attached to the last message popped by
/// `sys_get_first_message` are still alive, one bit per slot (bit `i` set
/// means slot `i`'s right survived until this call).
#[inline(always)]
pub fn sys_accept_rights() -> u64 {
    raw0(Sysnum::AcceptRights, [0; 7])[0]
}

/// Issues the raw syscall and folds `ret0` into a `Result`, per the ABI
/// convention: `0` is success, anything else is a negated errno.
fn raw1(nr: Sysnum, args: [u64; 7]) -> Result<[u64; 5], ErrorKind> {
    let out = unsafe { raw_syscall(nr as u32, &args) };
    let code = out[0] as i64 as i32;
    if code == 0 {
        Ok([out[1], out[2], out[3], out[4], out[5]])
    } else {
        Err(ErrorKind::from_negated_errno(code))
    }
}

/// Issues syscall `nr` and returns its payload registers directly, with no
/// interpretation of `ret0`. Reserved for the handful of calls that have
/// no failure path in `kern::syscalls` at all (they only ever read state
/// or hand out a fresh id).
#[inline(always)]
fn raw0(nr: Sysnum, args: [u64; 7]) -> [u64; 5] {
    let out = unsafe { raw_syscall(nr as u32, &args) };
    [out[1], out[2], out[3], out[4], out[5]]
}

/// Low-level entry point. Traps to the kernel with syscall number `nr` and
/// the seven argument words in `args`, and returns the six result words
/// (`ret0` through `ret5`) the kernel wrote back.
///
/// # Safety
///
/// Always safe to call: the kernel validates every argument before acting
/// on it. This is only `unsafe` because it's implemented by handing raw
/// memory addresses to a naked asm trampoline, which the compiler can't
/// check.
#[inline(always)]
unsafe fn raw_syscall(nr: u32, args: &[u64; 7]) -> [u64; 6] {
    let mut out = [0u64; 6];
    raw_syscall_stub(nr, args.as_ptr(), out.as_mut_ptr());
    out
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        #[unsafe(naked)]
        unsafe extern "C" fn raw_syscall_stub(_nr: u32, _args: *const u64, _out: *mut u64) {
            core::arch::naked_asm!(
                // System V: edi = nr, rsi = args, rdx = out.
                "push rbx",
                "push rbp",
                "push r12",
                "push r13",
                "push r14",
                "push r15",
                "push rdx",
                "mov r11, rsi",
                "mov eax, edi",
                "mov rdi, [r11 + 0]",
                "mov rsi, [r11 + 8]",
                "mov rdx, [r11 + 16]",
                "mov r10, [r11 + 24]",
                "mov r8,  [r11 + 32]",
                "mov r9,  [r11 + 40]",
                "mov r12, [r11 + 48]",
                "syscall",
                "pop r11",
                "mov [r11 + 0],  rax",
                "mov [r11 + 8],  rbx",
                "mov [r11 + 16], rbp",
                "mov [r11 + 24], r13",
                "mov [r11 + 32], r14",
                "mov [r11 + 40], r15",
                "pop r15",
                "pop r14",
                "pop r13",
                "pop r12",
                "pop rbp",
                "pop rbx",
                "ret",
            )
        }
    } else if #[cfg(target_arch = "x86")] {
        #[unsafe(naked)]
        unsafe extern "C" fn raw_syscall_stub(_nr: u32, _args: *const u64, _out: *mut u64) {
            core::arch::naked_asm!(
                // cdecl: [esp+4]=nr, [esp+8]=args, [esp+12]=out, after the
                // four pushes below those shift to +20/+24/+28. Arguments
                // and results are `u64`-strided (8 bytes apart) to match
                // every other architecture's stub, even though each value
                // here only ever carries a 32-bit payload in its low half.
                "push ebx",
                "push ebp",
                "push esi",
                "push edi",
                "mov eax, [esp + 20]",
                "mov ecx, [esp + 24]",
                "mov edi, [ecx + 0]",
                "mov esi, [ecx + 8]",
                "mov edx, [ecx + 16]",
                "mov ebx, [ecx + 32]",
                "mov ebp, [ecx + 40]",
                "push dword ptr [ecx + 24]",
                "pop ecx",
                "int 0x80",
                "mov ebp, [esp + 28]",
                "mov [ebp + 0],  eax",
                "mov [ebp + 8],  ebx",
                "mov [ebp + 16], ecx",
                "mov [ebp + 24], edx",
                "mov [ebp + 32], esi",
                "mov [ebp + 40], edi",
                "pop edi",
                "pop esi",
                "pop ebp",
                "pop ebx",
                "ret",
            )
        }
    } else if #[cfg(target_arch = "aarch64")] {
        #[unsafe(naked)]
        unsafe extern "C" fn raw_syscall_stub(_nr: u32, _args: *const u64, _out: *mut u64) {
            core::arch::naked_asm!(
                // AAPCS64: x0 = nr, x1 = args, x2 = out. x9/x10 are
                // caller-saved temporaries, free to use without saving.
                "mov x9, x1",
                "mov x10, x2",
                "mov w8, w0",
                "ldr x0, [x9, #0]",
                "ldr x1, [x9, #8]",
                "ldr x2, [x9, #16]",
                "ldr x3, [x9, #24]",
                "ldr x4, [x9, #32]",
                "ldr x5, [x9, #40]",
                "ldr x6, [x9, #48]",
                "svc #0",
                "str x0, [x10, #0]",
                "str x1, [x10, #8]",
                "str x2, [x10, #16]",
                "str x3, [x10, #24]",
                "str x4, [x10, #32]",
                "str x5, [x10, #40]",
                "ret",
            )
        }
    } else if #[cfg(target_arch = "riscv64")] {
        #[unsafe(naked)]
        unsafe extern "C" fn raw_syscall_stub(_nr: u32, _args: *const u64, _out: *mut u64) {
            core::arch::naked_asm!(
                // a0 = nr, a1 = args, a2 = out. t0/t1 are caller-saved.
                "mv t0, a1",
                "mv t1, a2",
                "mv a7, a0",
                "ld a0, 0(t0)",
                "ld a1, 8(t0)",
                "ld a2, 16(t0)",
                "ld a3, 24(t0)",
                "ld a4, 32(t0)",
                "ld a5, 40(t0)",
                "ld a6, 48(t0)",
                "ecall",
                "sd a0, 0(t1)",
                "sd a1, 8(t1)",
                "sd a2, 16(t1)",
                "sd a3, 24(t1)",
                "sd a4, 32(t1)",
                "sd a5, 40(t1)",
                "ret",
            )
        }
    } else if #[cfg(target_arch = "loongarch64")] {
        #[unsafe(naked)]
        unsafe extern "C" fn raw_syscall_stub(_nr: u32, _args: *const u64, _out: *mut u64) {
            core::arch::naked_asm!(
                // a0 = nr, a1 = args, a2 = out. t0/t1 are caller-saved.
                "move $t0, $a1",
                "move $t1, $a2",
                "move $a7, $a0",
                "ld.d $a0, $t0, 0",
                "ld.d $a1, $t0, 8",
                "ld.d $a2, $t0, 16",
                "ld.d $a3, $t0, 24",
                "ld.d $a4, $t0, 32",
                "ld.d $a5, $t0, 40",
                "ld.d $a6, $t0, 48",
                "syscall 0",
                "st.d $a0, $t1, 0",
                "st.d $a1, $t1, 8",
                "st.d $a2, $t1, 16",
                "st.d $a3, $t1, 24",
                "st.d $a4, $t1, 32",
                "st.d $a5, $t1, 40",
                "ret",
            )
        }
    } else {
        compile_error!("userlib has no raw_syscall_stub for this target architecture");
    }
}
