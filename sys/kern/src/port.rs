// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ports, rights, and the queued asynchronous message fabric: spec §4.1.
//!
//! Unlike the rendezvous model this kernel's ancestors used, a `send` never
//! blocks the sender and a message is never paired with a specific `recv` --
//! it sits in the destination port's queue until some task calls
//! `get_first_message` on that port. Blocking is confined to the receiver,
//! who parks in `SchedState::BlockedOnPort` when its port is empty, and to
//! `get_right_by_name`, which parks in `BlockedOnNamedPort` until a matching
//! name is published.

use abi::{
    AttachedRights, ErrorKind, MessageInfo, PortId, RightId, RightKind, TaskId,
};
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::spinlock::Spinlock;

/// One message sitting in a port's queue, awaiting `get_first_message`.
struct QueuedMessage {
    sender: TaskId,
    right: RightId,
    payload: Vec<u8>,
    attached: AttachedRights,
}

#[derive(Default)]
struct PortState {
    queue: VecDeque<QueuedMessage>,
}

#[derive(Clone, Copy)]
struct RightRecord {
    port: PortId,
    kind: RightKind,
    /// Cleared once a `SendOnce` right is consumed, or `delete_right` is
    /// called. A dead record's slot is never reused; lookups on a dead
    /// `RightId` report `NotFound`.
    alive: bool,
}

#[derive(Default)]
struct PortTable {
    next_port: u64,
    next_right: u32,
    ports: Vec<(PortId, PortState)>,
    rights: Vec<(RightId, RightRecord)>,
    names: Vec<(Vec<u8>, PortId)>,
    /// Tasks parked in `get_right_by_name`, waiting for `name` to be
    /// published. Woken (and removed) by `name_port`.
    pending_lookups: Vec<(Vec<u8>, TaskId)>,
}

impl PortTable {
    fn port_mut(&mut self, id: PortId) -> Option<&mut PortState> {
        self.ports.iter_mut().find(|(p, _)| *p == id).map(|(_, s)| s)
    }

    fn right(&self, id: RightId) -> Option<RightRecord> {
        self.rights
            .iter()
            .find(|(r, _)| *r == id)
            .map(|(_, rec)| *rec)
            .filter(|rec| rec.alive)
    }

    /// Looks up `id` distinguishing "never existed" from "existed but was
    /// consumed/deleted": a dead right reports `Closed` (-> `EBADF` at the
    /// syscall boundary, per spec §8 scenario 6's literal "further send
    /// returns EBADF"), while an unknown id reports `NotFound` (-> `ENOENT`).
    fn right_checked(&self, id: RightId) -> Result<RightRecord, ErrorKind> {
        match self.rights.iter().find(|(r, _)| *r == id).map(|(_, rec)| *rec) {
            Some(rec) if rec.alive => Ok(rec),
            Some(_) => Err(ErrorKind::Closed),
            None => Err(ErrorKind::NotFound),
        }
    }
}

static PORTS: Spinlock<PortTable> = Spinlock::new(PortTable {
    next_port: 1,
    next_right: 1,
    ports: Vec::new(),
    rights: Vec::new(),
    names: Vec::new(),
    pending_lookups: Vec::new(),
});

/// Allocates a fresh, empty port. Ports are never destroyed individually;
/// they live for the duration of the boot and are reclaimed in bulk when
/// their owning task group is torn down (not yet implemented: see
/// `DESIGN.md`).
pub fn create_port() -> PortId {
    let mut t = PORTS.lock();
    let id = PortId(t.next_port);
    t.next_port += 1;
    t.ports.push((id, PortState::default()));
    id
}

/// Allocates a fresh port together with an initial send-many right over it,
/// under one lock acquisition -- the `create_port(owner) → port_id,
/// right_id(send-many)` primitive spec §4.1 describes, so a caller never
/// observes a port that exists but has no way to name a right to it.
pub fn create_port_with_right() -> (PortId, RightId) {
    let mut t = PORTS.lock();
    let port = PortId(t.next_port);
    t.next_port += 1;
    t.ports.push((port, PortState::default()));
    let right = RightId(t.next_right);
    t.next_right += 1;
    t.rights.push((right, RightRecord { port, kind: RightKind::SendMany, alive: true }));
    (port, right)
}

/// Mints a new right over `port`. Fails with `NotFound` if the port is
/// unknown.
pub fn create_right(port: PortId, kind: RightKind) -> Result<RightId, ErrorKind> {
    let mut t = PORTS.lock();
    if t.port_mut(port).is_none() {
        return Err(ErrorKind::NotFound);
    }
    let id = RightId(t.next_right);
    t.next_right += 1;
    t.rights.push((id, RightRecord { port, kind, alive: true }));
    Ok(id)
}

/// Permanently revokes `right`. Idempotent in the sense that deleting an
/// already-dead right is `NotFound`, not a panic.
pub fn delete_right(right: RightId) -> Result<(), ErrorKind> {
    let mut t = PORTS.lock();
    t.right_checked(right)?;
    let rec = t
        .rights
        .iter_mut()
        .find(|(r, _)| *r == right)
        .map(|(_, rec)| rec)
        .unwrap();
    rec.alive = false;
    Ok(())
}

/// Outcome of a successful `send`: names the port that may now have a
/// blocked reader to deliver to (the caller holds the task table and can
/// scan it for a task `BlockedOnPort` this id).
pub struct SendOutcome {
    pub port: PortId,
}

/// Enqueues a message through `right`. `SendOnce` rights are consumed
/// (marked dead) on success, whether or not anyone is currently listening.
pub fn send(
    sender: TaskId,
    right: RightId,
    payload: &[u8],
    attached: AttachedRights,
) -> Result<SendOutcome, ErrorKind> {
    let mut t = PORTS.lock();
    let rec = t.right_checked(right)?;

    if t.port_mut(rec.port).is_none() {
        return Err(ErrorKind::PortClosed);
    }

    if rec.kind == RightKind::SendOnce {
        if let Some((_, r)) = t.rights.iter_mut().find(|(r, _)| *r == right) {
            r.alive = false;
        }
    }

    let port_state = t.port_mut(rec.port).unwrap();
    port_state.queue.push_back(QueuedMessage {
        sender,
        right,
        payload: payload.to_vec(),
        attached,
    });

    Ok(SendOutcome { port: rec.port })
}

/// Enqueues a kernel-originated message (no sending right involved): used
/// for interrupt delivery, timer replies, and named-port notifications.
/// Always addressed with `RightId::KERNEL` and `TaskId::KERNEL` as sender.
pub fn send_from_kernel(
    port: PortId,
    payload: &[u8],
) -> Result<SendOutcome, ErrorKind> {
    let mut t = PORTS.lock();
    let port_state = t.port_mut(port).ok_or(ErrorKind::NotFound)?;
    port_state.queue.push_back(QueuedMessage {
        sender: TaskId::KERNEL,
        right: RightId::KERNEL,
        payload: payload.to_vec(),
        attached: [None; abi::MAX_ATTACHED_RIGHTS],
    });
    Ok(SendOutcome { port })
}

/// Reports the head message's metadata without consuming it. `None` if the
/// port is empty.
pub fn get_message_info(port: PortId) -> Result<Option<MessageInfo>, ErrorKind> {
    let mut t = PORTS.lock();
    let state = t.port_mut(port).ok_or(ErrorKind::NotFound)?;
    Ok(state.queue.front().map(|m| MessageInfo {
        sender: m.sender,
        right: m.right,
        size: m.payload.len(),
        attached_count: m.attached.iter().filter(|r| r.is_some()).count() as u8,
    }))
}

/// Pops the head message of `port` and copies as much of its payload as
/// fits into `buf`. Returns the message's full metadata (`size` reflects the
/// true payload length even if `buf` was shorter) and the rights still
/// attached. Errors with `NoMessages` if the queue was empty.
pub fn get_first_message(
    port: PortId,
    buf: &mut [u8],
) -> Result<(MessageInfo, AttachedRights), ErrorKind> {
    let mut t = PORTS.lock();
    let state = t.port_mut(port).ok_or(ErrorKind::NotFound)?;
    let msg = state.queue.pop_front().ok_or(ErrorKind::NoMessages)?;
    let n = buf.len().min(msg.payload.len());
    buf[..n].copy_from_slice(&msg.payload[..n]);
    let info = MessageInfo {
        sender: msg.sender,
        right: msg.right,
        size: msg.payload.len(),
        attached_count: msg.attached.iter().filter(|r| r.is_some()).count() as u8,
    };
    Ok((info, msg.attached))
}

/// Validates that `rights` (as reported by a prior `get_first_message`) are
/// still alive and transfers ownership bookkeeping to the accepting task.
/// In this kernel rights are not task-scoped objects in their own right
/// (ownership is implied by who knows the `RightId`), so `accept_rights` is
/// a liveness check: it reports which of the slots still name a live right.
pub fn accept_rights(rights: AttachedRights) -> [bool; abi::MAX_ATTACHED_RIGHTS] {
    let t = PORTS.lock();
    let mut out = [false; abi::MAX_ATTACHED_RIGHTS];
    for (i, r) in rights.iter().enumerate() {
        if let Some(r) = r {
            out[i] = t.right(*r).is_some();
        }
    }
    out
}

/// Publishes `name` -> `port` in the flat named-port namespace, waking any
/// task parked in `get_right_by_name` waiting on that exact name. Returns
/// `Exists` if the name is already bound.
pub fn name_port(name: &[u8], port: PortId) -> Result<Vec<TaskId>, ErrorKind> {
    let mut t = PORTS.lock();
    if t.names.iter().any(|(n, _)| n.as_slice() == name) {
        return Err(ErrorKind::Exists);
    }
    t.names.push((name.to_vec(), port));
    let mut woken = Vec::new();
    t.pending_lookups.retain(|(n, task)| {
        if n.as_slice() == name {
            woken.push(*task);
            false
        } else {
            true
        }
    });
    Ok(woken)
}

/// Non-blocking name resolution. `Ok(Some(port))` if bound, `Ok(None)` if
/// not yet bound (caller should register a pending lookup and block).
pub fn lookup_name(name: &[u8]) -> Option<PortId> {
    let t = PORTS.lock();
    t.names.iter().find(|(n, _)| n.as_slice() == name).map(|(_, p)| *p)
}

/// Parks `task` to be woken when `name` is eventually published.
pub fn register_pending_lookup(name: &[u8], task: TaskId) {
    let mut t = PORTS.lock();
    t.pending_lookups.push((name.to_vec(), task));
}

/// Drops a previously registered pending lookup for `task`, e.g. because it
/// was killed while blocked. No-op if none was registered.
pub fn cancel_pending_lookup(task: TaskId) {
    let mut t = PORTS.lock();
    t.pending_lookups.retain(|(_, t2)| *t2 != task);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_port_with_right_mints_a_usable_send_many_right() {
        let (port, right) = create_port_with_right();
        send(TaskId(9), right, b"hi", [None; abi::MAX_ATTACHED_RIGHTS]).unwrap();
        let mut buf = [0u8; 2];
        let (info, _) = get_first_message(port, &mut buf).unwrap();
        assert_eq!(info.sender, TaskId(9));
        assert_eq!(&buf, b"hi");
        // send-many: the right survives a second send.
        send(TaskId(9), right, b"ok", [None; abi::MAX_ATTACHED_RIGHTS]).unwrap();
    }

    #[test]
    fn send_and_receive_round_trip() {
        let port = create_port();
        let right = create_right(port, RightKind::SendMany).unwrap();
        send(TaskId(7), right, b"hello", [None; abi::MAX_ATTACHED_RIGHTS]).unwrap();

        let info = get_message_info(port).unwrap().unwrap();
        assert_eq!(info.size, 5);

        let mut buf = [0u8; 5];
        let (info, _) = get_first_message(port, &mut buf).unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(&buf, b"hello");

        assert!(get_message_info(port).unwrap().is_none());
    }

    #[test]
    fn send_once_right_is_consumed() {
        let port = create_port();
        let right = create_right(port, RightKind::SendOnce).unwrap();
        send(TaskId(1), right, b"x", [None; abi::MAX_ATTACHED_RIGHTS]).unwrap();
        // Spec §8 scenario 6: reusing a consumed send-once right reports
        // `Closed` (EBADF at the syscall boundary), not `NotFound`.
        assert_eq!(
            send(TaskId(1), right, b"y", [None; abi::MAX_ATTACHED_RIGHTS])
                .unwrap_err(),
            ErrorKind::Closed
        );
    }

    #[test]
    fn delete_right_then_send_fails() {
        let port = create_port();
        let right = create_right(port, RightKind::SendMany).unwrap();
        delete_right(right).unwrap();
        assert_eq!(
            send(TaskId(1), right, b"x", [None; abi::MAX_ATTACHED_RIGHTS])
                .unwrap_err(),
            ErrorKind::Closed
        );
    }

    #[test]
    fn name_port_wakes_pending_lookup() {
        let port = create_port();
        register_pending_lookup(b"svc.foo", TaskId(3));
        let woken = name_port(b"svc.foo", port).unwrap();
        assert_eq!(woken, alloc::vec![TaskId(3)]);
        assert_eq!(lookup_name(b"svc.foo"), Some(port));
    }
}
