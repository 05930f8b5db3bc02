// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt-to-port dispatcher: spec §4.5.
//!
//! A GSI is bound to at most one port at a time. When it fires, the
//! interrupt is masked at the source (so it can't re-fire until handled)
//! and a `Kernel_Interrupt` message naming the GSI is enqueued on the bound
//! port. The handling task later calls `CompleteInterrupt`, which unmasks
//! the source -- this is the same mask-notify-unmask handshake the
//! platform's own GSI routing (`arch::{mask,unmask,end_of_interrupt}`)
//! expects.

use abi::{ErrorKind, Gsi, KernelInterrupt, MessageKind, PortId};
use alloc::vec::Vec;
use zerocopy::IntoBytes;

use crate::spinlock::Spinlock;

struct Binding {
    gsi: Gsi,
    port: PortId,
    /// Set while the bound task hasn't yet called `CompleteInterrupt`;
    /// a second firing while pending is coalesced, not queued twice.
    pending: bool,
}

struct IrqState {
    bindings: Vec<Binding>,
}

static IRQ: Spinlock<IrqState> = Spinlock::new(IrqState {
    bindings: Vec::new(),
});

/// Binds `gsi` to `port`. Fails with `Exists` if the GSI is already bound;
/// the caller must `unregister` first to rebind.
pub fn register(gsi: Gsi, port: PortId) -> Result<(), ErrorKind> {
    let mut s = IRQ.lock();
    if s.bindings.iter().any(|b| b.gsi == gsi) {
        return Err(ErrorKind::Exists);
    }
    s.bindings.push(Binding {
        gsi,
        port,
        pending: false,
    });
    crate::arch::unmask_gsi(gsi);
    Ok(())
}

/// Releases `gsi`'s binding, masking it at the source.
pub fn unregister(gsi: Gsi) -> Result<(), ErrorKind> {
    let mut s = IRQ.lock();
    let before = s.bindings.len();
    s.bindings.retain(|b| b.gsi != gsi);
    if s.bindings.len() == before {
        return Err(ErrorKind::NotFound);
    }
    crate::arch::mask_gsi(gsi);
    Ok(())
}

/// Called from the platform's low-level interrupt entry point once it has
/// identified which GSI fired. Masks the source and, if bound, enqueues a
/// `Kernel_Interrupt` message. Returns `true` if a task needs to be woken
/// (i.e. the message was actually delivered to a port), so the caller can
/// fold that into its `NextTask` decision.
pub fn dispatch(gsi: Gsi) -> bool {
    crate::arch::mask_gsi(gsi);

    let port = {
        let mut s = IRQ.lock();
        let Some(binding) = s.bindings.iter_mut().find(|b| b.gsi == gsi) else {
            // Nobody's listening; there's nothing to mask back on, so
            // re-enable immediately to avoid wedging a shared line.
            crate::arch::unmask_gsi(gsi);
            return false;
        };
        if binding.pending {
            // Already waiting on a CompleteInterrupt; coalesce.
            return false;
        }
        binding.pending = true;
        binding.port
    };

    let msg = KernelInterrupt {
        kind: MessageKind::KERNEL_INTERRUPT,
        interrupt_id: gsi.0,
    };
    crate::port::send_from_kernel(port, msg.as_bytes()).is_ok()
}

/// The bound task's acknowledgement that it has finished handling `gsi`.
/// Unmasks the source so it can fire again.
pub fn complete_interrupt(gsi: Gsi, port: PortId) -> Result<(), ErrorKind> {
    let mut s = IRQ.lock();
    let binding = s
        .bindings
        .iter_mut()
        .find(|b| b.gsi == gsi)
        .ok_or(ErrorKind::NotFound)?;
    if binding.port != port {
        return Err(ErrorKind::Permission);
    }
    if !binding.pending {
        return Err(ErrorKind::BadArgument);
    }
    binding.pending = false;
    crate::arch::unmask_gsi(gsi);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_dispatch_delivers_once_until_completed() {
        let gsi = Gsi(5);
        let port = crate::port::create_port();
        register(gsi, port).unwrap();

        assert!(dispatch(gsi));
        // Second firing while still pending is coalesced.
        assert!(!dispatch(gsi));

        assert!(crate::port::get_message_info(port).unwrap().is_some());

        complete_interrupt(gsi, port).unwrap();
        assert!(dispatch(gsi));
    }

    #[test]
    fn double_register_fails() {
        let gsi = Gsi(9);
        let port = crate::port::create_port();
        register(gsi, port).unwrap();
        assert_eq!(register(gsi, port).unwrap_err(), ErrorKind::Exists);
        unregister(gsi).unwrap();
        register(gsi, port).unwrap();
    }
}
