// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel log sink.
//!
//! Log lines are buffered (capped, FIFO-dropping) until a task claims the
//! log by calling `SetLogPort`, at which point the buffer is flushed to the
//! claimed port and all further lines are forwarded live as they're
//! produced. Each forwarded chunk is framed as a `WRITE_PLAIN` message:
//! a 4-byte kind tag followed by up to `CHUNK_LEN` bytes of raw text.

use abi::{ErrorKind, MessageKind, PortId};
use alloc::collections::VecDeque;
use core::fmt::Write;

use crate::spinlock::Spinlock;

/// Bytes per forwarded `WRITE_PLAIN` chunk, matching the original logger's
/// framing so downstream consumers don't need to special-case the kernel.
const CHUNK_LEN: usize = 508;

/// Upper bound on bytes retained before a log port is claimed. Once full,
/// the oldest bytes are dropped to make room for new ones.
const BACKLOG_CAP: usize = 16 * 1024;

struct KlogState {
    backlog: VecDeque<u8>,
    port: Option<PortId>,
}

static KLOG: Spinlock<KlogState> = Spinlock::new(KlogState {
    backlog: VecDeque::new(),
    port: None,
});

/// Claims the kernel log for `port`, flushing any buffered backlog to it
/// immediately. Only one port may hold the log at a time; a second call
/// simply re-targets subsequent output (the previous holder gets no further
/// notification, matching the original logger's last-writer-wins policy).
pub fn set_port(port: PortId) -> Result<(), ErrorKind> {
    let backlog: alloc::vec::Vec<u8> = {
        let mut k = KLOG.lock();
        k.port = Some(port);
        k.backlog.drain(..).collect()
    };
    for chunk in backlog.chunks(CHUNK_LEN) {
        send_chunk(port, chunk)?;
    }
    Ok(())
}

fn send_chunk(port: PortId, chunk: &[u8]) -> Result<(), ErrorKind> {
    let mut frame = [0u8; 4 + CHUNK_LEN];
    frame[..4].copy_from_slice(&MessageKind::WRITE_PLAIN.0.to_le_bytes());
    frame[4..4 + chunk.len()].copy_from_slice(chunk);
    crate::port::send_from_kernel(port, &frame[..4 + chunk.len()])?;
    Ok(())
}

/// Appends `bytes` to the log: either forwarded live to the claimed port, or
/// retained in the backlog (oldest-dropped) if none is claimed yet.
pub fn write_bytes(bytes: &[u8]) {
    let port = {
        let mut k = KLOG.lock();
        if k.port.is_none() {
            for &b in bytes {
                if k.backlog.len() >= BACKLOG_CAP {
                    k.backlog.pop_front();
                }
                k.backlog.push_back(b);
            }
        }
        k.port
    };
    if let Some(port) = port {
        for chunk in bytes.chunks(CHUNK_LEN) {
            // A send failure here (port closed mid-flight) is not actionable
            // from inside the logger; drop the chunk rather than panic.
            let _ = send_chunk(port, chunk);
        }
    }
}

struct KlogWriter;

impl Write for KlogWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        write_bytes(s.as_bytes());
        Ok(())
    }
}

/// Formats `args` into the kernel log. Normally reached via `klog::klog!`.
pub fn write_fmt(args: core::fmt::Arguments<'_>) {
    let mut w = KlogWriter;
    let _ = w.write_fmt(args);
}

#[macro_export]
macro_rules! klog {
    ($($arg:tt)*) => {
        $crate::klog::write_fmt(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_caps_and_drops_oldest() {
        let mut k = KlogState {
            backlog: VecDeque::new(),
            port: None,
        };
        for i in 0..(BACKLOG_CAP + 10) {
            if k.backlog.len() >= BACKLOG_CAP {
                k.backlog.pop_front();
            }
            k.backlog.push_back((i % 256) as u8);
        }
        assert_eq!(k.backlog.len(), BACKLOG_CAP);
    }
}
