//! Payloads carried by engine timers.

use super::{ConnId, Fd, Pid, SyscallHandle};

/// What to do when a timer armed by the engine expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerPayload {
    /// Re-run a blocked `accept`.
    Accept {
        /// Handle of the blocked call.
        handle: SyscallHandle,
        /// Caller.
        pid: Pid,
        /// Listening descriptor.
        fd: Fd,
    },
    /// Re-run a blocked `read`.
    Read {
        /// Handle of the blocked call.
        handle: SyscallHandle,
        /// Caller.
        pid: Pid,
        /// Socket descriptor.
        fd: Fd,
        /// Requested length.
        len: usize,
    },
    /// Check on, and possibly resend, an active open.
    Connect {
        /// Connection that sent the `SYN`.
        conn: ConnId,
    },
    /// Resend the `SYN_ACK` of a half-open child.
    Handshake {
        /// Child connection.
        conn: ConnId,
    },
    /// An outstanding data segment went unacknowledged.
    Retransmit {
        /// Connection owning the segment.
        conn: ConnId,
    },
}
