//! The services the engine consumes from its environment.

use std::fmt;
use std::time::Duration;

use super::{Completion, TimerPayload};

/// Process identifier of a syscall's caller.
pub type Pid = u32;

/// Per-process socket descriptor.
pub type Fd = i32;

/// Handle of a timer armed through [Host::add_timer].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Opaque token identifying an in-flight syscall, handed back on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyscallHandle(pub u64);

/// Link layer, timer facility and syscall dispatcher of the host the engine
/// runs on.
///
/// Every method is called from within one of the engine's entry points and
/// must not call back into the engine.
pub trait Host {
    /// Transmits a complete Ethernet frame on the named interface.
    fn send_packet(&mut self, interface: &str, frame: &[u8]);

    /// Returns the IPv4 address configured on the interface, if any.
    fn get_local_ip(&self, interface: usize) -> Option<[u8; 4]>;

    /// Returns the index of the interface that routes towards `dst`.
    fn lookup_route(&self, dst: [u8; 4]) -> Option<usize>;

    /// Arms a one-shot timer that hands `payload` back to the engine after
    /// `delay`.
    fn add_timer(&mut self, payload: TimerPayload, delay: Duration) -> TimerId;

    /// Disarms a timer. Cancelling a timer that already fired, or was never
    /// armed, is a no-op.
    fn cancel_timer(&mut self, timer: TimerId);

    /// Delivers the result of a syscall to its caller.
    fn complete_syscall(&mut self, handle: SyscallHandle, completion: Completion);

    /// Returns the current time on the host's clock.
    fn now(&self) -> Duration;
}
