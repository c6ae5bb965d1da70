//! The host-facing half of the engine.
//!
//! This module connects the per-connection state machines to the outside
//! world: the [Host] collaborators, the syscall surface, timer payloads and
//! the table of sockets owned by each process.

mod host;
pub use host::{Fd, Host, Pid, SyscallHandle, TimerId};

mod syscall;
pub use syscall::{Completion, Output, Syscall};

mod timer;
pub use timer::TimerPayload;

pub mod table;
pub use table::ConnId;

mod engine;
pub use engine::TcpEngine;
