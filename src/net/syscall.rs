//! Socket syscalls accepted by the engine and the values they complete with.

use super::Fd;
use crate::protocol::SockAddrIn;

/// A socket syscall issued by a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syscall {
    /// Allocates a new socket descriptor.
    Socket,
    /// Assigns a local address to a socket.
    Bind {
        /// Socket descriptor.
        fd: Fd,
        /// Raw `sockaddr_in`, stored verbatim.
        addr: SockAddrIn,
    },
    /// Marks a bound socket as passive.
    Listen {
        /// Socket descriptor.
        fd: Fd,
        /// Maximum number of pending and ready children.
        backlog: usize,
    },
    /// Waits for an established child connection.
    Accept {
        /// Listening socket descriptor.
        fd: Fd,
    },
    /// Opens a connection to a remote address.
    Connect {
        /// Socket descriptor.
        fd: Fd,
        /// Remote `sockaddr_in`.
        addr: SockAddrIn,
    },
    /// Reads up to `len` received bytes.
    Read {
        /// Socket descriptor.
        fd: Fd,
        /// Maximum number of bytes to return.
        len: usize,
    },
    /// Sends `data`, completing once the peer has acknowledged all of it.
    Write {
        /// Socket descriptor.
        fd: Fd,
        /// Bytes to send.
        data: Vec<u8>,
    },
    /// Releases a descriptor.
    Close {
        /// Socket descriptor.
        fd: Fd,
    },
    /// Returns the local address.
    GetSockName {
        /// Socket descriptor.
        fd: Fd,
    },
    /// Returns the peer address.
    GetPeerName {
        /// Socket descriptor.
        fd: Fd,
    },
}

impl Syscall {
    /// Returns the syscall's name.
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::Socket => "socket",
            Syscall::Bind { .. } => "bind",
            Syscall::Listen { .. } => "listen",
            Syscall::Accept { .. } => "accept",
            Syscall::Connect { .. } => "connect",
            Syscall::Read { .. } => "read",
            Syscall::Write { .. } => "write",
            Syscall::Close { .. } => "close",
            Syscall::GetSockName { .. } => "getsockname",
            Syscall::GetPeerName { .. } => "getpeername",
        }
    }
}

/// Output returned alongside a syscall's result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Output {
    /// No output.
    #[default]
    None,
    /// A socket address (`accept`, `getsockname`, `getpeername`).
    Addr(SockAddrIn),
    /// Received bytes (`read`).
    Bytes(Vec<u8>),
}

/// Final result of a syscall. A negative `result` means failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Return value: a descriptor, a byte count, `0` or `-1`.
    pub result: i32,
    /// Additional output.
    pub output: Output,
}

impl Completion {
    /// A successful completion with no output.
    pub fn value(result: i32) -> Self {
        Self {
            result,
            output: Output::None,
        }
    }

    /// A successful completion carrying output.
    pub fn with_output(result: i32, output: Output) -> Self {
        Self { result, output }
    }

    /// A failed completion.
    pub fn failed() -> Self {
        Self::value(-1)
    }

    /// Returns `true` if the call succeeded.
    pub fn is_ok(&self) -> bool {
        self.result >= 0
    }

    /// Returns the address output, if any.
    pub fn addr(&self) -> Option<SockAddrIn> {
        match self.output {
            Output::Addr(addr) => Some(addr),
            _ => None,
        }
    }

    /// Returns the byte output, if any.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.output {
            Output::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}
