//! Socket addresses, in both structured and raw `sockaddr_in` form.

use std::fmt;

/// The wildcard IPv4 address.
pub const INADDR_ANY: [u8; 4] = [0; 4];

const SOCKADDR_IN_LEN: usize = 16;

/// An IPv4 address and a port number.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Default)]
pub struct SocketAddr {
    /// IPv4 address.
    pub addr: [u8; 4],
    /// Port number.
    pub port: u16,
}

impl SocketAddr {
    /// Creates a socket address from its parts.
    pub const fn new(addr: [u8; 4], port: u16) -> Self {
        Self { addr, port }
    }

    /// Returns `true` if the address is `INADDR_ANY`.
    pub fn is_unspecified(&self) -> bool {
        self.addr == INADDR_ANY
    }

    /// Returns `true` if a socket bound to `self` would accept traffic for
    /// `local`.
    pub fn accepts(&self, local: SocketAddr) -> bool {
        self.port == local.port && (self.is_unspecified() || self.addr == local.addr)
    }

    /// Returns `true` if two bindings would claim overlapping traffic: the
    /// ports match and the addresses are equal or either is `INADDR_ANY`.
    pub fn overlaps(&self, other: &SocketAddr) -> bool {
        self.port == other.port
            && (self.addr == other.addr || self.is_unspecified() || other.is_unspecified())
    }
}

impl fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}:{}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3], self.port,
        )
    }
}

/// Unique TCP connection, identified by both the source and destination
/// socket addresses.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct Socket {
    /// The source socket address (local IP and port).
    pub src: SocketAddr,
    /// The destination socket address (remote IP and port).
    pub dst: SocketAddr,
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// A `struct sockaddr_in` kept as its raw 16 bytes.
///
/// ```text
/// +--------+--------+--------+--------+
/// |  sin_family     |    sin_port     |
/// +--------+--------+--------+--------+
/// |             sin_addr              |
/// +--------+--------+--------+--------+
/// |             sin_zero              |
/// |                                   |
/// +--------+--------+--------+--------+
/// ```
///
/// `sin_family` is in host byte order, `sin_port` and `sin_addr` are in
/// network byte order. `bind` stores the caller's bytes verbatim, so
/// `getsockname` hands back exactly what was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SockAddrIn([u8; SOCKADDR_IN_LEN]);

impl SockAddrIn {
    /// Size of a `struct sockaddr_in` in bytes.
    pub const LEN: usize = SOCKADDR_IN_LEN;

    /// Wraps raw `sockaddr_in` bytes.
    pub const fn from_bytes(raw: [u8; Self::LEN]) -> Self {
        Self(raw)
    }

    /// Returns the raw `sockaddr_in` bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Returns the `sin_family` field.
    pub fn family(&self) -> u16 {
        u16::from_ne_bytes([self.0[0], self.0[1]])
    }

    /// Returns the `sin_port` field.
    pub fn port(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// Returns the `sin_addr` field.
    pub fn addr(&self) -> [u8; 4] {
        [self.0[4], self.0[5], self.0[6], self.0[7]]
    }

    /// Returns the address and port as a [SocketAddr].
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr(), self.port())
    }
}

impl From<SocketAddr> for SockAddrIn {
    fn from(sock: SocketAddr) -> Self {
        let mut raw = [0u8; Self::LEN];

        raw[0..2].copy_from_slice(&(libc::AF_INET as u16).to_ne_bytes());
        raw[2..4].copy_from_slice(&sock.port.to_be_bytes());
        raw[4..8].copy_from_slice(&sock.addr);

        Self(raw)
    }
}
