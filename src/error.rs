//! Error types for the TCP engine, covering frame parsing, header
//! construction, socket operations, and configuration.

use std::{error, fmt, io, result};

use crate::protocol::SocketAddr;
use crate::protocol::fsm::ConnectionState;

/// A convenience wrapper around `Result` for `simtcp::Error`.
pub type Result<T> = result::Result<T, Error>;

/// Set of errors that can occur in the TCP engine.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error while reading or writing a frame.
    Io(io::Error),
    /// Error parsing an inbound frame.
    Parse(ParseError),
    /// Error creating or manipulating an IPv4 or TCP header.
    Header(HeaderError),
    /// A socket operation could not be carried out.
    Socket(SocketError),
    /// The engine configuration is invalid.
    Config(ConfigError),
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Error {
        Error::Header(err)
    }
}

impl From<SocketError> for Error {
    fn from(err: SocketError) -> Error {
        Error::Socket(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Error {
        Error::Config(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref err) => fmt::Display::fmt(err, f),
            Error::Parse(ref err) => fmt::Display::fmt(err, f),
            Error::Header(ref err) => fmt::Display::fmt(err, f),
            Error::Socket(ref err) => fmt::Display::fmt(err, f),
            Error::Config(ref err) => fmt::Display::fmt(err, f),
        }
    }
}

/// Error occurred while trying to parse an Ethernet/IPv4/TCP frame.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ParseError {
    /// Input buffer not within the valid range for an IPv4/TCP header.
    InvalidBufferLength { provided: usize, min: u16, max: u16 },
    /// Invalid IPv4 version.
    InvalidVersion { provided: u8, expected: u8 },
    /// Invalid IPv4 IHL.
    InvalidIhl { provided: u8, expected: u8 },
    /// Invalid IPv4 total length.
    ///
    /// Value provided is less than `IHL << 2`.
    InvalidTotalLength { provided: u16, expected: u8 },
    /// Invalid IPv4 upper-layer protocol (undefined in RFC 1700).
    InvalidProtocol(u8),
    /// The datagram is a fragment; IPv4 reassembly is not supported.
    Fragmented { offset: u16 },
    /// Invalid TCP data offset.
    InvalidDataOffset { provided: u16, min: u16, max: u16 },
    /// Mismatch between the provided and expected TCP header length.
    ///
    /// Value provided is less than `data_offset << 2`.
    HeaderLengthMismatch { provided: usize, expected: u16 },
    /// The frame ends before the length announced by the IPv4 header.
    TruncatedFrame { provided: usize, expected: usize },
    /// The IPv4 header checksum does not match its contents.
    InvalidIpv4Checksum { provided: u16, computed: u16 },
    /// The TCP checksum does not match the pseudo-header, header and payload.
    InvalidTcpChecksum { provided: u16, computed: u16 },
}

impl error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::InvalidBufferLength { provided, min, max } => {
                write!(
                    f,
                    "invalid header length: {provided} bytes (not within the valid range: {min}..={max} bytes)"
                )
            }
            ParseError::InvalidVersion { provided, expected } => {
                write!(
                    f,
                    "invalid IP version: IPv{provided} (must be IPv{expected})"
                )
            }
            ParseError::InvalidIhl { provided, expected } => {
                write!(
                    f,
                    "invalid IPv4 IHL: {provided} (must be {expected}, IPv4 options are not supported)"
                )
            }
            ParseError::InvalidTotalLength { provided, expected } => {
                write!(
                    f,
                    "invalid IPv4 total length: {provided} bytes (less than indicated by IHL: {expected} bytes)"
                )
            }
            ParseError::InvalidProtocol(proto) => {
                write!(
                    f,
                    "invalid IPv4 upper-layer protocol: {proto} (only ICMP, TCP and UDP are recognized)"
                )
            }
            ParseError::Fragmented { offset } => {
                write!(
                    f,
                    "unsupported IPv4 fragment (offset: {offset}, or more fragments follow)"
                )
            }
            ParseError::InvalidDataOffset { provided, min, max } => {
                write!(
                    f,
                    "invalid TCP data offset: {provided} (not within the valid range: {min}..={max})"
                )
            }
            ParseError::HeaderLengthMismatch { provided, expected } => {
                write!(
                    f,
                    "invalid TCP header length: {provided} bytes (less than indicated by data offset: {expected} bytes)"
                )
            }
            ParseError::TruncatedFrame { provided, expected } => {
                write!(
                    f,
                    "truncated frame: {provided} bytes (IPv4 total length requires {expected} bytes)"
                )
            }
            ParseError::InvalidIpv4Checksum { provided, computed } => {
                write!(
                    f,
                    "invalid IPv4 header checksum: 0x{provided:04x} (computed 0x{computed:04x})"
                )
            }
            ParseError::InvalidTcpChecksum { provided, computed } => {
                write!(
                    f,
                    "invalid TCP checksum: 0x{provided:04x} (computed 0x{computed:04x})"
                )
            }
        }
    }
}

/// Error occurred while trying to create or manipulate an IPv4 or TCP header.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum HeaderError {
    /// Invalid payload length for an IPv4 header.
    PayloadTooLarge { provided: usize, max: u16 },
}

impl error::Error for HeaderError {}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HeaderError::PayloadTooLarge { provided, max } => {
                write!(
                    f,
                    "failed to set IPv4 payload length: {provided} bytes (exceeds maximum allowed {max} bytes)"
                )
            }
        }
    }
}

/// Error occurred while servicing a socket system call.
///
/// Every variant completes the call with `-1`.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum SocketError {
    /// The descriptor is not open in the calling process.
    BadDescriptor { pid: u32, fd: i32 },
    /// The socket already has a local address.
    AlreadyBound,
    /// Another socket of the same process holds an overlapping address.
    AddressInUse(SocketAddr),
    /// The operation requires a bound socket.
    NotBound,
    /// The operation is not permitted in the socket's current state.
    InvalidState {
        op: &'static str,
        state: ConnectionState,
    },
    /// The socket has no peer.
    NotConnected,
    /// An operation of the same kind is already waiting on this socket.
    OperationPending(&'static str),
    /// No local address can reach the destination.
    NoRoute([u8; 4]),
    /// Every port in the ephemeral range is taken.
    PortsExhausted,
    /// The peer never answered the connection request.
    ConnectionRefused { attempts: u32 },
}

impl error::Error for SocketError {}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SocketError::BadDescriptor { pid, fd } => {
                write!(f, "bad file descriptor: {fd} (pid {pid})")
            }
            SocketError::AlreadyBound => write!(f, "socket is already bound"),
            SocketError::AddressInUse(addr) => write!(f, "address already in use: {addr}"),
            SocketError::NotBound => write!(f, "socket is not bound"),
            SocketError::InvalidState { op, state } => {
                write!(f, "{op} not permitted in state {state:?}")
            }
            SocketError::NotConnected => write!(f, "socket is not connected"),
            SocketError::OperationPending(op) => {
                write!(f, "another {op} is already pending on this socket")
            }
            SocketError::NoRoute(addr) => {
                write!(
                    f,
                    "no route to host: {}.{}.{}.{}",
                    addr[0], addr[1], addr[2], addr[3]
                )
            }
            SocketError::PortsExhausted => write!(f, "no ephemeral ports available"),
            SocketError::ConnectionRefused { attempts } => {
                write!(f, "connection request unanswered after {attempts} attempts")
            }
        }
    }
}

/// Error occurred while validating an engine configuration.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ConfigError {
    /// The MSS does not fit a single frame.
    InvalidMss { provided: usize, max: usize },
    /// The receive buffer must hold at least one byte.
    ZeroBufferCapacity,
    /// A smoothing constant lies outside `(0, 1]`.
    InvalidSmoothing { name: &'static str, value: f64 },
    /// The minimum retransmission timeout exceeds the maximum.
    InvalidRtoBounds,
    /// The continuation poll interval must be non-zero.
    ZeroPollInterval,
}

impl error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConfigError::InvalidMss { provided, max } => {
                write!(
                    f,
                    "invalid MSS: {provided} bytes (not within the valid range: 1..={max} bytes)"
                )
            }
            ConfigError::ZeroBufferCapacity => {
                write!(f, "receive buffer capacity must be greater than 0")
            }
            ConfigError::InvalidSmoothing { name, value } => {
                write!(f, "invalid {name}: {value} (must lie in (0, 1])")
            }
            ConfigError::InvalidRtoBounds => {
                write!(f, "minimum RTO must not exceed maximum RTO")
            }
            ConfigError::ZeroPollInterval => {
                write!(f, "poll interval must be greater than 0")
            }
        }
    }
}
