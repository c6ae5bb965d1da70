//! Parsing, serialization, and construction of Ethernet/IPv4/TCP headers.

pub mod checksum;

mod ethernet;
pub use ethernet::EthernetHeader;

mod ipv4;
pub use ipv4::{Ipv4Header, Protocol};

mod tcp;
pub use tcp::TcpHeader;

/// Byte offset of the IPv4 header within a frame.
pub const IP_START: usize = EthernetHeader::HEADER_LEN;

/// Byte offset of the TCP header within a frame.
pub const TCP_START: usize = IP_START + Ipv4Header::MIN_HEADER_LEN as usize;
