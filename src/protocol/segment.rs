//! Construction, serialization and parsing of TCP segments carried in
//! Ethernet/IPv4 frames.

use std::io::Write;

use crate::protocol::headers::{
    EthernetHeader, IP_START, Ipv4Header, Protocol, TCP_START, TcpHeader, checksum,
};
use crate::protocol::{Socket, SocketAddr};
use crate::{ParseError, Result};

/// Fully constructed TCP segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    /// IPv4 header of the segment.
    pub ip: Ipv4Header,
    /// TCP header of the segment.
    pub tcp: TcpHeader,
    /// Payload of the segment.
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Create a new TCP segment given the IPv4/TCP headers and payload.
    pub fn new(ip: Ipv4Header, tcp: TcpHeader, payload: &[u8]) -> Self {
        Self {
            ip,
            tcp,
            payload: payload.into(),
        }
    }

    /// Parses a segment out of a raw frame, validating both checksums.
    ///
    /// Bytes past the IPv4 total length (link padding) are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is truncated, either header is
    /// malformed, the datagram does not carry TCP, or a checksum does not
    /// match.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let min_len = TCP_START + TcpHeader::MIN_HEADER_LEN as usize;

        if frame.len() < min_len {
            return Err(ParseError::TruncatedFrame {
                provided: frame.len(),
                expected: min_len,
            }
            .into());
        }

        let ip = Ipv4Header::try_from(&frame[IP_START..TCP_START])?;

        if ip.protocol() != Protocol::TCP {
            return Err(ParseError::InvalidProtocol(ip.protocol().into()).into());
        }

        if !ip.is_valid_checksum() {
            return Err(ParseError::InvalidIpv4Checksum {
                provided: ip.checksum(),
                computed: ip.compute_checksum(),
            }
            .into());
        }

        let end = IP_START + ip.total_len() as usize;

        if end > frame.len() || end < min_len {
            return Err(ParseError::TruncatedFrame {
                provided: frame.len(),
                expected: end.max(min_len),
            }
            .into());
        }

        let raw_segment = &frame[TCP_START..end];
        let tcp = TcpHeader::try_from(raw_segment)?;

        let computed = checksum::tcp(ip.src(), ip.dst(), ip.protocol().into(), raw_segment);

        if computed != tcp.checksum() {
            return Err(ParseError::InvalidTcpChecksum {
                provided: tcp.checksum(),
                computed,
            }
            .into());
        }

        Ok(Self::new(ip, tcp, &raw_segment[tcp.header_len()..]))
    }

    /// Returns the sender's socket address.
    pub fn src(&self) -> SocketAddr {
        SocketAddr::new(self.ip.src(), self.tcp.src_port())
    }

    /// Returns the receiver's socket address.
    pub fn dst(&self) -> SocketAddr {
        SocketAddr::new(self.ip.dst(), self.tcp.dst_port())
    }

    /// Returns the connection this segment belongs to, seen from the
    /// receiver (`src` is the receiver's local address).
    pub fn receiver_socket(&self) -> Socket {
        Socket {
            src: self.dst(),
            dst: self.src(),
        }
    }

    /// Returns the sequence number just past the last payload octet.
    pub fn end_seq(&self) -> u32 {
        self.tcp
            .seq_number()
            .wrapping_add(self.payload.len() as u32)
    }

    /// Returns a short human-readable name for the segment's control bits.
    pub fn kind(&self) -> &'static str {
        match (self.tcp.syn(), self.tcp.ack(), self.payload.is_empty()) {
            (true, true, _) => "SYN_ACK",
            (true, false, _) => "SYN",
            (false, true, true) => "ACK",
            (false, true, false) => "PSH_ACK",
            (false, false, _) => "segment",
        }
    }

    /// Returns the full Ethernet/IPv4/TCP frame in network byte order.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(
            TCP_START + TcpHeader::MIN_HEADER_LEN as usize + self.payload.len(),
        );

        EthernetHeader::ipv4().write(&mut buf)?;
        self.ip.write(&mut buf)?;
        self.tcp.write(&mut buf)?;
        buf.write_all(&self.payload)?;

        Ok(buf)
    }
}
