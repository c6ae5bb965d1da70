use std::io;

use crate::{Error, ParseError};

/// Ethernet II frame header.
///
/// ```text
/// +-----------------+-----------------+-----------+
/// | Destination MAC |   Source MAC    | EtherType |
/// |    (6 bytes)    |    (6 bytes)    | (2 bytes) |
/// +-----------------+-----------------+-----------+
/// ```
///
/// The simulated link never resolves hardware addresses, so outgoing frames
/// carry zeroed MACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EthernetHeader {
    /// Destination hardware address.
    dst_mac: [u8; 6],
    /// Source hardware address.
    src_mac: [u8; 6],
    /// Protocol carried in the frame payload.
    ethertype: u16,
}

impl EthernetHeader {
    /// Length of an Ethernet II header in bytes.
    pub const HEADER_LEN: usize = 14;

    /// EtherType value for IPv4.
    pub const ETHERTYPE_IPV4: u16 = 0x0800;

    /// Creates a header announcing an IPv4 payload.
    pub fn ipv4() -> Self {
        Self {
            ethertype: Self::ETHERTYPE_IPV4,
            ..Default::default()
        }
    }

    /// Returns the destination hardware address.
    pub fn dst_mac(&self) -> [u8; 6] {
        self.dst_mac
    }

    /// Returns the source hardware address.
    pub fn src_mac(&self) -> [u8; 6] {
        self.src_mac
    }

    /// Returns the `EtherType` field.
    pub fn ethertype(&self) -> u16 {
        self.ethertype
    }

    /// Returns the header as a byte array in network byte order.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> [u8; Self::HEADER_LEN] {
        let mut raw_header = [0u8; Self::HEADER_LEN];

        raw_header[0..6].copy_from_slice(&self.dst_mac);
        raw_header[6..12].copy_from_slice(&self.src_mac);
        raw_header[12..14].copy_from_slice(&self.ethertype.to_be_bytes());

        raw_header
    }

    /// Writes the Ethernet header to the given output stream.
    pub fn write<T: io::Write>(&self, output: &mut T) -> crate::Result<()> {
        Ok(output.write_all(&self.to_be_bytes())?)
    }
}

impl TryFrom<&[u8]> for EthernetHeader {
    type Error = Error;

    fn try_from(header_raw: &[u8]) -> Result<Self, Self::Error> {
        if header_raw.len() < Self::HEADER_LEN {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: header_raw.len(),
                min: Self::HEADER_LEN as u16,
                max: Self::HEADER_LEN as u16,
            }));
        }

        let mut dst_mac = [0u8; 6];
        let mut src_mac = [0u8; 6];

        dst_mac.copy_from_slice(&header_raw[0..6]);
        src_mac.copy_from_slice(&header_raw[6..12]);

        Ok(Self {
            dst_mac,
            src_mac,
            ethertype: u16::from_be_bytes([header_raw[12], header_raw[13]]),
        })
    }
}
