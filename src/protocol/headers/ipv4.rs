use std::io;

use super::checksum;
use crate::{Error, HeaderError, ParseError};

/// IPv4 header as carried on the simulated link (RFC 791, 3.1).
///
/// Only option-less, unfragmented datagrams are produced or accepted. Headers
/// are immutable once built: [Ipv4Header::new] fills in the checksum, and a
/// parsed header keeps the checksum it arrived with so it can be verified.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |Type of Service|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    tos: u8,
    total_len: u16,
    id: u16,
    dont_fragment: bool,
    ttl: u8,
    protocol: Protocol,
    checksum: u16,
    src: [u8; 4],
    dst: [u8; 4],
}

/// Version 4, IHL 5.
const VERSION_IHL: u8 = 0x45;

/// `DF` bit of the flags/fragment-offset word.
const DF: u16 = 0x4000;

/// `MF` bit and the 13-bit fragment offset.
const FRAGMENT_MASK: u16 = 0x3FFF;

impl Ipv4Header {
    /// Length of an IPv4 header without options, in bytes.
    pub const MIN_HEADER_LEN: u16 = 20;

    /// Maximum length of an IPv4 header in bytes (IHL of 15).
    pub const MAX_HEADER_LEN: u16 = 60;

    /// Largest payload an option-less datagram can carry.
    pub const MAX_PAYLOAD_LEN: u16 = u16::MAX - Self::MIN_HEADER_LEN;

    /// Builds a checksummed header for a `DF` datagram carrying
    /// `payload_len` bytes of `protocol`.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload_len` exceeds [Self::MAX_PAYLOAD_LEN].
    pub fn new(
        src: [u8; 4],
        dst: [u8; 4],
        payload_len: usize,
        ttl: u8,
        protocol: Protocol,
    ) -> crate::Result<Self> {
        let payload_len = u16::try_from(payload_len)
            .ok()
            .filter(|len| *len <= Self::MAX_PAYLOAD_LEN)
            .ok_or(Error::Header(HeaderError::PayloadTooLarge {
                provided: payload_len,
                max: Self::MAX_PAYLOAD_LEN,
            }))?;

        let mut header = Self {
            tos: 0,
            total_len: Self::MIN_HEADER_LEN + payload_len,
            id: 0,
            dont_fragment: true,
            ttl,
            protocol,
            checksum: 0,
            src,
            dst,
        };

        header.checksum = header.compute_checksum();

        Ok(header)
    }

    /// Returns the total length of the datagram, header included.
    pub fn total_len(&self) -> u16 {
        self.total_len
    }

    /// Returns the number of bytes following the header.
    pub fn payload_len(&self) -> u16 {
        // Parsing rejects a total length shorter than the header.
        self.total_len - Self::MIN_HEADER_LEN
    }

    /// Returns the `identification` field.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Returns `true` if the `DF` (Don't Fragment) bit is set.
    pub fn dont_fragment(&self) -> bool {
        self.dont_fragment
    }

    /// Returns the `time to live` field.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Returns the upper-layer protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the source address.
    pub fn src(&self) -> [u8; 4] {
        self.src
    }

    /// Returns the destination address.
    pub fn dst(&self) -> [u8; 4] {
        self.dst
    }

    /// Returns the header checksum as carried.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Returns the checksum the header should carry: the one's complement of
    /// the one's complement sum of its 16-bit words, checksum field zeroed.
    pub fn compute_checksum(&self) -> u16 {
        let mut raw = self.to_be_bytes();
        raw[10..12].fill(0);

        checksum::finish(checksum::accumulate(0, &raw))
    }

    /// Returns `true` if the carried checksum matches the header contents.
    pub fn is_valid_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Returns the header in network byte order.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> [u8; Self::MIN_HEADER_LEN as usize] {
        let flags = if self.dont_fragment { DF } else { 0 };

        let mut raw = [0u8; Self::MIN_HEADER_LEN as usize];
        raw[0] = VERSION_IHL;
        raw[1] = self.tos;
        raw[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        raw[4..6].copy_from_slice(&self.id.to_be_bytes());
        raw[6..8].copy_from_slice(&flags.to_be_bytes());
        raw[8] = self.ttl;
        raw[9] = self.protocol.into();
        raw[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        raw[12..16].copy_from_slice(&self.src);
        raw[16..20].copy_from_slice(&self.dst);

        raw
    }

    /// Writes the header to the given output stream.
    pub fn write<T: io::Write>(&self, output: &mut T) -> crate::Result<()> {
        Ok(output.write_all(&self.to_be_bytes())?)
    }
}

impl TryFrom<&[u8]> for Ipv4Header {
    type Error = Error;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        let Some(raw) = raw.get(..Self::MIN_HEADER_LEN as usize) else {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: raw.len(),
                min: Self::MIN_HEADER_LEN,
                max: Self::MAX_HEADER_LEN,
            }));
        };

        let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);

        let (version, ihl) = (raw[0] >> 4, raw[0] & 0xF);

        if version != 4 {
            return Err(Error::Parse(ParseError::InvalidVersion {
                provided: version,
                expected: 4,
            }));
        }

        if ihl != 5 {
            return Err(Error::Parse(ParseError::InvalidIhl {
                provided: ihl,
                expected: 5,
            }));
        }

        let total_len = word(2);

        if total_len < Self::MIN_HEADER_LEN {
            return Err(Error::Parse(ParseError::InvalidTotalLength {
                provided: total_len,
                expected: ihl << 2,
            }));
        }

        let flags = word(6);

        if flags & FRAGMENT_MASK != 0 {
            return Err(Error::Parse(ParseError::Fragmented {
                offset: flags & 0x1FFF,
            }));
        }

        let mut src = [0u8; 4];
        let mut dst = [0u8; 4];
        src.copy_from_slice(&raw[12..16]);
        dst.copy_from_slice(&raw[16..20]);

        Ok(Self {
            tos: raw[1],
            total_len,
            id: word(4),
            dont_fragment: flags & DF != 0,
            ttl: raw[8],
            protocol: Protocol::try_from(raw[9])?,
            checksum: word(10),
            src,
            dst,
        })
    }
}

/// Internet protocol numbers recognized on the simulated link (RFC 1700).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Protocol {
    /// Internet Control Message
    ICMP = 1,
    /// Transmission Control
    TCP = 6,
    /// User Datagram
    UDP = 17,
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        proto as u8
    }
}

impl TryFrom<u8> for Protocol {
    type Error = Error;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            1 => Ok(Protocol::ICMP),
            6 => Ok(Protocol::TCP),
            17 => Ok(Protocol::UDP),
            _ => Err(Error::Parse(ParseError::InvalidProtocol(val))),
        }
    }
}
