use std::io;

use super::{Ipv4Header, checksum};
use crate::{Error, ParseError};

/// TCP header (RFC 793, 3.1).
///
/// Options on received segments are skipped; emitted headers never carry
/// any, so [TcpHeader::to_be_bytes] always writes a data offset of 5.
///
/// ```text
///   0                   1                   2                   3
///     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |          Source Port          |       Destination Port        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                        Sequence Number                        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Acknowledgment Number                      |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |  Data |           |U|A|P|R|S|F|                               |
///    | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
///    |       |           |G|K|H|T|N|N|                               |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |           Checksum            |         Urgent Pointer        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    src_port: u16,
    dst_port: u16,
    seq_number: u32,
    ack_number: u32,
    /// Header length in 32-bit words, as received.
    data_offset: u8,
    /// Control bits, `URG` in bit 5 down to `FIN` in bit 0.
    flags: u8,
    window: u16,
    checksum: u16,
    urgent_pointer: u16,
}

impl TcpHeader {
    /// Minimum length of a TCP header in bytes.
    pub const MIN_HEADER_LEN: u16 = 20;

    /// Maximum length of a TCP header in bytes (data offset of 15).
    pub const MAX_HEADER_LEN: u16 = 60;

    /// Minimum data offset of a TCP header.
    pub const MIN_DATA_OFFSET: u16 = 5;

    /// Maximum data offset of a TCP header.
    pub const MAX_DATA_OFFSET: u16 = 15;

    /// `FIN` control bit.
    pub const FIN: u8 = 0x01;
    /// `SYN` control bit.
    pub const SYN: u8 = 0x02;
    /// `RST` control bit.
    pub const RST: u8 = 0x04;
    /// `PSH` control bit.
    pub const PSH: u8 = 0x08;
    /// `ACK` control bit.
    pub const ACK: u8 = 0x10;
    /// `URG` control bit.
    pub const URG: u8 = 0x20;

    /// Creates an option-less header with no control bits set and a zero
    /// checksum.
    pub fn new(src_port: u16, dst_port: u16, seq_number: u32, window: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_number,
            ack_number: 0,
            data_offset: Self::MIN_DATA_OFFSET as u8,
            flags: 0,
            window,
            checksum: 0,
            urgent_pointer: 0,
        }
    }

    /// Returns the source port.
    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    /// Returns the destination port.
    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    /// Returns the sequence number.
    pub fn seq_number(&self) -> u32 {
        self.seq_number
    }

    /// Returns the acknowledgment number.
    pub fn ack_number(&self) -> u32 {
        self.ack_number
    }

    /// Sets the acknowledgment number, along with the `ACK` bit.
    pub fn set_ack_number(&mut self, ack: u32) {
        self.ack_number = ack;
        self.flags |= Self::ACK;
    }

    /// Returns the data offset in 32-bit words, as received.
    pub fn data_offset(&self) -> u8 {
        self.data_offset
    }

    /// Returns the length of the header in bytes as announced by the data
    /// offset, options included.
    pub fn header_len(&self) -> usize {
        (self.data_offset as usize) << 2
    }

    /// Returns the control bits.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Returns `true` if `URG` is set.
    pub fn urg(&self) -> bool {
        self.flags & Self::URG != 0
    }

    /// Returns `true` if `ACK` is set.
    pub fn ack(&self) -> bool {
        self.flags & Self::ACK != 0
    }

    /// Returns `true` if `PSH` is set.
    pub fn psh(&self) -> bool {
        self.flags & Self::PSH != 0
    }

    /// Sets the `PSH` bit.
    pub fn set_psh(&mut self) {
        self.flags |= Self::PSH;
    }

    /// Returns `true` if `RST` is set.
    pub fn rst(&self) -> bool {
        self.flags & Self::RST != 0
    }

    /// Returns `true` if `SYN` is set.
    pub fn syn(&self) -> bool {
        self.flags & Self::SYN != 0
    }

    /// Sets the `SYN` bit.
    pub fn set_syn(&mut self) {
        self.flags |= Self::SYN;
    }

    /// Returns `true` if `FIN` is set.
    pub fn fin(&self) -> bool {
        self.flags & Self::FIN != 0
    }

    /// Returns the advertised window.
    pub fn window(&self) -> u16 {
        self.window
    }

    /// Returns the checksum as carried.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Returns the urgent pointer.
    pub fn urgent_pointer(&self) -> u16 {
        self.urgent_pointer
    }

    /// Fills in the checksum for this header carrying `payload` inside `ip`.
    pub fn set_checksum(&mut self, ip: &Ipv4Header, payload: &[u8]) {
        self.checksum = self.compute_checksum(ip, payload);
    }

    /// Returns the checksum over the pseudo header, the option-less
    /// serialized header and `payload`.
    ///
    /// Received segments that carried options must be verified against their
    /// raw bytes instead; see [checksum::tcp].
    pub fn compute_checksum(&self, ip: &Ipv4Header, payload: &[u8]) -> u16 {
        let mut segment = Vec::with_capacity(Self::MIN_HEADER_LEN as usize + payload.len());
        segment.extend_from_slice(&self.to_be_bytes());
        segment.extend_from_slice(payload);

        checksum::tcp(ip.src(), ip.dst(), ip.protocol().into(), &segment)
    }

    /// Returns the option-less header in network byte order.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> [u8; Self::MIN_HEADER_LEN as usize] {
        let mut raw = [0u8; Self::MIN_HEADER_LEN as usize];

        raw[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        raw[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        raw[4..8].copy_from_slice(&self.seq_number.to_be_bytes());
        raw[8..12].copy_from_slice(&self.ack_number.to_be_bytes());
        raw[12] = (Self::MIN_DATA_OFFSET as u8) << 4;
        raw[13] = self.flags;
        raw[14..16].copy_from_slice(&self.window.to_be_bytes());
        raw[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        raw[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        raw
    }

    /// Writes the header to the given output stream.
    pub fn write<T: io::Write>(&self, output: &mut T) -> crate::Result<()> {
        Ok(output.write_all(&self.to_be_bytes())?)
    }
}

/// Parses a TCP header from the start of a segment buffer.
///
/// The buffer may extend past the header into the payload; only the first
/// `data_offset << 2` bytes are consumed.
impl TryFrom<&[u8]> for TcpHeader {
    type Error = Error;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        if raw.len() < Self::MIN_HEADER_LEN as usize {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: raw.len(),
                min: Self::MIN_HEADER_LEN,
                max: Self::MAX_HEADER_LEN,
            }));
        }

        let data_offset = raw[12] >> 4;

        if u16::from(data_offset) < Self::MIN_DATA_OFFSET {
            return Err(Error::Parse(ParseError::InvalidDataOffset {
                provided: data_offset.into(),
                min: Self::MIN_DATA_OFFSET,
                max: Self::MAX_DATA_OFFSET,
            }));
        }

        let header_len = usize::from(data_offset) << 2;

        if header_len > raw.len() {
            return Err(Error::Parse(ParseError::HeaderLengthMismatch {
                provided: raw.len(),
                expected: header_len as u16,
            }));
        }

        let u16_at = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
        let u32_at = |i: usize| u32::from_be_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);

        Ok(Self {
            src_port: u16_at(0),
            dst_port: u16_at(2),
            seq_number: u32_at(4),
            ack_number: u32_at(8),
            data_offset,
            flags: raw[13] & 0x3F,
            window: u16_at(14),
            checksum: u16_at(16),
            urgent_pointer: u16_at(18),
        })
    }
}
