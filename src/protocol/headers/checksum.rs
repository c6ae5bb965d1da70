//! Internet checksum (RFC 1071) helpers shared by the IPv4 and TCP headers.

/// Byte offset of the checksum field within a TCP header.
const TCP_CHECKSUM_OFFSET: usize = 16;

/// Adds the 16-bit big-endian words of `data` to `sum`.
///
/// If `data` contains an odd number of octets, the last octet is padded on the
/// right with zeros to form a 16 bit word.
pub fn accumulate(mut sum: u32, data: &[u8]) -> u32 {
    let mut words = data.chunks_exact(2);

    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;

        // Handle potential overflow with carry folding.
        if sum > 0xFFFF {
            // Adds the higher 16-bits to the lower 16-bits.
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }

    if let [last] = words.remainder() {
        sum += u16::from_be_bytes([*last, 0x00]) as u32;
    }

    sum
}

/// Folds the carries of `sum` back into 16 bits and returns the one's
/// complement.
pub fn finish(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Computes the TCP checksum of `segment` (header and payload).
///
/// The checksum field inside `segment` is treated as zero, so the same call
/// both produces a checksum for an outgoing segment and recomputes one for an
/// incoming segment.
///
/// ```text
///        +--------+--------+--------+--------+
///        |           Source Address          |
///        +--------+--------+--------+--------+
///        |         Destination Address       |
///        +--------+--------+--------+--------+
///        |  zero  |  PTCL  |    TCP Length   |
///        +--------+--------+--------+--------+
/// ```
pub fn tcp(src: [u8; 4], dst: [u8; 4], protocol: u8, segment: &[u8]) -> u16 {
    let mut pseudo_header = [0u8; 12];

    pseudo_header[0..4].copy_from_slice(&src);
    pseudo_header[4..8].copy_from_slice(&dst);
    pseudo_header[8] = 0;
    pseudo_header[9] = protocol;
    pseudo_header[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let mut sum = accumulate(0, &pseudo_header);

    if segment.len() < TCP_CHECKSUM_OFFSET + 2 {
        return finish(accumulate(sum, segment));
    }

    // The checksum field sits on a word boundary, so skipping it keeps the
    // remaining words aligned.
    sum = accumulate(sum, &segment[..TCP_CHECKSUM_OFFSET]);
    sum = accumulate(sum, &segment[TCP_CHECKSUM_OFFSET + 2..]);

    finish(sum)
}
