//! Receive-side reassembly: a bounded byte ring plus an ordered list of
//! out-of-order markers.
//!
//! Offsets are measured in bytes relative to `origin`, the sequence number of
//! the first payload octet, and are kept as `u64` so they never wrap during
//! the lifetime of a connection.
//!
//! ```text
//!   read_start        contig_end        marker        marker
//!       |-----------------|......[=====]......[===]......|
//!       |  readable bytes |  gap  | ooo | gap | ooo |    read_start + capacity
//! ```

use super::seq;

/// A byte range received ahead of `contig_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    /// First relative offset covered.
    pub start: u64,
    /// Relative offset just past the last byte covered.
    pub end: u64,
}

/// Result of offering a segment to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// New bytes were stored.
    Accepted,
    /// Every byte was already contiguous; nothing changed, but the segment
    /// still deserves an ACK.
    Duplicate,
    /// The segment would overwrite unread data and was dropped.
    Overflow,
}

/// Bounded reassembly buffer for one connection.
#[derive(Debug)]
pub struct RecvBuffer {
    /// Backing storage, indexed by `offset % capacity`.
    ring: Box<[u8]>,
    /// Sequence number of relative offset 0.
    origin: u32,
    /// Offset of the next byte handed to `read`.
    read_start: u64,
    /// Offset just past the contiguous prefix received.
    contig_end: u64,
    /// Out-of-order ranges, sorted by `start`, non-overlapping and never
    /// touching each other.
    markers: Vec<Marker>,
}

impl RecvBuffer {
    /// Creates an empty buffer whose offset 0 corresponds to sequence number
    /// `origin`.
    pub fn new(capacity: usize, origin: u32) -> Self {
        Self {
            ring: vec![0u8; capacity].into_boxed_slice(),
            origin,
            read_start: 0,
            contig_end: 0,
            markers: Vec::new(),
        }
    }

    /// Returns the ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    /// Returns the sequence number anchoring relative offset 0.
    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Returns the offset of the next unread byte.
    pub fn read_start(&self) -> u64 {
        self.read_start
    }

    /// Returns the offset just past the contiguous prefix.
    pub fn contig_end(&self) -> u64 {
        self.contig_end
    }

    /// Returns the pending out-of-order markers.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Returns the number of bytes ready for `read`.
    pub fn readable(&self) -> usize {
        (self.contig_end - self.read_start) as usize
    }

    /// Returns the cumulative acknowledgment number: `origin + contig_end`.
    pub fn ack_number(&self) -> u32 {
        self.origin.wrapping_add(self.contig_end as u32)
    }

    /// Returns the window to advertise, the free space past `contig_end`.
    pub fn window(&self) -> u16 {
        let free = self.capacity() - self.readable();
        free.min(u16::MAX as usize) as u16
    }

    /// Offers a segment's payload, starting at sequence number `seq`.
    pub fn insert(&mut self, seq: u32, payload: &[u8]) -> Insert {
        // Position relative to the contiguous edge, which is always within
        // 2**31 of any segment worth keeping.
        let delta = seq::distance(self.ack_number(), seq);
        let start = self.contig_end as i64 + delta;
        let end = start + payload.len() as i64;

        if end <= self.contig_end as i64 {
            return Insert::Duplicate;
        }

        // Writing past this point would clobber bytes not yet read.
        if end as u64 > self.read_start + self.capacity() as u64 {
            return Insert::Overflow;
        }

        let start = start.max(self.contig_end as i64) as u64;
        let end = end as u64;
        let skip = (start as i64 - (self.contig_end as i64 + delta)) as usize;

        self.write_ring(start, &payload[skip..]);
        self.add_marker(Marker { start, end });
        self.fold();

        Insert::Accepted
    }

    /// Copies up to `len` contiguous bytes out of the ring.
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        let n = len.min(self.readable());
        let mut out = Vec::with_capacity(n);

        let cap = self.capacity();
        let pos = (self.read_start % cap as u64) as usize;
        let first = n.min(cap - pos);

        out.extend_from_slice(&self.ring[pos..pos + first]);
        out.extend_from_slice(&self.ring[..n - first]);

        self.read_start += n as u64;

        out
    }

    /// Writes `data` starting at relative offset `start`, wrapping around the
    /// end of the ring.
    fn write_ring(&mut self, start: u64, data: &[u8]) {
        let cap = self.capacity();
        let pos = (start % cap as u64) as usize;
        let first = data.len().min(cap - pos);

        self.ring[pos..pos + first].copy_from_slice(&data[..first]);
        self.ring[..data.len() - first].copy_from_slice(&data[first..]);
    }

    /// Inserts a marker in `start` order, merging any marker it overlaps or
    /// touches.
    fn add_marker(&mut self, mut marker: Marker) {
        let first = self.markers.partition_point(|m| m.end < marker.start);
        let mut last = first;

        while last < self.markers.len() && self.markers[last].start <= marker.end {
            marker.start = marker.start.min(self.markers[last].start);
            marker.end = marker.end.max(self.markers[last].end);
            last += 1;
        }

        self.markers.splice(first..last, [marker]);
    }

    /// Raises `contig_end` over every marker that now touches it.
    fn fold(&mut self) {
        let mut folded = 0;

        for marker in &self.markers {
            if marker.start > self.contig_end {
                break;
            }

            self.contig_end = self.contig_end.max(marker.end);
            folded += 1;
        }

        self.markers.drain(..folded);
    }
}
