//! Storage for every socket known to the engine.
//!
//! Entries live in a generational slot arena addressed by [ConnId]. A stale
//! `ConnId` (one whose slot has since been freed and reused) never resolves,
//! so timers that outlive their connection are harmless. Three indexes sit on
//! top of the arena:
//!
//! - per process, descriptor to `ConnId`;
//! - `(local, remote)` pair to `ConnId`, for connections with a peer;
//! - local port to every bound socket on it, for listener matching and
//!   ephemeral port allocation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::ops::RangeInclusive;

use super::{Fd, Pid, SyscallHandle, TimerId};
use crate::protocol::backlog::AcceptBacklog;
use crate::protocol::fsm::{Connection, ConnectionState};
use crate::protocol::{Socket, SocketAddr};
use crate::{Result, SocketError};

/// Lowest descriptor handed out; 0-2 belong to stdio.
pub const FIRST_FD: Fd = 3;

/// Stable key of a socket entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// A syscall parked until its precondition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocked {
    /// Handle to complete.
    pub handle: SyscallHandle,
    /// Poll timer that will re-run the call.
    pub timer: TimerId,
}

/// An active open in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConnect {
    /// Handle to complete.
    pub handle: SyscallHandle,
    /// Poll timer.
    pub timer: TimerId,
    /// Number of times the opening segment has been resent.
    pub attempts: u32,
}

/// `SYN_ACK` retry state of a half-open child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeRetry {
    /// Retry timer.
    pub timer: TimerId,
    /// Number of times the `SYN_ACK` has been resent.
    pub attempts: u32,
}

/// A `write` waiting for its data to be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// Handle to complete.
    pub handle: SyscallHandle,
    /// Sequence number of the first byte.
    pub base_seq: u32,
    /// The whole buffer, kept for retransmission.
    pub data: Vec<u8>,
}

impl PendingWrite {
    /// Returns the sequence number just past the last byte.
    pub fn end_seq(&self) -> u32 {
        self.base_seq.wrapping_add(self.data.len() as u32)
    }
}

/// Continuations attached to a socket.
#[derive(Debug, Default)]
pub struct Waiters {
    /// Blocked `accept`.
    pub accept: Option<Blocked>,
    /// Blocked `read`.
    pub read: Option<Blocked>,
    /// Active open awaiting the handshake.
    pub connect: Option<PendingConnect>,
    /// `SYN_ACK` retries of a passively opened child.
    pub handshake: Option<HandshakeRetry>,
    /// Writes awaiting acknowledgment, in send order.
    pub writes: VecDeque<PendingWrite>,
}

impl Waiters {
    /// Returns every timer held by a continuation.
    pub fn timers(&self) -> impl Iterator<Item = TimerId> + '_ {
        self.accept
            .map(|b| b.timer)
            .into_iter()
            .chain(self.read.map(|b| b.timer))
            .chain(self.connect.map(|c| c.timer))
            .chain(self.handshake.map(|h| h.timer))
    }
}

/// A socket: its connection state plus everything the engine tracks around
/// it.
#[derive(Debug)]
pub struct SocketEntry {
    /// Owning process.
    pub pid: Pid,
    /// Descriptor within the owning process.
    pub fd: Fd,
    /// Protocol state.
    pub conn: Connection,
    /// Listener that created this socket, for passively opened children.
    pub parent: Option<ConnId>,
    /// Accept queue, present while listening.
    pub backlog: Option<AcceptBacklog<ConnId>>,
    /// Parked syscalls and retry state.
    pub waiters: Waiters,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<SocketEntry>,
}

/// Arena of socket entries with its lookup indexes.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    processes: HashMap<Pid, BTreeMap<Fd, ConnId>>,
    by_pair: HashMap<Socket, ConnId>,
    by_port: HashMap<u16, Vec<ConnId>>,
    next_ephemeral: Option<u16>,
}

impl ConnectionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live sockets.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns `true` if no socket is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `conn` under the lowest free descriptor of `pid`.
    pub fn allocate(&mut self, pid: Pid, conn: Connection, parent: Option<ConnId>) -> (Fd, ConnId) {
        let fds = self.processes.entry(pid).or_default();

        let mut fd = FIRST_FD;
        for &used in fds.keys() {
            if used != fd {
                break;
            }
            fd += 1;
        }

        let entry = SocketEntry {
            pid,
            fd,
            conn,
            parent,
            backlog: None,
            waiters: Waiters::default(),
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);

                ConnId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });

                ConnId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        fds.insert(fd, id);

        (fd, id)
    }

    /// Returns the entry for `id`, unless it has been removed.
    pub fn get(&self, id: ConnId) -> Option<&SocketEntry> {
        let slot = self.slots.get(id.index as usize)?;

        if slot.generation != id.generation {
            return None;
        }

        slot.entry.as_ref()
    }

    /// Returns the entry for `id` mutably, unless it has been removed.
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut SocketEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;

        if slot.generation != id.generation {
            return None;
        }

        slot.entry.as_mut()
    }

    /// Resolves a process's descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` is not open in `pid`.
    pub fn lookup(&self, pid: Pid, fd: Fd) -> Result<ConnId> {
        self.processes
            .get(&pid)
            .and_then(|fds| fds.get(&fd))
            .copied()
            .ok_or_else(|| SocketError::BadDescriptor { pid, fd }.into())
    }

    /// Resolves a process's descriptor to its entry.
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` is not open in `pid`.
    pub fn lookup_mut(&mut self, pid: Pid, fd: Fd) -> Result<(ConnId, &mut SocketEntry)> {
        let id = self.lookup(pid, fd)?;
        let entry = self
            .get_mut(id)
            .ok_or(SocketError::BadDescriptor { pid, fd })?;

        Ok((id, entry))
    }

    /// Iterates over the sockets owned by `pid`, in descriptor order.
    pub fn process(&self, pid: Pid) -> impl Iterator<Item = &SocketEntry> + '_ {
        self.processes
            .get(&pid)
            .into_iter()
            .flat_map(|fds| fds.values())
            .filter_map(|&id| self.get(id))
    }

    /// Returns `true` if a bound socket of `pid` overlaps `addr`.
    pub fn collides(&self, pid: Pid, addr: SocketAddr) -> bool {
        self.process(pid)
            .any(|e| e.conn.is_bound() && e.conn.local_addr().overlaps(&addr))
    }

    /// Removes the entry and every index referring to it. Its slot is
    /// recycled under a new generation.
    pub fn remove(&mut self, id: ConnId) -> Option<SocketEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;

        if slot.generation != id.generation {
            return None;
        }

        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        if let Some(fds) = self.processes.get_mut(&entry.pid) {
            fds.remove(&entry.fd);
        }

        self.by_pair.retain(|_, &mut v| v != id);

        if let Some(ids) = self.by_port.get_mut(&entry.conn.local_addr().port) {
            ids.retain(|&v| v != id);
        }

        Some(entry)
    }

    /// Indexes the entry under its current `(local, remote)` pair.
    pub fn index_pair(&mut self, id: ConnId) {
        let Some(entry) = self.get(id) else {
            return;
        };

        if entry.conn.remote().is_some() {
            let socket = entry.conn.socket();
            self.by_pair.insert(socket, id);
        }
    }

    /// Drops the entry from the pair index.
    pub fn unindex_pair(&mut self, id: ConnId) {
        self.by_pair.retain(|_, &mut v| v != id);
    }

    /// Indexes the entry under its local port.
    pub fn index_port(&mut self, id: ConnId) {
        let Some(entry) = self.get(id) else {
            return;
        };

        let ids = self.by_port.entry(entry.conn.local_addr().port).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Returns `true` if any socket is bound to `port`.
    pub fn port_in_use(&self, port: u16) -> bool {
        self.by_port.get(&port).is_some_and(|ids| !ids.is_empty())
    }

    /// Returns the connection exactly matching `socket` (seen from the local
    /// side).
    pub fn find_pair(&self, socket: &Socket) -> Option<ConnId> {
        self.by_pair
            .get(socket)
            .copied()
            .filter(|&id| {
                self.get(id)
                    .is_some_and(|e| e.conn.state != ConnectionState::LISTEN)
            })
    }

    /// Returns the socket that should receive a `SYN` from `remote` addressed
    /// to `local`: a listener on the port whose address matches exactly or is
    /// `INADDR_ANY` (exact preferred), or a socket in `SYN_SENT` towards
    /// `remote`.
    pub fn find_listener(&self, local: SocketAddr, remote: SocketAddr) -> Option<ConnId> {
        let ids = self.by_port.get(&local.port)?;
        let mut wildcard = None;

        for &id in ids {
            let Some(entry) = self.get(id) else {
                continue;
            };

            let bound = entry.conn.local_addr();

            let qualifies = match entry.conn.state {
                ConnectionState::LISTEN => true,
                ConnectionState::SYN_SENT => entry.conn.remote() == Some(remote),
                _ => false,
            };

            if !qualifies || !bound.accepts(local) {
                continue;
            }

            if !bound.is_unspecified() {
                return Some(id);
            }

            wildcard.get_or_insert(id);
        }

        wildcard
    }

    /// Picks an unused port from `range`, continuing after the last port
    /// handed out.
    pub fn ephemeral_port(&mut self, range: &RangeInclusive<u16>) -> Option<u16> {
        let (lo, hi) = (*range.start(), *range.end());

        if lo > hi {
            return None;
        }

        let span = (hi - lo) as u32 + 1;
        let start = match self.next_ephemeral {
            Some(p) if range.contains(&p) => p,
            _ => lo,
        };

        for i in 0..span {
            let port = lo + ((start - lo) as u32 + i).rem_euclid(span) as u16;

            if !self.port_in_use(port) {
                self.next_ephemeral = Some(if port == hi { lo } else { port + 1 });
                return Some(port);
            }
        }

        None
    }
}
