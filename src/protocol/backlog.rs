//! Bounded accept queue owned by a listening socket.
//!
//! Children created by an inbound `SYN` start out pending. Once their
//! handshake completes they are promoted to the ready queue, from which
//! `accept` pops them oldest first.

use std::collections::VecDeque;

/// Per-listener backlog of half-open and established children.
#[derive(Debug, Clone)]
pub struct AcceptBacklog<K> {
    /// Maximum number of children, pending and ready combined.
    capacity: usize,
    /// Children still in `SYN_RECEIVED`.
    pending: Vec<K>,
    /// Children in `ESTABLISHED`, waiting for `accept`.
    ready: VecDeque<K>,
}

impl<K: Copy + Eq> AcceptBacklog<K> {
    /// Creates an empty backlog holding at most `capacity` children.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pending: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of children still handshaking.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns the number of children waiting for `accept`.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Returns `true` if another child may be admitted.
    pub fn has_room(&self) -> bool {
        self.pending.len() + self.ready.len() < self.capacity
    }

    /// Admits a new half-open child. Returns `false` (and does nothing) when
    /// the backlog is full or the child is already queued.
    pub fn add_pending(&mut self, child: K) -> bool {
        if !self.has_room() || self.contains(child) {
            return false;
        }

        self.pending.push(child);
        true
    }

    /// Moves a child from the pending set to the back of the ready queue.
    /// Returns `false` if the child was not pending.
    pub fn promote(&mut self, child: K) -> bool {
        let Some(pos) = self.pending.iter().position(|&k| k == child) else {
            return false;
        };

        self.pending.remove(pos);
        self.ready.push_back(child);
        true
    }

    /// Removes a child wherever it is queued. No-op if absent.
    pub fn remove(&mut self, child: K) {
        self.pending.retain(|&k| k != child);
        self.ready.retain(|&k| k != child);
    }

    /// Pops the oldest established child.
    pub fn pop_ready(&mut self) -> Option<K> {
        self.ready.pop_front()
    }

    /// Returns `true` if the child is pending or ready.
    pub fn contains(&self, child: K) -> bool {
        self.pending.contains(&child) || self.ready.contains(&child)
    }

    /// Consumes the backlog, yielding every queued child, pending first.
    pub fn into_children(self) -> impl Iterator<Item = K> {
        self.pending.into_iter().chain(self.ready)
    }
}
