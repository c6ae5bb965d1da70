//! Per-connection TCP state machine, as described in [RFC 793].
//!
//! Only the opening handshake and the data transfer phase are driven. The
//! teardown states are enumerated so that the full state space can be named,
//! but no transition enters them.
//!
//! [RFC 793]: https://www.rfc-editor.org/rfc/rfc793

use std::time::Duration;

use super::headers::{Ipv4Header, Protocol, TcpHeader};
use super::reassembly::{Insert, RecvBuffer};
use super::retransmit::{RttEstimator, SendWindow};
use super::{SockAddrIn, Socket, SocketAddr, TcpSegment, seq};
use crate::config::Config;
use crate::net::TimerId;
use crate::{Result, SocketError};
use crate::{debug, info};

/// Different TCP connection states.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
pub enum ConnectionState {
    /// Represents no connection state at all.
    CLOSED,
    /// Represents waiting for a connection request from any remote TCP and
    /// port.
    LISTEN,
    /// Represents waiting for a matching connection request after having sent a
    /// connection request.
    SYN_SENT,
    /// Represents waiting for a confirming connection request acknowledgment
    /// after having both received and sent a connection request.
    SYN_RECEIVED,
    /// Represents an open connection, data received can be delivered to the
    /// user. The normal state for the data transfer phase of the connection.
    ESTABLISHED,
    /// Represents waiting for a connection termination request from the remote
    /// TCP, or an acknowledgment of the connection termination request
    /// previously sent.
    FIN_WAIT_1,
    /// Represents waiting for a connection termination request from the remote
    /// TCP.
    FIN_WAIT_2,
    /// Represents waiting for a connection termination request from the local
    /// user.
    CLOSE_WAIT,
    /// Represents waiting for a connection termination request acknowledgment
    /// from the remote TCP.
    CLOSING,
    /// Represents waiting for an acknowledgment of the connection termination
    /// request previously sent to the remote TCP.
    LAST_ACK,
    /// Represents waiting for enough time to pass to be sure the remote TCP
    /// received the acknowledgment of its connection termination request.
    TIME_WAIT,
}

/// What the caller must do after a segment has been processed.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Segment to transmit to the peer.
    pub reply: Option<TcpSegment>,
    /// The connection just entered `ESTABLISHED`.
    pub established: bool,
    /// `snd_una` advanced; pending writes should be re-examined.
    pub acked: bool,
    /// Retransmission timers of segments retired by the ACK.
    pub retired: Vec<TimerId>,
}

/// Transmission Control Block for a single socket.
#[derive(Debug)]
pub struct Connection {
    /// Current state of the connection.
    pub state: ConnectionState,
    /// Local address exactly as bound (or as assigned by an implicit bind).
    local: SockAddrIn,
    /// Whether `local` has been fixed.
    bound: bool,
    /// Peer address, unset while listening.
    remote: Option<SocketAddr>,
    /// ISS - initial send sequence number
    iss: u32,
    /// SND.NXT - send next
    send_seq: u32,
    /// SND.UNA - highest cumulative ACK received
    snd_una: u32,
    /// RCV.NXT - receive next
    recv_ack: u32,
    /// Reassembly ring, allocated once the connection is established.
    recv_buf: Option<RecvBuffer>,
    /// Outstanding segments awaiting acknowledgment.
    send_window: SendWindow,
    rtt: RttEstimator,
    recv_capacity: usize,
    mss: usize,
    ttl: u8,
}

impl Connection {
    /// Creates an unbound connection in the `CLOSED` state.
    pub fn new(config: &Config) -> Self {
        Self {
            state: ConnectionState::CLOSED,
            local: SockAddrIn::default(),
            bound: false,
            remote: None,
            iss: 0,
            send_seq: 0,
            snd_una: 0,
            recv_ack: 0,
            recv_buf: None,
            send_window: SendWindow::new(),
            rtt: RttEstimator::new(config),
            recv_capacity: config.recv_buffer_capacity,
            mss: config.mss,
            ttl: config.ttl,
        }
    }

    /// Returns the raw local address.
    pub fn local(&self) -> SockAddrIn {
        self.local
    }

    /// Returns the local address and port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local.socket_addr()
    }

    /// Returns the peer address, if any.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Returns `true` once a local address has been fixed.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Returns the connection's socket pair, with an unspecified peer while
    /// none is known.
    pub fn socket(&self) -> Socket {
        Socket {
            src: self.local_addr(),
            dst: self.remote.unwrap_or_default(),
        }
    }

    /// Returns the initial send sequence number.
    pub fn iss(&self) -> u32 {
        self.iss
    }

    /// Returns the next sequence number to send.
    pub fn send_seq(&self) -> u32 {
        self.send_seq
    }

    /// Returns the highest cumulative acknowledgment received.
    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    /// Returns the next sequence number expected from the peer.
    pub fn recv_ack(&self) -> u32 {
        self.recv_ack
    }

    /// Returns the reassembly buffer, if established.
    pub fn recv_buffer(&self) -> Option<&RecvBuffer> {
        self.recv_buf.as_ref()
    }

    /// Returns the outstanding segments.
    pub fn send_window(&self) -> &SendWindow {
        &self.send_window
    }

    /// Returns the outstanding segments, mutably.
    pub fn send_window_mut(&mut self) -> &mut SendWindow {
        &mut self.send_window
    }

    /// Returns the RTT estimator.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Stores `addr` verbatim as the local address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is already bound.
    pub fn bind(&mut self, addr: SockAddrIn) -> Result<()> {
        if self.bound {
            return Err(SocketError::AlreadyBound.into());
        }

        self.local = addr;
        self.bound = true;

        Ok(())
    }

    /// Fixes the local address chosen by an implicit bind.
    pub fn set_local(&mut self, addr: SocketAddr) {
        self.local = addr.into();
        self.bound = true;
    }

    /// Moves a bound socket into `LISTEN`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is unbound or is neither `CLOSED` nor
    /// already listening.
    pub fn listen(&mut self) -> Result<()> {
        if !self.bound {
            return Err(SocketError::NotBound.into());
        }

        if !matches!(self.state, ConnectionState::CLOSED | ConnectionState::LISTEN) {
            return Err(SocketError::InvalidState {
                op: "listen",
                state: self.state,
            }
            .into());
        }

        self.state = ConnectionState::LISTEN;
        self.remote = None;

        Ok(())
    }

    /// Starts an active open towards `remote`, returning the `SYN` to send.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not `CLOSED` or the `SYN` could
    /// not be constructed.
    pub fn open_active(&mut self, remote: SocketAddr, iss: u32) -> Result<TcpSegment> {
        if self.state != ConnectionState::CLOSED {
            return Err(SocketError::InvalidState {
                op: "connect",
                state: self.state,
            }
            .into());
        }

        self.remote = Some(remote);
        self.iss = iss;
        self.snd_una = iss;
        // Accounts for the SYN.
        self.send_seq = iss.wrapping_add(1);
        self.state = ConnectionState::SYN_SENT;

        // <SEQ=ISS><CTL=SYN>
        let syn = self.create_syn()?;

        debug!(
            "[{}] (CLOSED) constructing SYN: CLOSED/ACTIVE_OPEN -> SYN_SENT",
            self.socket()
        );

        Ok(syn)
    }

    /// Creates a child connection for a `SYN` that arrived on a listener,
    /// returning it with the `SYN_ACK` to send.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SYN_ACK` could not be constructed.
    pub fn open_passive(config: &Config, syn: &TcpSegment, iss: u32) -> Result<(Self, TcpSegment)> {
        let mut conn = Self::new(config);

        // Stored in reverse order of peer's perspective.
        conn.set_local(syn.dst());
        conn.remote = Some(syn.src());
        conn.iss = iss;
        conn.snd_una = iss;
        conn.send_seq = iss.wrapping_add(1);
        conn.recv_ack = syn.tcp.seq_number().wrapping_add(1);
        conn.state = ConnectionState::SYN_RECEIVED;

        // <SEQ=ISS><ACK=RCV.NXT><CTL=SYN,ACK>
        let syn_ack = conn.create_syn_ack()?;

        debug!(
            "[{}] (LISTEN) received SYN, constructing SYN_ACK: LISTEN/PASSIVE_OPEN -> SYN_RECEIVED",
            conn.socket()
        );

        Ok((conn, syn_ack))
    }

    /// Abandons a handshake in progress and returns to `CLOSED`. The local
    /// binding is kept.
    pub fn reset(&mut self) -> Vec<TimerId> {
        self.state = ConnectionState::CLOSED;
        self.remote = None;
        self.recv_buf = None;
        self.send_window.clear()
    }

    /// Splits `data` into `PSH_ACK` segments starting at `send_seq`, and
    /// advances `send_seq` past them. Returns the base sequence number along
    /// with the segments.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not `ESTABLISHED` or a segment
    /// could not be constructed.
    pub fn send(&mut self, data: &[u8]) -> Result<(u32, Vec<TcpSegment>)> {
        if self.state != ConnectionState::ESTABLISHED {
            return Err(SocketError::InvalidState {
                op: "write",
                state: self.state,
            }
            .into());
        }

        let base = self.send_seq;
        let segments = self.segments_from(base, data)?;
        self.send_seq = self.send_seq.wrapping_add(data.len() as u32);

        Ok((base, segments))
    }

    /// Builds the `PSH_ACK` segments carrying `data` from sequence number
    /// `base`, without touching any sequence state. Used both for first
    /// transmission and for whole-buffer retransmission.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment could not be constructed.
    pub fn segments_from(&self, base: u32, data: &[u8]) -> Result<Vec<TcpSegment>> {
        let mut next = base;

        data.chunks(self.mss)
            .map(|chunk| {
                let segment = self.create_ack(next, chunk)?;
                next = next.wrapping_add(chunk.len() as u32);
                Ok(segment)
            })
            .collect()
    }

    /// Returns the number of bytes ready to be read.
    pub fn readable(&self) -> usize {
        self.recv_buf.as_ref().map_or(0, RecvBuffer::readable)
    }

    /// Reads up to `len` in-order bytes received from the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not `ESTABLISHED`.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        match (&mut self.recv_buf, self.state) {
            (Some(buf), ConnectionState::ESTABLISHED) => Ok(buf.read(len)),
            (_, state) => Err(SocketError::InvalidState { op: "read", state }.into()),
        }
    }

    /// Processes an inbound segment already matched to this connection.
    ///
    /// `now` is the host clock, used to sample the round-trip time of
    /// acknowledged data.
    ///
    /// # Errors
    ///
    /// Returns an error if a reply segment could not be constructed.
    pub fn on_segment(&mut self, segment: &TcpSegment, now: Duration) -> Result<Outcome> {
        let tcp = &segment.tcp;
        let sock = self.socket();

        if tcp.rst() || tcp.fin() {
            debug!(
                "[{sock}] ({:?}) received {}: ignoring",
                self.state,
                if tcp.rst() { "RST" } else { "FIN" }
            );

            return Ok(Outcome::default());
        }

        match self.state {
            ConnectionState::SYN_SENT => self.on_syn_sent(segment),
            ConnectionState::SYN_RECEIVED => self.on_syn_received(segment, now),
            ConnectionState::ESTABLISHED => self.on_established(segment, now),
            state => {
                debug!("[{sock}] ({state:?}) received {}: ignoring", segment.kind());
                Ok(Outcome::default())
            }
        }
    }

    fn on_syn_sent(&mut self, segment: &TcpSegment) -> Result<Outcome> {
        let tcp = &segment.tcp;
        let sock = self.socket();

        match (tcp.syn(), tcp.ack()) {
            (true, true) => {
                if tcp.ack_number() != self.iss.wrapping_add(1) {
                    debug!(
                        "[{sock}] (SYN_SENT) received SYN_ACK with invalid ACK number {}: ignoring",
                        tcp.ack_number()
                    );
                    return Ok(Outcome::default());
                }

                self.recv_ack = tcp.seq_number().wrapping_add(1);
                self.snd_una = tcp.ack_number();
                self.establish();

                // <SEQ=SND.NXT><ACK=RCV.NXT><CTL=ACK>
                let ack = self.create_ack(self.send_seq, &[])?;

                debug!("[{sock}] (SYN_SENT) received SYN_ACK, constructing ACK: SYN_SENT -> ESTABLISHED");

                Ok(Outcome {
                    reply: Some(ack),
                    established: true,
                    ..Default::default()
                })
            }
            (true, false) => {
                // Simultaneous open.
                self.recv_ack = tcp.seq_number().wrapping_add(1);
                self.state = ConnectionState::SYN_RECEIVED;

                // <SEQ=ISS><ACK=RCV.NXT><CTL=SYN,ACK>
                let syn_ack = self.create_syn_ack()?;

                debug!("[{sock}] (SYN_SENT) received SYN, constructing SYN_ACK: SYN_SENT -> SYN_RECEIVED");

                Ok(Outcome {
                    reply: Some(syn_ack),
                    ..Default::default()
                })
            }
            _ => {
                debug!("[{sock}] (SYN_SENT) received {}: ignoring", segment.kind());
                Ok(Outcome::default())
            }
        }
    }

    fn on_syn_received(&mut self, segment: &TcpSegment, now: Duration) -> Result<Outcome> {
        let tcp = &segment.tcp;
        let sock = self.socket();

        if tcp.syn() && !tcp.ack() {
            // Our SYN_ACK was lost or is still in flight.
            let syn_ack = self.create_syn_ack()?;

            debug!("[{sock}] (SYN_RECEIVED) received duplicate SYN, constructing SYN_ACK");

            return Ok(Outcome {
                reply: Some(syn_ack),
                ..Default::default()
            });
        }

        if !tcp.ack() || tcp.ack_number() != self.iss.wrapping_add(1) {
            debug!(
                "[{sock}] (SYN_RECEIVED) received {} not acknowledging our SYN: ignoring",
                segment.kind()
            );
            return Ok(Outcome::default());
        }

        self.snd_una = tcp.ack_number();
        self.establish();

        debug!("[{sock}] (SYN_RECEIVED) received {}: SYN_RECEIVED -> ESTABLISHED", segment.kind());

        // Any data riding on the ACK is handled as if it arrived afterwards.
        let mut outcome = if segment.payload.is_empty() {
            Outcome::default()
        } else {
            self.on_established(segment, now)?
        };

        if tcp.syn() && outcome.reply.is_none() {
            // Simultaneous open, the peer still needs our ACK of its SYN.
            outcome.reply = Some(self.create_ack(self.send_seq, &[])?);
        }

        outcome.established = true;

        Ok(outcome)
    }

    fn on_established(&mut self, segment: &TcpSegment, now: Duration) -> Result<Outcome> {
        let tcp = &segment.tcp;
        let sock = self.socket();
        let mut outcome = Outcome::default();

        if tcp.syn() {
            if tcp.ack() {
                // Our final handshake ACK was lost.
                debug!("[{sock}] (ESTABLISHED) received duplicate SYN_ACK, constructing ACK");
                outcome.reply = Some(self.create_ack(self.send_seq, &[])?);
            } else {
                debug!("[{sock}] (ESTABLISHED) received SYN: ignoring");
            }

            return Ok(outcome);
        }

        if tcp.ack() {
            let ackn = tcp.ack_number();

            // SND.UNA < SEG.ACK =< SND.NXT
            if seq::is_between_wrapped(self.snd_una, ackn, self.send_seq.wrapping_add(1)) {
                if let Some(sent) = self.send_window.take_departure(ackn) {
                    self.rtt.sample(now.saturating_sub(sent));
                }

                outcome.retired = self.send_window.retire(ackn);
                outcome.acked = true;
                self.snd_una = ackn;
            }
        }

        if segment.payload.is_empty() {
            return Ok(outcome);
        }

        let Some(buf) = self.recv_buf.as_mut() else {
            return Ok(outcome);
        };

        match buf.insert(tcp.seq_number(), &segment.payload) {
            Insert::Overflow => {
                debug!(
                    "[{sock}] (ESTABLISHED) received {} bytes beyond the receive window: dropping",
                    segment.payload.len()
                );
            }
            res => {
                self.recv_ack = buf.ack_number();

                if res == Insert::Duplicate {
                    debug!("[{sock}] (ESTABLISHED) received duplicate PSH_ACK, constructing ACK");
                }

                // <SEQ=SND.NXT><ACK=RCV.NXT><CTL=ACK>
                outcome.reply = Some(self.create_ack(self.send_seq, &[])?);
            }
        }

        Ok(outcome)
    }

    fn establish(&mut self) {
        self.state = ConnectionState::ESTABLISHED;
        self.recv_buf = Some(RecvBuffer::new(self.recv_capacity, self.recv_ack));

        info!("[{}] connection established", self.socket());
    }

    /// Returns the window advertised to the peer.
    fn window(&self) -> u16 {
        match &self.recv_buf {
            Some(buf) => buf.window(),
            None => self.recv_capacity.min(u16::MAX as usize) as u16,
        }
    }

    /// Returns the connection's `SYN` segment.
    pub fn create_syn(&self) -> Result<TcpSegment> {
        let mut syn = self.header(self.iss)?;
        syn.set_syn();

        self.finish(syn, &[])
    }

    /// Returns the connection's `SYN_ACK` segment.
    pub fn create_syn_ack(&self) -> Result<TcpSegment> {
        let mut syn_ack = self.header(self.iss)?;

        // Acknowledge the peer's SYN.
        syn_ack.set_ack_number(self.recv_ack);
        syn_ack.set_syn();

        self.finish(syn_ack, &[])
    }

    /// Returns an `ACK` (or `PSH_ACK` when `payload` is non-empty) starting at
    /// sequence number `seq`.
    pub fn create_ack(&self, seq: u32, payload: &[u8]) -> Result<TcpSegment> {
        let mut ack = self.header(seq)?;
        ack.set_ack_number(self.recv_ack);

        if !payload.is_empty() {
            ack.set_psh();
        }

        self.finish(ack, payload)
    }

    fn header(&self, seq: u32) -> Result<TcpHeader> {
        let remote = self.remote.ok_or(SocketError::NotConnected)?;

        Ok(TcpHeader::new(
            self.local.port(),
            remote.port,
            seq,
            self.window(),
        ))
    }

    fn finish(&self, mut tcp: TcpHeader, payload: &[u8]) -> Result<TcpSegment> {
        let remote = self.remote.ok_or(SocketError::NotConnected)?;

        let ip = Ipv4Header::new(
            self.local.addr(),
            remote.addr,
            tcp.header_len() + payload.len(),
            self.ttl,
            Protocol::TCP,
        )?;

        tcp.set_checksum(&ip, payload);

        Ok(TcpSegment::new(ip, tcp, payload))
    }
}
