//! Event dispatch: the bridge between syscalls, inbound frames and timers on
//! one side and the per-connection state machines on the other.
//!
//! Every entry point runs to completion. A syscall either completes before
//! returning or parks itself behind a timer and is re-run when it fires.

use std::time::Duration;

use super::table::{
    Blocked, ConnId, ConnectionTable, HandshakeRetry, PendingConnect, PendingWrite, SocketEntry,
    Waiters,
};
use super::{Completion, Fd, Host, Output, Pid, Syscall, SyscallHandle, TimerPayload};
use crate::config::Config;
use crate::protocol::backlog::AcceptBacklog;
use crate::protocol::fsm::{Connection, ConnectionState};
use crate::protocol::{SockAddrIn, SocketAddr, TcpSegment, seq};
use crate::{Error, Result, SocketError};
use crate::{debug, info, warn};

/// Transmits a segment on the interface that routes to its destination.
fn transmit<H: Host>(host: &mut H, config: &Config, segment: &TcpSegment) -> Result<()> {
    let dst = segment.ip.dst();
    let interface = host
        .lookup_route(dst)
        .ok_or(SocketError::NoRoute(dst))?;

    let frame = segment.to_frame()?;
    host.send_packet(&config.interface_name(interface), &frame);

    Ok(())
}

/// Transmits a segment whose sequence space is already committed. A failure
/// is indistinguishable from loss on the wire, so it is logged and left to the
/// retransmission timer.
fn transmit_or_drop<H: Host>(host: &mut H, config: &Config, segment: &TcpSegment) {
    if let Err(err) = transmit(host, config, segment) {
        debug!(
            "[{} -> {}] dropping {} [{}]: {err}",
            segment.src(),
            segment.dst(),
            segment.kind(),
            segment.tcp.seq_number()
        );
    }
}

/// Completes every parked syscall of a socket that is going away with `-1`.
fn fail_waiters<H: Host>(host: &mut H, waiters: &mut Waiters) {
    for timer in waiters.timers().collect::<Vec<_>>() {
        host.cancel_timer(timer);
    }

    let handles = waiters
        .accept
        .take()
        .map(|b| b.handle)
        .into_iter()
        .chain(waiters.read.take().map(|b| b.handle))
        .chain(waiters.connect.take().map(|c| c.handle))
        .chain(waiters.writes.drain(..).map(|w| w.handle));

    for handle in handles.collect::<Vec<_>>() {
        host.complete_syscall(handle, Completion::failed());
    }

    waiters.handshake = None;
}

/// A TCP engine serving every process on one host.
#[derive(Debug)]
pub struct TcpEngine {
    config: Config,
    table: ConnectionTable,
}

impl TcpEngine {
    /// Creates an engine with no sockets.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            table: ConnectionTable::new(),
        })
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the socket table.
    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    /// Returns the socket open as `fd` in `pid`.
    pub fn entry(&self, pid: Pid, fd: Fd) -> Option<&SocketEntry> {
        let id = self.table.lookup(pid, fd).ok()?;
        self.table.get(id)
    }

    /// Returns the connection open as `fd` in `pid`.
    pub fn connection(&self, pid: Pid, fd: Fd) -> Option<&Connection> {
        self.entry(pid, fd).map(|e| &e.conn)
    }

    /// Handles a syscall from `pid`. The result is delivered through
    /// [Host::complete_syscall], either before this returns or later from
    /// [TcpEngine::packet_arrived] or [TcpEngine::timer_expired].
    pub fn system_call<H: Host>(
        &mut self,
        host: &mut H,
        handle: SyscallHandle,
        pid: Pid,
        call: Syscall,
    ) {
        let name = call.name();

        let res = match call {
            Syscall::Socket => self.socket(pid).map(Some),
            Syscall::Bind { fd, addr } => self.bind(pid, fd, addr).map(Some),
            Syscall::Listen { fd, backlog } => self.listen(host, pid, fd, backlog).map(Some),
            Syscall::Accept { fd } => self.accept(host, handle, pid, fd),
            Syscall::Connect { fd, addr } => self.connect(host, handle, pid, fd, addr),
            Syscall::Read { fd, len } => self.read(host, handle, pid, fd, len),
            Syscall::Write { fd, data } => self.write(host, handle, pid, fd, data),
            Syscall::Close { fd } => self.close(host, pid, fd).map(Some),
            Syscall::GetSockName { fd } => self.getsockname(pid, fd).map(Some),
            Syscall::GetPeerName { fd } => self.getpeername(pid, fd).map(Some),
        };

        match res {
            Ok(Some(completion)) => host.complete_syscall(handle, completion),
            Ok(None) => {}
            Err(err) => {
                warn!("[pid {pid}] {name} failed: {err}");
                host.complete_syscall(handle, Completion::failed());
            }
        }
    }

    /// Handles a frame received on any interface. Frames that do not parse,
    /// fail a checksum, or match no socket are dropped.
    pub fn packet_arrived<H: Host>(&mut self, host: &mut H, frame: &[u8]) {
        let segment = match TcpSegment::parse(frame) {
            Ok(segment) => segment,
            Err(err) => {
                debug!("dropping {} byte frame: {err}", frame.len());
                return;
            }
        };

        if let Err(err) = self.on_segment(host, &segment) {
            debug!(
                "[{}] failed to process {}: {err}",
                segment.receiver_socket(),
                segment.kind()
            );
        }
    }

    /// Handles the expiry of a timer armed by this engine.
    pub fn timer_expired<H: Host>(&mut self, host: &mut H, payload: TimerPayload) {
        let res = match payload {
            TimerPayload::Accept { handle, pid, fd } => {
                if self.is_parked(pid, fd, handle, |w| w.accept) {
                    self.system_call(host, handle, pid, Syscall::Accept { fd });
                }
                Ok(())
            }
            TimerPayload::Read { handle, pid, fd, len } => {
                if self.is_parked(pid, fd, handle, |w| w.read) {
                    self.system_call(host, handle, pid, Syscall::Read { fd, len });
                }
                Ok(())
            }
            TimerPayload::Connect { conn } => self.on_connect_timer(host, conn),
            TimerPayload::Handshake { conn } => self.on_handshake_timer(host, conn),
            TimerPayload::Retransmit { conn } => self.on_retransmit_timer(host, conn),
        };

        if let Err(err) = res {
            warn!("timer handler failed: {err}");
        }
    }

    /// Returns `true` if `handle` is still the call parked on the socket.
    fn is_parked(
        &self,
        pid: Pid,
        fd: Fd,
        handle: SyscallHandle,
        slot: impl Fn(&Waiters) -> Option<Blocked>,
    ) -> bool {
        self.entry(pid, fd)
            .and_then(|e| slot(&e.waiters))
            .is_some_and(|b| b.handle == handle)
    }

    /// RFC 793 (3.3)
    ///
    /// The generator is bound to a (possibly fictitious) 32 bit clock whose
    /// low order bit is incremented roughly every 4 microseconds.
    fn initial_sequence(&self, now: Duration) -> u32 {
        self.config
            .initial_sequence
            .unwrap_or((now.as_micros() / 4) as u32)
    }

    fn socket(&mut self, pid: Pid) -> Result<Completion> {
        let (fd, id) = self.table.allocate(pid, Connection::new(&self.config), None);

        debug!("[pid {pid}] socket() = {fd} ({id})");

        Ok(Completion::value(fd))
    }

    fn bind(&mut self, pid: Pid, fd: Fd, addr: SockAddrIn) -> Result<Completion> {
        let id = self.table.lookup(pid, fd)?;
        let local = addr.socket_addr();

        if self.table.get(id).is_some_and(|e| e.conn.is_bound()) {
            return Err(SocketError::AlreadyBound.into());
        }

        if self.table.collides(pid, local) {
            return Err(SocketError::AddressInUse(local).into());
        }

        let (_, entry) = self.table.lookup_mut(pid, fd)?;
        entry.conn.bind(addr)?;
        self.table.index_port(id);

        debug!("[pid {pid}] bind({fd}, {local})");

        Ok(Completion::value(0))
    }

    fn listen<H: Host>(
        &mut self,
        host: &mut H,
        pid: Pid,
        fd: Fd,
        backlog: usize,
    ) -> Result<Completion> {
        let (_, entry) = self.table.lookup_mut(pid, fd)?;

        entry.conn.listen()?;
        let previous = entry.backlog.replace(AcceptBacklog::new(backlog));

        info!(
            "[{}] (LISTEN) listening with backlog {backlog}",
            entry.conn.local_addr()
        );

        // Children of the old queue can no longer be accepted.
        for child in previous.into_iter().flat_map(AcceptBacklog::into_children) {
            self.release(host, child);
        }

        Ok(Completion::value(0))
    }

    fn accept<H: Host>(
        &mut self,
        host: &mut H,
        handle: SyscallHandle,
        pid: Pid,
        fd: Fd,
    ) -> Result<Option<Completion>> {
        let (_, entry) = self.table.lookup_mut(pid, fd)?;

        let Some(backlog) = entry.backlog.as_mut() else {
            return Err(SocketError::InvalidState {
                op: "accept",
                state: entry.conn.state,
            }
            .into());
        };

        if entry.waiters.accept.is_some_and(|b| b.handle != handle) {
            return Err(SocketError::OperationPending("accept").into());
        }

        let Some(child) = backlog.pop_ready() else {
            let timer = host.add_timer(
                TimerPayload::Accept { handle, pid, fd },
                self.config.poll_interval,
            );

            entry.waiters.accept = Some(Blocked { handle, timer });
            return Ok(None);
        };

        entry.waiters.accept = None;

        let child = self
            .table
            .get(child)
            .ok_or(SocketError::NotConnected)?;
        let peer = child.conn.remote().ok_or(SocketError::NotConnected)?;

        debug!("[pid {pid}] accept({fd}) = {} from {peer}", child.fd);

        Ok(Some(Completion::with_output(
            child.fd,
            Output::Addr(peer.into()),
        )))
    }

    fn connect<H: Host>(
        &mut self,
        host: &mut H,
        handle: SyscallHandle,
        pid: Pid,
        fd: Fd,
        addr: SockAddrIn,
    ) -> Result<Option<Completion>> {
        let remote = addr.socket_addr();
        let iss = self.initial_sequence(host.now());

        let interface = host
            .lookup_route(remote.addr)
            .ok_or(SocketError::NoRoute(remote.addr))?;

        let (id, entry) = self.table.lookup_mut(pid, fd)?;

        if entry.waiters.connect.is_some() {
            return Err(SocketError::OperationPending("connect").into());
        }

        if entry.conn.state != ConnectionState::CLOSED {
            return Err(SocketError::InvalidState {
                op: "connect",
                state: entry.conn.state,
            }
            .into());
        }

        let bound = entry.conn.is_bound();
        let local = entry.conn.local_addr();

        // Implicit bind: take the address of the outgoing interface, and an
        // ephemeral port unless one was bound.
        if !bound || local.is_unspecified() {
            let ip = host
                .get_local_ip(interface)
                .ok_or(SocketError::NoRoute(remote.addr))?;

            let port = if bound {
                local.port
            } else {
                self.table
                    .ephemeral_port(&self.config.ephemeral_ports)
                    .ok_or(SocketError::PortsExhausted)?
            };

            let (_, entry) = self.table.lookup_mut(pid, fd)?;
            entry.conn.set_local(SocketAddr::new(ip, port));
            self.table.index_port(id);
        }

        let (_, entry) = self.table.lookup_mut(pid, fd)?;
        let syn = entry.conn.open_active(remote, iss)?;

        transmit(host, &self.config, &syn)?;

        let timer = host.add_timer(TimerPayload::Connect { conn: id }, self.config.poll_interval);
        entry.waiters.connect = Some(PendingConnect {
            handle,
            timer,
            attempts: 0,
        });

        self.table.index_pair(id);

        Ok(None)
    }

    fn read<H: Host>(
        &mut self,
        host: &mut H,
        handle: SyscallHandle,
        pid: Pid,
        fd: Fd,
        len: usize,
    ) -> Result<Option<Completion>> {
        let (_, entry) = self.table.lookup_mut(pid, fd)?;

        if entry.conn.state != ConnectionState::ESTABLISHED {
            return Err(SocketError::InvalidState {
                op: "read",
                state: entry.conn.state,
            }
            .into());
        }

        if len == 0 {
            return Ok(Some(Completion::with_output(0, Output::Bytes(Vec::new()))));
        }

        if entry.waiters.read.is_some_and(|b| b.handle != handle) {
            return Err(SocketError::OperationPending("read").into());
        }

        if entry.conn.readable() == 0 {
            let timer = host.add_timer(
                TimerPayload::Read {
                    handle,
                    pid,
                    fd,
                    len,
                },
                self.config.poll_interval,
            );

            entry.waiters.read = Some(Blocked { handle, timer });
            return Ok(None);
        }

        entry.waiters.read = None;
        let bytes = entry.conn.read(len)?;

        Ok(Some(Completion::with_output(
            bytes.len() as i32,
            Output::Bytes(bytes),
        )))
    }

    fn write<H: Host>(
        &mut self,
        host: &mut H,
        handle: SyscallHandle,
        pid: Pid,
        fd: Fd,
        data: Vec<u8>,
    ) -> Result<Option<Completion>> {
        let now = host.now();
        let (id, entry) = self.table.lookup_mut(pid, fd)?;

        if entry.conn.state != ConnectionState::ESTABLISHED {
            return Err(SocketError::InvalidState {
                op: "write",
                state: entry.conn.state,
            }
            .into());
        }

        if data.is_empty() {
            return Ok(Some(Completion::value(0)));
        }

        let (base_seq, segments) = entry.conn.send(&data)?;
        let rto = entry.conn.rtt().rto();

        debug!(
            "[{}] (ESTABLISHED) sending {} bytes in {} segments, rto {rto:?}",
            entry.conn.socket(),
            data.len(),
            segments.len()
        );

        entry.waiters.writes.push_back(PendingWrite {
            handle,
            base_seq,
            data,
        });

        for segment in &segments {
            let timer = host.add_timer(TimerPayload::Retransmit { conn: id }, rto);
            entry
                .conn
                .send_window_mut()
                .push(segment.end_seq(), timer, Some(now));

            transmit_or_drop(host, &self.config, segment);
        }

        Ok(None)
    }

    fn close<H: Host>(&mut self, host: &mut H, pid: Pid, fd: Fd) -> Result<Completion> {
        let id = self.table.lookup(pid, fd)?;
        self.release(host, id);

        debug!("[pid {pid}] close({fd})");

        Ok(Completion::value(0))
    }

    fn getsockname(&self, pid: Pid, fd: Fd) -> Result<Completion> {
        let id = self.table.lookup(pid, fd)?;
        let entry = self
            .table
            .get(id)
            .ok_or(SocketError::BadDescriptor { pid, fd })?;

        Ok(Completion::with_output(0, Output::Addr(entry.conn.local())))
    }

    fn getpeername(&self, pid: Pid, fd: Fd) -> Result<Completion> {
        let id = self.table.lookup(pid, fd)?;
        let peer = self
            .table
            .get(id)
            .and_then(|e| e.conn.remote())
            .ok_or(SocketError::NotConnected)?;

        Ok(Completion::with_output(0, Output::Addr(peer.into())))
    }

    /// Tears down a socket: cancels its timers, fails its parked syscalls,
    /// detaches it from its listener and frees its descriptor.
    fn release<H: Host>(&mut self, host: &mut H, id: ConnId) {
        let Some(mut entry) = self.table.remove(id) else {
            return;
        };

        for timer in entry.conn.send_window_mut().clear() {
            host.cancel_timer(timer);
        }

        fail_waiters(host, &mut entry.waiters);

        if let Some(backlog) = entry
            .parent
            .and_then(|p| self.table.get_mut(p))
            .and_then(|l| l.backlog.as_mut())
        {
            backlog.remove(id);
        }
    }

    fn on_segment<H: Host>(&mut self, host: &mut H, segment: &TcpSegment) -> Result<()> {
        let sock = segment.receiver_socket();

        if let Some(id) = self.table.find_pair(&sock) {
            return self.on_connection_segment(host, id, segment);
        }

        if segment.tcp.syn() && !segment.tcp.ack() {
            if let Some(id) = self.table.find_listener(sock.src, sock.dst) {
                let listening = self
                    .table
                    .get(id)
                    .is_some_and(|e| e.conn.state == ConnectionState::LISTEN);

                return if listening {
                    self.on_listener_syn(host, id, segment)
                } else {
                    self.on_connection_segment(host, id, segment)
                };
            }
        }

        debug!("[{sock}] no connection for {}: dropping", segment.kind());

        Ok(())
    }

    fn on_listener_syn<H: Host>(
        &mut self,
        host: &mut H,
        listener: ConnId,
        syn: &TcpSegment,
    ) -> Result<()> {
        let Some(entry) = self.table.get(listener) else {
            return Ok(());
        };

        let pid = entry.pid;

        if !entry.backlog.as_ref().is_some_and(AcceptBacklog::has_room) {
            debug!(
                "[{}] (LISTEN) received SYN, backlog full: dropping",
                syn.receiver_socket()
            );
            return Ok(());
        }

        let iss = self.initial_sequence(host.now());
        let (child, syn_ack) = Connection::open_passive(&self.config, syn, iss)?;
        let rto = child.rtt().rto();

        let (fd, id) = self.table.allocate(pid, child, Some(listener));
        self.table.index_pair(id);
        self.table.index_port(id);

        if let Some(backlog) = self
            .table
            .get_mut(listener)
            .and_then(|l| l.backlog.as_mut())
        {
            backlog.add_pending(id);
        }

        let timer = host.add_timer(TimerPayload::Handshake { conn: id }, rto);

        if let Some(child) = self.table.get_mut(id) {
            child.waiters.handshake = Some(HandshakeRetry { timer, attempts: 0 });
        }

        debug!("[pid {pid}] half-open connection {id} on fd {fd}");

        transmit(host, &self.config, &syn_ack)
    }

    fn on_connection_segment<H: Host>(
        &mut self,
        host: &mut H,
        id: ConnId,
        segment: &TcpSegment,
    ) -> Result<()> {
        let now = host.now();

        let Some(entry) = self.table.get_mut(id) else {
            return Ok(());
        };

        let outcome = entry.conn.on_segment(segment, now)?;

        for timer in &outcome.retired {
            host.cancel_timer(*timer);
        }

        if outcome.acked {
            let una = entry.conn.snd_una();

            while entry
                .waiters
                .writes
                .front()
                .is_some_and(|w| seq::wrapping_le(w.end_seq(), una))
            {
                if let Some(write) = entry.waiters.writes.pop_front() {
                    host.complete_syscall(write.handle, Completion::value(write.data.len() as i32));
                }
            }
        }

        let parent = entry.parent;

        if outcome.established {
            if let Some(retry) = entry.waiters.handshake.take() {
                host.cancel_timer(retry.timer);
            }

            if let Some(pending) = entry.waiters.connect.take() {
                host.cancel_timer(pending.timer);
                host.complete_syscall(pending.handle, Completion::value(0));
            }

            if let Some(backlog) = parent
                .and_then(|p| self.table.get_mut(p))
                .and_then(|l| l.backlog.as_mut())
            {
                backlog.promote(id);
            }
        }

        if let Some(reply) = &outcome.reply {
            transmit(host, &self.config, reply)?;
        }

        Ok(())
    }

    fn on_connect_timer<H: Host>(&mut self, host: &mut H, id: ConnId) -> Result<()> {
        let Some(entry) = self.table.get_mut(id) else {
            return Ok(());
        };

        let Some(mut pending) = entry.waiters.connect else {
            return Ok(());
        };

        let state = entry.conn.state;
        let sock = entry.conn.socket();

        let segment = match state {
            ConnectionState::SYN_SENT | ConnectionState::SYN_RECEIVED
                if pending.attempts >= self.config.max_syn_retries =>
            {
                entry.waiters.connect = None;

                for timer in entry.conn.reset() {
                    host.cancel_timer(timer);
                }

                let err = Error::from(SocketError::ConnectionRefused {
                    attempts: pending.attempts,
                });

                warn!("[{sock}] ({state:?}) {err}: {state:?} -> CLOSED");

                host.complete_syscall(pending.handle, Completion::failed());
                self.table.unindex_pair(id);

                return Ok(());
            }
            ConnectionState::SYN_SENT => entry.conn.create_syn()?,
            ConnectionState::SYN_RECEIVED => entry.conn.create_syn_ack()?,
            ConnectionState::ESTABLISHED => {
                entry.waiters.connect = None;
                host.complete_syscall(pending.handle, Completion::value(0));
                return Ok(());
            }
            _ => {
                entry.waiters.connect = None;
                return Ok(());
            }
        };

        pending.attempts += 1;
        pending.timer = host.add_timer(TimerPayload::Connect { conn: id }, self.config.poll_interval);
        entry.waiters.connect = Some(pending);

        warn!(
            "[{sock}] ({state:?}) no answer, resending {} (attempt {})",
            segment.kind(),
            pending.attempts
        );

        transmit(host, &self.config, &segment)
    }

    fn on_handshake_timer<H: Host>(&mut self, host: &mut H, id: ConnId) -> Result<()> {
        let Some(entry) = self.table.get_mut(id) else {
            return Ok(());
        };

        let Some(mut retry) = entry.waiters.handshake.take() else {
            return Ok(());
        };

        if entry.conn.state != ConnectionState::SYN_RECEIVED {
            return Ok(());
        }

        let sock = entry.conn.socket();

        if retry.attempts >= self.config.max_syn_retries {
            warn!(
                "[{sock}] (SYN_RECEIVED) no ACK after {} SYN_ACKs, dropping half-open connection",
                retry.attempts + 1
            );

            self.release(host, id);
            return Ok(());
        }

        let syn_ack = entry.conn.create_syn_ack()?;

        retry.attempts += 1;
        retry.timer = host.add_timer(TimerPayload::Handshake { conn: id }, entry.conn.rtt().rto());
        entry.waiters.handshake = Some(retry);

        debug!(
            "[{sock}] (SYN_RECEIVED) resending SYN_ACK (attempt {})",
            retry.attempts
        );

        transmit(host, &self.config, &syn_ack)
    }

    /// Whole-buffer retransmission: every pending write is resent from its
    /// base sequence number. Resent segments never produce RTT samples.
    fn on_retransmit_timer<H: Host>(&mut self, host: &mut H, id: ConnId) -> Result<()> {
        let Some(entry) = self.table.get_mut(id) else {
            return Ok(());
        };

        if entry.conn.state != ConnectionState::ESTABLISHED {
            return Ok(());
        }

        for timer in entry.conn.send_window_mut().clear() {
            host.cancel_timer(timer);
        }

        let una = entry.conn.snd_una();
        let rto = entry.conn.rtt().rto();

        warn!(
            "[{}] (ESTABLISHED) retransmission timeout, resending {} pending writes from {una}",
            entry.conn.socket(),
            entry.waiters.writes.len()
        );

        for write in &entry.waiters.writes {
            for segment in entry.conn.segments_from(write.base_seq, &write.data)? {
                if seq::wrapping_lt(una, segment.end_seq()) {
                    let timer = host.add_timer(TimerPayload::Retransmit { conn: id }, rto);
                    entry
                        .conn
                        .send_window_mut()
                        .push(segment.end_seq(), timer, None);
                }

                transmit_or_drop(host, &self.config, &segment);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TimerId;
    use crate::protocol::headers::{TcpHeader, checksum};

    const SERVER_IP: [u8; 4] = [10, 0, 0, 2];
    const CLIENT: SocketAddr = SocketAddr::new([10, 0, 0, 1], 9000);
    const SERVER: SocketAddr = SocketAddr::new(SERVER_IP, 80);

    /// Records everything the engine asks of its host.
    #[derive(Debug, Default)]
    struct MockHost {
        now: Duration,
        ip: [u8; 4],
        sent: Vec<(String, Vec<u8>)>,
        timers: Vec<(TimerId, TimerPayload)>,
        next_timer: u64,
        completions: Vec<(SyscallHandle, Completion)>,
        next_handle: u64,
        /// When set, every destination is unroutable.
        no_route: bool,
    }

    impl Host for MockHost {
        fn send_packet(&mut self, interface: &str, frame: &[u8]) {
            self.sent.push((interface.to_string(), frame.to_vec()));
        }

        fn get_local_ip(&self, interface: usize) -> Option<[u8; 4]> {
            (interface == 1).then_some(self.ip)
        }

        fn lookup_route(&self, _dst: [u8; 4]) -> Option<usize> {
            (!self.no_route).then_some(1)
        }

        fn add_timer(&mut self, payload: TimerPayload, _delay: Duration) -> TimerId {
            self.next_timer += 1;
            let id = TimerId(self.next_timer);
            self.timers.push((id, payload));
            id
        }

        fn cancel_timer(&mut self, timer: TimerId) {
            self.timers.retain(|(id, _)| *id != timer);
        }

        fn complete_syscall(&mut self, handle: SyscallHandle, completion: Completion) {
            self.completions.push((handle, completion));
        }

        fn now(&self) -> Duration {
            self.now
        }
    }

    impl MockHost {
        fn new(ip: [u8; 4]) -> Self {
            Self {
                ip,
                ..Default::default()
            }
        }

        /// Issues a syscall and returns its completion, if it completed.
        fn call(&mut self, engine: &mut TcpEngine, pid: Pid, call: Syscall) -> Option<Completion> {
            self.next_handle += 1;
            let handle = SyscallHandle(self.next_handle);

            engine.system_call(self, handle, pid, call);
            self.completion(handle)
        }

        fn completion(&self, handle: SyscallHandle) -> Option<Completion> {
            self.completions
                .iter()
                .find(|(h, _)| *h == handle)
                .map(|(_, c)| c.clone())
        }

        fn sent_segments(&self) -> Vec<TcpSegment> {
            self.sent
                .iter()
                .map(|(_, frame)| TcpSegment::parse(frame).unwrap())
                .collect()
        }

        fn results(&self, handle: SyscallHandle) -> Vec<i32> {
            self.completions
                .iter()
                .filter(|(h, _)| *h == handle)
                .map(|(_, c)| c.result)
                .collect()
        }

        fn retransmit_timers(&self) -> usize {
            self.timers
                .iter()
                .filter(|(_, p)| matches!(p, TimerPayload::Retransmit { .. }))
                .count()
        }

        /// Fires the first armed timer whose payload matches.
        fn fire(&mut self, engine: &mut TcpEngine, matches: impl Fn(&TimerPayload) -> bool) -> bool {
            let Some(pos) = self.timers.iter().position(|(_, p)| matches(p)) else {
                return false;
            };

            let (_, payload) = self.timers.remove(pos);
            engine.timer_expired(self, payload);
            true
        }
    }

    fn engine() -> TcpEngine {
        TcpEngine::new(Config {
            initial_sequence: Some(1000),
            max_syn_retries: 3,
            ..Default::default()
        })
        .unwrap()
    }

    fn listener(engine: &mut TcpEngine, host: &mut MockHost, backlog: usize) -> Fd {
        let fd = host.call(engine, 1, Syscall::Socket).unwrap().result;
        let bind = Syscall::Bind {
            fd,
            addr: SERVER.into(),
        };

        assert_eq!(host.call(engine, 1, bind).unwrap().result, 0);
        assert_eq!(
            host.call(engine, 1, Syscall::Listen { fd, backlog }).unwrap().result,
            0
        );

        fd
    }

    /// A SYN from `port` on the client host, built by a standalone
    /// connection.
    fn client_syn(port: u16) -> (Connection, Vec<u8>) {
        let mut conn = Connection::new(&Config::default());
        conn.set_local(SocketAddr::new(CLIENT.addr, port));

        let syn = conn.open_active(SERVER, 7000).unwrap();
        let frame = syn.to_frame().unwrap();

        (conn, frame)
    }

    /// Runs a full handshake from client port 9000 and accepts the child.
    /// Returns the client side, the listener and the accepted descriptor.
    fn established(engine: &mut TcpEngine, host: &mut MockHost) -> (Connection, Fd, Fd) {
        let lfd = listener(engine, host, 2);

        let (mut client, syn) = client_syn(9000);
        engine.packet_arrived(host, &syn);

        let syn_ack = host.sent_segments().pop().unwrap();
        let ack = client
            .on_segment(&syn_ack, Duration::ZERO)
            .unwrap()
            .reply
            .unwrap();
        engine.packet_arrived(host, &ack.to_frame().unwrap());

        let fd = host.call(engine, 1, Syscall::Accept { fd: lfd }).unwrap().result;
        assert_eq!(fd, lfd + 1);

        (client, lfd, fd)
    }

    /// Delivers `segment` to the client and hands its ACK back to the engine.
    fn ack_from_client(
        engine: &mut TcpEngine,
        host: &mut MockHost,
        client: &mut Connection,
        segment: &TcpSegment,
    ) -> TcpSegment {
        let ack = client.on_segment(segment, host.now).unwrap().reply.unwrap();
        engine.packet_arrived(host, &ack.to_frame().unwrap());
        ack
    }

    #[test]
    fn descriptors_start_at_three_and_are_reused() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);

        let a = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;
        let b = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;
        assert_eq!((a, b), (3, 4));

        assert_eq!(host.call(&mut engine, 1, Syscall::Close { fd: a }).unwrap().result, 0);
        assert_eq!(host.call(&mut engine, 1, Syscall::Close { fd: a }).unwrap().result, -1);
        assert_eq!(host.call(&mut engine, 1, Syscall::Socket).unwrap().result, 3);
    }

    #[test]
    fn bind_rules() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);

        let a = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;
        let b = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;

        let bind = |fd, addr: SocketAddr| Syscall::Bind {
            fd,
            addr: addr.into(),
        };

        assert_eq!(host.call(&mut engine, 1, bind(a, SERVER)).unwrap().result, 0);
        assert_eq!(host.call(&mut engine, 1, bind(a, CLIENT)).unwrap().result, -1);

        let any = SocketAddr::new([0, 0, 0, 0], 80);
        assert_eq!(host.call(&mut engine, 1, bind(b, any)).unwrap().result, -1);
        assert_eq!(host.call(&mut engine, 1, bind(b, SERVER)).unwrap().result, -1);

        // Another process may reuse the address.
        let c = host.call(&mut engine, 2, Syscall::Socket).unwrap().result;
        assert_eq!(host.call(&mut engine, 2, bind(c, SERVER)).unwrap().result, 0);
    }

    #[test]
    fn listen_without_bind_fails() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);

        let fd = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;
        let res = host.call(&mut engine, 1, Syscall::Listen { fd, backlog: 1 });

        assert_eq!(res.unwrap().result, -1);
    }

    #[test]
    fn getsockname_returns_bound_bytes_verbatim() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);

        let mut raw = *SockAddrIn::from(SERVER).as_bytes();
        raw[12] = 0x5A;
        let addr = SockAddrIn::from_bytes(raw);

        let fd = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;
        host.call(&mut engine, 1, Syscall::Bind { fd, addr });

        let res = host.call(&mut engine, 1, Syscall::GetSockName { fd }).unwrap();
        assert_eq!(res.addr(), Some(addr));

        let res = host.call(&mut engine, 1, Syscall::GetPeerName { fd }).unwrap();
        assert_eq!(res.result, -1);
    }

    #[test]
    fn connect_binds_implicitly_and_sends_syn() {
        let mut engine = engine();
        let mut host = MockHost::new([10, 0, 0, 1]);

        let fd = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;
        let res = host.call(
            &mut engine,
            1,
            Syscall::Connect {
                fd,
                addr: SERVER.into(),
            },
        );

        assert!(res.is_none());
        assert_eq!(host.sent.len(), 1);
        assert_eq!(host.sent[0].0, "eth1");

        let syn = &host.sent_segments()[0];
        assert_eq!(syn.kind(), "SYN");
        assert_eq!(syn.tcp.seq_number(), 1000);
        assert_eq!(syn.src(), SocketAddr::new([10, 0, 0, 1], 49152));
        assert_eq!(syn.dst(), SERVER);

        let conn = engine.connection(1, fd).unwrap();
        assert_eq!(conn.state, ConnectionState::SYN_SENT);
        assert_eq!(conn.local_addr(), syn.src());
    }

    #[test]
    fn connect_gives_up_after_retries() {
        let mut engine = engine();
        let mut host = MockHost::new([10, 0, 0, 1]);

        let fd = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;
        host.next_handle += 1;
        let handle = SyscallHandle(host.next_handle);
        engine.system_call(
            &mut host,
            handle,
            1,
            Syscall::Connect {
                fd,
                addr: SERVER.into(),
            },
        );

        while host.fire(&mut engine, |p| matches!(p, TimerPayload::Connect { .. })) {}

        // The first SYN plus one per retry.
        assert_eq!(host.sent.len(), 4);
        assert!(host.sent_segments().iter().all(|s| s.kind() == "SYN"));
        assert_eq!(host.completion(handle).unwrap().result, -1);
        assert_eq!(engine.connection(1, fd).unwrap().state, ConnectionState::CLOSED);
        assert!(host.timers.is_empty());

        // The socket can try again.
        assert!(
            host.call(
                &mut engine,
                1,
                Syscall::Connect {
                    fd,
                    addr: SERVER.into()
                }
            )
            .is_none()
        );
    }

    #[test]
    fn connect_twice_fails() {
        let mut engine = engine();
        let mut host = MockHost::new([10, 0, 0, 1]);

        let fd = host.call(&mut engine, 1, Syscall::Socket).unwrap().result;
        let connect = Syscall::Connect {
            fd,
            addr: SERVER.into(),
        };

        assert!(host.call(&mut engine, 1, connect.clone()).is_none());
        assert_eq!(host.call(&mut engine, 1, connect).unwrap().result, -1);
    }

    #[test]
    fn listener_answers_syn_and_queues_child() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        let lfd = listener(&mut engine, &mut host, 2);

        let (mut client, syn) = client_syn(9000);
        engine.packet_arrived(&mut host, &syn);

        let syn_ack = host.sent_segments().pop().unwrap();
        assert_eq!(syn_ack.kind(), "SYN_ACK");
        assert_eq!(syn_ack.tcp.ack_number(), 7001);
        assert_eq!(syn_ack.src(), SERVER);

        // Half-open children are not accepted yet.
        let accept = host.call(&mut engine, 1, Syscall::Accept { fd: lfd });
        assert!(accept.is_none());
        let parked = host.next_handle;

        let ack = client
            .on_segment(&syn_ack, Duration::ZERO)
            .unwrap()
            .reply
            .unwrap();
        engine.packet_arrived(&mut host, &ack.to_frame().unwrap());

        assert!(host.fire(&mut engine, |p| matches!(p, TimerPayload::Accept { .. })));

        let accepted = host.completion(SyscallHandle(parked)).unwrap();
        assert_eq!(accepted.result, lfd + 1);
        assert_eq!(accepted.addr(), Some(CLIENT.into()));

        let child = engine.connection(1, accepted.result).unwrap();
        assert_eq!(child.state, ConnectionState::ESTABLISHED);
        assert_eq!(child.local_addr(), SERVER);

        // No handshake retry left armed.
        assert!(!host
            .timers
            .iter()
            .any(|(_, p)| matches!(p, TimerPayload::Handshake { .. })));
    }

    #[test]
    fn full_backlog_drops_syn_silently() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        listener(&mut engine, &mut host, 1);

        engine.packet_arrived(&mut host, &client_syn(9000).1);
        assert_eq!(host.sent.len(), 1);

        engine.packet_arrived(&mut host, &client_syn(9001).1);
        assert_eq!(host.sent.len(), 1);
        assert_eq!(engine.table().len(), 2);
    }

    #[test]
    fn syn_to_unknown_port_dropped() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);

        engine.packet_arrived(&mut host, &client_syn(9000).1);

        assert!(host.sent.is_empty());
        assert!(engine.table().is_empty());
    }

    #[test]
    fn corrupted_syn_changes_nothing() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        listener(&mut engine, &mut host, 4);

        let (_, mut syn) = client_syn(9000);
        let last = syn.len() - 1;
        syn[last] ^= 0xFF;

        engine.packet_arrived(&mut host, &syn);

        assert!(host.sent.is_empty());
        assert_eq!(engine.table().len(), 1);
    }

    #[test]
    fn half_open_child_dropped_after_retries() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        listener(&mut engine, &mut host, 1);

        engine.packet_arrived(&mut host, &client_syn(9000).1);
        assert_eq!(engine.table().len(), 2);

        while host.fire(&mut engine, |p| matches!(p, TimerPayload::Handshake { .. })) {}

        // Original SYN_ACK plus three retries.
        assert_eq!(host.sent.len(), 4);
        assert_eq!(engine.table().len(), 1);

        // The slot is free again.
        engine.packet_arrived(&mut host, &client_syn(9001).1);
        assert_eq!(host.sent.len(), 5);
    }

    #[test]
    fn duplicate_syn_resends_syn_ack() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        listener(&mut engine, &mut host, 4);

        let (_, syn) = client_syn(9000);
        engine.packet_arrived(&mut host, &syn);
        engine.packet_arrived(&mut host, &syn);

        let sent = host.sent_segments();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(engine.table().len(), 2);
    }

    #[test]
    fn read_and_write_need_established() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        let fd = listener(&mut engine, &mut host, 1);

        let write = Syscall::Write {
            fd,
            data: b"x".to_vec(),
        };

        assert_eq!(host.call(&mut engine, 1, write).unwrap().result, -1);
        assert_eq!(
            host.call(&mut engine, 1, Syscall::Read { fd, len: 1 })
                .unwrap()
                .result,
            -1
        );
    }

    #[test]
    fn rst_and_fin_ignored() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        listener(&mut engine, &mut host, 1);

        let (mut client, syn) = client_syn(9000);
        engine.packet_arrived(&mut host, &syn);

        let syn_ack = host.sent_segments().pop().unwrap();
        let ack = client
            .on_segment(&syn_ack, Duration::ZERO)
            .unwrap()
            .reply
            .unwrap();

        // An otherwise valid handshake ACK, with RST or FIN added.
        for flag in [TcpHeader::RST, TcpHeader::FIN] {
            let mut frame = ack.to_frame().unwrap();
            frame[47] |= flag;

            let sum = checksum::tcp(CLIENT.addr, SERVER_IP, 6, &frame[34..]);
            frame[50..52].copy_from_slice(&sum.to_be_bytes());

            engine.packet_arrived(&mut host, &frame);
        }

        let child = engine.connection(1, 4).unwrap();
        assert_eq!(child.state, ConnectionState::SYN_RECEIVED);
        assert_eq!(host.sent.len(), 1);

        engine.packet_arrived(&mut host, &ack.to_frame().unwrap());
        assert_eq!(
            engine.connection(1, 4).unwrap().state,
            ConnectionState::ESTABLISHED
        );
    }

    #[test]
    fn relisten_releases_queued_children() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        let lfd = listener(&mut engine, &mut host, 2);

        engine.packet_arrived(&mut host, &client_syn(9000).1);
        assert!(engine.connection(1, lfd + 1).is_some());

        let relisten = Syscall::Listen { fd: lfd, backlog: 1 };
        assert_eq!(host.call(&mut engine, 1, relisten).unwrap().result, 0);

        assert!(engine.connection(1, lfd + 1).is_none());
        assert!(host.timers.is_empty());

        // The new queue starts empty.
        engine.packet_arrived(&mut host, &client_syn(9001).1);
        assert_eq!(host.sent_segments().pop().unwrap().kind(), "SYN_ACK");
        assert_eq!(host.sent.len(), 2);
    }

    #[test]
    fn unroutable_write_is_recovered_by_retransmission() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        let (mut client, _, fd) = established(&mut engine, &mut host);
        let sent = host.sent.len();

        host.no_route = true;
        let write = Syscall::Write {
            fd,
            data: b"hello".to_vec(),
        };
        assert!(host.call(&mut engine, 1, write).is_none());
        let handle = SyscallHandle(host.next_handle);

        assert_eq!(host.sent.len(), sent);
        assert!(host.results(handle).is_empty());
        assert_eq!(host.retransmit_timers(), 1);

        let id = engine.table.lookup(1, fd).unwrap();
        assert_eq!(engine.table.get(id).unwrap().waiters.writes.len(), 1);

        host.no_route = false;
        assert!(host.fire(&mut engine, |p| matches!(p, TimerPayload::Retransmit { .. })));

        let resent = host.sent_segments().pop().unwrap();
        assert_eq!(resent.payload, b"hello");
        assert_eq!(resent.tcp.seq_number(), 1001);

        ack_from_client(&mut engine, &mut host, &mut client, &resent);

        assert_eq!(host.results(handle), vec![5]);
        assert!(host.timers.is_empty());
    }

    #[test]
    fn timeout_resends_whole_write_without_sampling_rtt() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        let (mut client, _, fd) = established(&mut engine, &mut host);
        let mss = Config::default().mss;

        let write = Syscall::Write {
            fd,
            data: vec![7; 2 * mss],
        };
        assert!(host.call(&mut engine, 1, write).is_none());
        let handle = SyscallHandle(host.next_handle);

        let sent = host.sent_segments();
        let [first, second] = &sent[sent.len() - 2..] else {
            unreachable!()
        };
        assert_eq!(first.tcp.seq_number(), 1001);
        assert_eq!(second.tcp.seq_number(), 1001 + mss as u32);
        assert_eq!(host.retransmit_timers(), 2);
        assert!(!engine.connection(1, fd).unwrap().rtt().is_seeded());

        // Only the first segment gets through.
        host.now = Duration::from_millis(40);
        ack_from_client(&mut engine, &mut host, &mut client, first);

        let conn = engine.connection(1, fd).unwrap();
        assert!(conn.rtt().is_seeded());
        assert_eq!(conn.rtt().estimate(), Duration::from_millis(40));
        assert_eq!(host.retransmit_timers(), 1);
        assert!(host.results(handle).is_empty());

        let before = host.sent.len();
        assert!(host.fire(&mut engine, |p| matches!(p, TimerPayload::Retransmit { .. })));

        let resent = host.sent_segments().split_off(before);
        let seqs: Vec<_> = resent.iter().map(|s| s.tcp.seq_number()).collect();
        assert_eq!(seqs, vec![1001, 1001 + mss as u32]);

        // Only the unacknowledged segment is timed again.
        assert_eq!(host.retransmit_timers(), 1);
        assert_eq!(engine.connection(1, fd).unwrap().send_window().len(), 1);

        host.now = Duration::from_millis(500);
        ack_from_client(&mut engine, &mut host, &mut client, &resent[1]);

        let conn = engine.connection(1, fd).unwrap();
        assert_eq!(conn.rtt().estimate(), Duration::from_millis(40));
        assert!(conn.send_window().is_empty());
        assert_eq!(host.results(handle), vec![2 * mss as i32]);
        assert!(host.timers.is_empty());
    }

    #[test]
    fn second_blocking_call_fails_while_first_is_parked() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        let (_client, lfd, fd) = established(&mut engine, &mut host);

        assert!(host.call(&mut engine, 1, Syscall::Accept { fd: lfd }).is_none());
        let accept = SyscallHandle(host.next_handle);
        assert_eq!(
            host.call(&mut engine, 1, Syscall::Accept { fd: lfd }).unwrap().result,
            -1
        );

        let read = Syscall::Read { fd, len: 10 };
        assert!(host.call(&mut engine, 1, read.clone()).is_none());
        let parked_read = SyscallHandle(host.next_handle);
        assert_eq!(host.call(&mut engine, 1, read).unwrap().result, -1);

        // The original calls are still parked.
        assert!(host.results(accept).is_empty());
        assert!(host.results(parked_read).is_empty());
    }

    #[test]
    fn close_fails_parked_calls_and_cancels_their_timers() {
        let mut engine = engine();
        let mut host = MockHost::new(SERVER_IP);
        let (_client, lfd, fd) = established(&mut engine, &mut host);

        assert!(host.call(&mut engine, 1, Syscall::Accept { fd: lfd }).is_none());
        let accept = SyscallHandle(host.next_handle);

        assert!(host.call(&mut engine, 1, Syscall::Read { fd, len: 10 }).is_none());
        let read = SyscallHandle(host.next_handle);

        let write = Syscall::Write {
            fd,
            data: b"x".to_vec(),
        };
        assert!(host.call(&mut engine, 1, write).is_none());
        let write = SyscallHandle(host.next_handle);

        assert_eq!(host.timers.len(), 3);

        assert_eq!(host.call(&mut engine, 1, Syscall::Close { fd }).unwrap().result, 0);
        assert_eq!(host.results(read), vec![-1]);
        assert_eq!(host.results(write), vec![-1]);
        assert!(host.results(accept).is_empty());

        assert_eq!(host.call(&mut engine, 1, Syscall::Close { fd: lfd }).unwrap().result, 0);
        assert_eq!(host.results(accept), vec![-1]);

        assert!(host.timers.is_empty());
    }
}
