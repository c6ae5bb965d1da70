//! Deterministic discrete-event harness for driving [TcpEngine]s.
//!
//! A [Simulation] owns a virtual clock, a queue of pending frame deliveries
//! and timer expiries, and any number of hosts, each running its own engine.
//! Events fire in time order, ties broken by the order they were scheduled,
//! so a run is fully reproducible.
//!
//! Frames travel over a single shared [Link] whose policy can delay, reorder,
//! duplicate, drop or hold them for manual inspection.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::mem;
use std::time::Duration;

use crate::Result;
use crate::config::Config;
use crate::net::{Completion, Host, Pid, Syscall, SyscallHandle, TcpEngine, TimerId, TimerPayload};
use crate::protocol::headers::{IP_START, Ipv4Header, TCP_START};
use crate::{debug, warn};

/// Index of a host within a [Simulation].
pub type HostId = usize;

/// How long [Simulation::call] waits for a completion, in virtual time.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Delivery policy of the shared link.
///
/// Counters for `duplicate_every` and `drop_every` run over every frame
/// offered to the link since the simulation started.
#[derive(Debug, Clone)]
pub struct Link {
    /// Base one-way delay.
    pub latency: Duration,
    /// Extra per-frame delay, spread deterministically over `0..=jitter`.
    /// Any non-zero jitter reorders frames.
    pub jitter: Duration,
    /// Deliver every n-th frame twice.
    pub duplicate_every: Option<u64>,
    /// Silently lose every n-th frame.
    pub drop_every: Option<u64>,
    /// Capture every frame instead of delivering it; see
    /// [Simulation::held_frames] and [Simulation::inject].
    pub hold: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(1),
            jitter: Duration::ZERO,
            duplicate_every: None,
            drop_every: None,
            hold: false,
        }
    }
}

impl Link {
    /// Returns the delay applied to the `n`-th frame.
    fn delay(&self, n: u64) -> Duration {
        let spread = (n.wrapping_mul(7919) % 11) as f64 / 10.0;
        self.latency + self.jitter.mul_f64(spread)
    }
}

#[derive(Debug)]
enum Event {
    Frame {
        host: HostId,
        frame: Vec<u8>,
    },
    Timer {
        host: HostId,
        timer: TimerId,
        payload: TimerPayload,
    },
}

/// An event and the time it is due.
#[derive(Debug)]
struct Scheduled {
    at: Duration,
    order: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.order) == (other.at, other.order)
    }
}

impl Eq for Scheduled {}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.order).cmp(&(other.at, other.order))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct SimHost {
    engine: TcpEngine,
    interfaces: Vec<[u8; 4]>,
    completions: HashMap<SyscallHandle, Completion>,
}

/// The [Host] seen by an engine while one of its entry points runs. Effects
/// are collected and applied to the simulation once the engine returns.
struct HostCtx<'a> {
    now: Duration,
    interfaces: &'a [[u8; 4]],
    completions: &'a mut HashMap<SyscallHandle, Completion>,
    next_timer: &'a mut u64,
    outbox: Vec<Vec<u8>>,
    armed: Vec<(TimerId, TimerPayload, Duration)>,
    cancelled: Vec<TimerId>,
}

impl Host for HostCtx<'_> {
    fn send_packet(&mut self, interface: &str, frame: &[u8]) {
        debug!("{interface}: sending {} byte frame", frame.len());
        self.outbox.push(frame.to_vec());
    }

    fn get_local_ip(&self, interface: usize) -> Option<[u8; 4]> {
        self.interfaces.get(interface).copied()
    }

    fn lookup_route(&self, dst: [u8; 4]) -> Option<usize> {
        // Directly connected /24 first, then the first interface as default.
        self.interfaces
            .iter()
            .position(|addr| addr[..3] == dst[..3])
            .or_else(|| (!self.interfaces.is_empty()).then_some(0))
    }

    fn add_timer(&mut self, payload: TimerPayload, delay: Duration) -> TimerId {
        *self.next_timer += 1;
        let timer = TimerId(*self.next_timer);

        self.armed.push((timer, payload, delay));
        timer
    }

    fn cancel_timer(&mut self, timer: TimerId) {
        self.cancelled.push(timer);
    }

    fn complete_syscall(&mut self, handle: SyscallHandle, completion: Completion) {
        self.completions.insert(handle, completion);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

/// A set of hosts joined by one link, driven by a virtual clock.
#[derive(Debug, Default)]
pub struct Simulation {
    now: Duration,
    link: Link,
    hosts: Vec<SimHost>,
    queue: BinaryHeap<Reverse<Scheduled>>,
    /// Timers still queued.
    pending: HashSet<TimerId>,
    /// Queued timers that must not fire.
    cancelled: HashSet<TimerId>,
    held: Vec<Vec<u8>>,
    next_order: u64,
    next_timer: u64,
    next_handle: u64,
    frames: u64,
}

impl Simulation {
    /// Creates an empty simulation at time zero.
    pub fn new(link: Link) -> Self {
        Self {
            link,
            ..Default::default()
        }
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Replaces the link policy. Frames already in flight are unaffected.
    pub fn set_link(&mut self, link: Link) {
        self.link = link;
    }

    /// Adds a host with one interface per address, interface `i` having
    /// address `interfaces[i]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn add_host(&mut self, config: Config, interfaces: &[[u8; 4]]) -> Result<HostId> {
        self.hosts.push(SimHost {
            engine: TcpEngine::new(config)?,
            interfaces: interfaces.to_vec(),
            completions: HashMap::new(),
        });

        Ok(self.hosts.len() - 1)
    }

    /// Returns the engine of `host`.
    ///
    /// # Panics
    ///
    /// Panics if `host` was not returned by [Simulation::add_host].
    pub fn engine(&self, host: HostId) -> &TcpEngine {
        &self.hosts[host].engine
    }

    /// Issues a syscall on `host` without waiting for it.
    pub fn syscall(&mut self, host: HostId, pid: Pid, call: Syscall) -> SyscallHandle {
        self.next_handle += 1;
        let handle = SyscallHandle(self.next_handle);

        self.dispatch(host, |engine, ctx| {
            engine.system_call(ctx, handle, pid, call);
        });

        handle
    }

    /// Returns the completion of a syscall, if it has completed.
    pub fn completion(&self, host: HostId, handle: SyscallHandle) -> Option<Completion> {
        self.hosts.get(host)?.completions.get(&handle).cloned()
    }

    /// Runs events until the syscall completes, giving up after
    /// [CALL_TIMEOUT] of virtual time.
    pub fn wait(&mut self, host: HostId, handle: SyscallHandle) -> Option<Completion> {
        let deadline = self.now + CALL_TIMEOUT;

        loop {
            if let Some(completion) = self.completion(host, handle) {
                return Some(completion);
            }

            if self.next_due().is_none_or(|at| at > deadline) {
                warn!("syscall {handle:?} on host {host} did not complete");
                return None;
            }

            self.step();
        }
    }

    /// Issues a syscall and runs until it completes.
    pub fn call(&mut self, host: HostId, pid: Pid, call: Syscall) -> Option<Completion> {
        let handle = self.syscall(host, pid, call);
        self.wait(host, handle)
    }

    /// Runs every event due within the next `duration`, then advances the
    /// clock to its end.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;

        while self.next_due().is_some_and(|at| at <= end) {
            self.step();
        }

        self.now = end;
    }

    /// Runs until no event is pending. Returns `false` if events remain after
    /// `limit` of virtual time, as happens while a syscall is blocked.
    pub fn run_until_idle(&mut self, limit: Duration) -> bool {
        let end = self.now + limit;

        while let Some(at) = self.next_due() {
            if at > end {
                return false;
            }

            self.step();
        }

        true
    }

    /// Takes every frame captured while the link was holding.
    pub fn held_frames(&mut self) -> Vec<Vec<u8>> {
        mem::take(&mut self.held)
    }

    /// Delivers a frame after the link latency, bypassing the link policy.
    pub fn inject(&mut self, frame: Vec<u8>) {
        if let Some(host) = self.destination(&frame) {
            let at = self.now + self.link.latency;
            self.schedule(at, Event::Frame { host, frame });
        }
    }

    /// Runs the next event. Returns `false` if none is pending.
    pub fn step(&mut self) -> bool {
        let Some(Reverse(next)) = self.queue.pop() else {
            return false;
        };

        self.now = self.now.max(next.at);

        match next.event {
            Event::Frame { host, frame } => {
                self.dispatch(host, |engine, ctx| engine.packet_arrived(ctx, &frame));
            }
            Event::Timer {
                host,
                timer,
                payload,
            } => {
                if !self.cancelled.remove(&timer) {
                    self.pending.remove(&timer);
                    self.dispatch(host, |engine, ctx| engine.timer_expired(ctx, payload));
                }
            }
        }

        true
    }

    fn next_due(&self) -> Option<Duration> {
        self.queue.peek().map(|Reverse(s)| s.at)
    }

    fn schedule(&mut self, at: Duration, event: Event) {
        self.next_order += 1;
        self.queue.push(Reverse(Scheduled {
            at,
            order: self.next_order,
            event,
        }));
    }

    /// Runs one engine entry point on `id` and applies its effects.
    fn dispatch(&mut self, id: HostId, f: impl FnOnce(&mut TcpEngine, &mut HostCtx<'_>)) {
        let now = self.now;

        let Some(host) = self.hosts.get_mut(id) else {
            return;
        };

        let mut ctx = HostCtx {
            now,
            interfaces: &host.interfaces,
            completions: &mut host.completions,
            next_timer: &mut self.next_timer,
            outbox: Vec::new(),
            armed: Vec::new(),
            cancelled: Vec::new(),
        };

        f(&mut host.engine, &mut ctx);

        let HostCtx {
            outbox,
            armed,
            cancelled,
            ..
        } = ctx;

        for (timer, payload, delay) in armed {
            self.pending.insert(timer);
            self.schedule(
                now + delay,
                Event::Timer {
                    host: id,
                    timer,
                    payload,
                },
            );
        }

        // Cancelling a timer that already fired is a no-op.
        for timer in cancelled {
            if self.pending.remove(&timer) {
                self.cancelled.insert(timer);
            }
        }

        for frame in outbox {
            self.transmit(frame);
        }
    }

    /// Offers a frame to the link.
    fn transmit(&mut self, frame: Vec<u8>) {
        self.frames += 1;
        let n = self.frames;

        if self.link.hold {
            self.held.push(frame);
            return;
        }

        if self.link.drop_every.is_some_and(|k| n % k == 0) {
            debug!("link: dropping frame #{n}");
            return;
        }

        let Some(host) = self.destination(&frame) else {
            debug!("link: no host for frame #{n}");
            return;
        };

        let at = self.now + self.link.delay(n);

        if self.link.duplicate_every.is_some_and(|k| n % k == 0) {
            debug!("link: duplicating frame #{n}");
            let again = at + self.link.latency;
            self.schedule(again, Event::Frame {
                host,
                frame: frame.clone(),
            });
        }

        self.schedule(at, Event::Frame { host, frame });
    }

    /// Returns the host owning the frame's destination address.
    fn destination(&self, frame: &[u8]) -> Option<HostId> {
        let ip = Ipv4Header::try_from(frame.get(IP_START..TCP_START)?).ok()?;
        self.hosts
            .iter()
            .position(|h| h.interfaces.contains(&ip.dst()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Fd;
    use crate::protocol::fsm::ConnectionState;
    use crate::protocol::headers::TCP_START;
    use crate::protocol::{SockAddrIn, SocketAddr};

    const CLIENT: SocketAddr = SocketAddr::new([10, 0, 0, 1], 9000);
    const SERVER: SocketAddr = SocketAddr::new([10, 0, 0, 2], 80);
    const PID: Pid = 1;

    struct Pair {
        sim: Simulation,
        client: HostId,
        server: HostId,
    }

    fn pair(link: Link) -> Pair {
        let mut sim = Simulation::new(link);
        let client = sim.add_host(Config::default(), &[CLIENT.addr]).unwrap();
        let server = sim.add_host(Config::default(), &[SERVER.addr]).unwrap();

        Pair {
            sim,
            client,
            server,
        }
    }

    fn socket(sim: &mut Simulation, host: HostId) -> Fd {
        sim.call(host, PID, Syscall::Socket).unwrap().result
    }

    fn bind(sim: &mut Simulation, host: HostId, fd: Fd, addr: SocketAddr) -> i32 {
        let addr = SockAddrIn::from(addr);
        sim.call(host, PID, Syscall::Bind { fd, addr }).unwrap().result
    }

    /// Returns (listener fd, accepted fd, client fd).
    fn establish(p: &mut Pair, backlog: usize) -> (Fd, Fd, Fd) {
        let lfd = socket(&mut p.sim, p.server);
        assert_eq!(bind(&mut p.sim, p.server, lfd, SERVER), 0);

        let listen = p.sim.call(p.server, PID, Syscall::Listen { fd: lfd, backlog });
        assert_eq!(listen.unwrap().result, 0);

        let accept = p.sim.syscall(p.server, PID, Syscall::Accept { fd: lfd });

        let cfd = socket(&mut p.sim, p.client);
        assert_eq!(bind(&mut p.sim, p.client, cfd, CLIENT), 0);

        let connect = Syscall::Connect {
            fd: cfd,
            addr: SERVER.into(),
        };
        assert_eq!(p.sim.call(p.client, PID, connect).unwrap().result, 0);

        let accepted = p.sim.wait(p.server, accept).unwrap();
        assert_eq!(accepted.addr(), Some(CLIENT.into()));

        (lfd, accepted.result, cfd)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    /// Reads until `len` bytes have arrived.
    fn read_exact(sim: &mut Simulation, host: HostId, fd: Fd, len: usize) -> Vec<u8> {
        let mut out = Vec::new();

        while out.len() < len {
            let res = sim
                .call(host, PID, Syscall::Read { fd, len: 4096 })
                .unwrap();

            assert!(res.result > 0);
            out.extend_from_slice(res.bytes().unwrap());
        }

        out
    }

    #[test]
    fn hello_scenario() {
        let mut p = pair(Link::default());
        let (lfd, sfd, cfd) = establish(&mut p, 1);

        let write = Syscall::Write {
            fd: cfd,
            data: b"hello".to_vec(),
        };
        assert_eq!(p.sim.call(p.client, PID, write).unwrap().result, 5);

        let read = p.sim.call(p.server, PID, Syscall::Read { fd: sfd, len: 100 });
        assert_eq!(read.unwrap().bytes(), Some(&b"hello"[..]));

        let peer = p.sim.call(p.server, PID, Syscall::GetPeerName { fd: sfd });
        assert_eq!(peer.unwrap().addr(), Some(CLIENT.into()));

        let name = p.sim.call(p.server, PID, Syscall::GetSockName { fd: sfd });
        assert_eq!(name.unwrap().addr(), Some(SERVER.into()));

        for (host, fd) in [(p.client, cfd), (p.server, sfd), (p.server, lfd)] {
            assert_eq!(p.sim.call(host, PID, Syscall::Close { fd }).unwrap().result, 0);
        }

        assert!(p.sim.engine(p.client).table().is_empty());
        assert!(p.sim.engine(p.server).table().is_empty());
        assert_eq!(socket(&mut p.sim, p.client), cfd);
    }

    #[test]
    fn handshake_sequence_numbers_cross() {
        let mut p = pair(Link::default());
        let (_, sfd, cfd) = establish(&mut p, 1);

        let client = p.sim.engine(p.client).connection(PID, cfd).unwrap();
        let server = p.sim.engine(p.server).connection(PID, sfd).unwrap();

        assert_eq!(client.state, ConnectionState::ESTABLISHED);
        assert_eq!(server.state, ConnectionState::ESTABLISHED);
        assert_eq!(client.send_seq(), server.recv_ack());
        assert_eq!(server.send_seq(), client.recv_ack());
        assert_eq!(client.send_seq(), client.iss().wrapping_add(1));
    }

    #[test]
    fn bulk_transfer_survives_reordering_and_loss() {
        let mut p = pair(Link {
            latency: Duration::from_millis(5),
            jitter: Duration::from_millis(4),
            drop_every: Some(7),
            ..Default::default()
        });

        let (_, sfd, cfd) = establish(&mut p, 1);
        let data = pattern(20_000);

        let write = p.sim.syscall(
            p.client,
            PID,
            Syscall::Write {
                fd: cfd,
                data: data.clone(),
            },
        );

        assert_eq!(read_exact(&mut p.sim, p.server, sfd, data.len()), data);
        assert_eq!(p.sim.wait(p.client, write).unwrap().result, 20_000);

        let client = p.sim.engine(p.client).connection(PID, cfd).unwrap();
        assert!(client.send_window().is_empty());
    }

    #[test]
    fn duplicated_frames_deliver_once() {
        let mut p = pair(Link {
            duplicate_every: Some(1),
            ..Default::default()
        });

        let (_, sfd, cfd) = establish(&mut p, 1);
        let data = pattern(5000);

        let write = Syscall::Write {
            fd: cfd,
            data: data.clone(),
        };
        assert_eq!(p.sim.call(p.client, PID, write).unwrap().result, 5000);

        p.sim.run_for(Duration::from_millis(50));
        assert_eq!(read_exact(&mut p.sim, p.server, sfd, data.len()), data);

        let server = p.sim.engine(p.server).connection(PID, sfd).unwrap();
        assert_eq!(server.readable(), 0);
    }

    #[test]
    fn multiple_writes_complete_in_order() {
        let mut p = pair(Link::default());
        let (_, sfd, cfd) = establish(&mut p, 1);

        let first = p.sim.syscall(
            p.client,
            PID,
            Syscall::Write {
                fd: cfd,
                data: pattern(3000),
            },
        );
        let second = p.sim.syscall(
            p.client,
            PID,
            Syscall::Write {
                fd: cfd,
                data: b"tail".to_vec(),
            },
        );

        assert_eq!(p.sim.wait(p.client, second).unwrap().result, 4);
        assert_eq!(p.sim.completion(p.client, first).unwrap().result, 3000);

        let got = read_exact(&mut p.sim, p.server, sfd, 3004);
        assert_eq!(&got[3000..], b"tail");
    }

    #[test]
    fn full_backlog_refuses_second_client() {
        let mut p = pair(Link::default());
        let (lfd, _, _) = establish(&mut p, 1);

        // An unaccepted child fills the single slot.
        let queued = socket(&mut p.sim, p.client);
        let connect = Syscall::Connect {
            fd: queued,
            addr: SERVER.into(),
        };
        assert_eq!(p.sim.call(p.client, PID, connect).unwrap().result, 0);

        let refused = socket(&mut p.sim, p.client);
        let connect = Syscall::Connect {
            fd: refused,
            addr: SERVER.into(),
        };
        assert_eq!(p.sim.call(p.client, PID, connect).unwrap().result, -1);

        let conn = p.sim.engine(p.client).connection(PID, refused).unwrap();
        assert_eq!(conn.state, ConnectionState::CLOSED);

        let accepted = p.sim.call(p.server, PID, Syscall::Accept { fd: lfd }).unwrap();
        let queued = p.sim.engine(p.client).connection(PID, queued).unwrap();
        assert_eq!(accepted.addr(), Some(queued.local()));
    }

    #[test]
    fn simultaneous_open() {
        let mut p = pair(Link::default());
        let a = SocketAddr::new(CLIENT.addr, 5000);
        let b = SocketAddr::new(SERVER.addr, 6000);

        let fa = socket(&mut p.sim, p.client);
        let fb = socket(&mut p.sim, p.server);
        bind(&mut p.sim, p.client, fa, a);
        bind(&mut p.sim, p.server, fb, b);

        let ca = p.sim.syscall(p.client, PID, Syscall::Connect { fd: fa, addr: b.into() });
        let cb = p.sim.syscall(p.server, PID, Syscall::Connect { fd: fb, addr: a.into() });

        assert_eq!(p.sim.wait(p.client, ca).unwrap().result, 0);
        assert_eq!(p.sim.wait(p.server, cb).unwrap().result, 0);

        let ea = p.sim.engine(p.client).connection(PID, fa).unwrap();
        let eb = p.sim.engine(p.server).connection(PID, fb).unwrap();

        assert_eq!(ea.state, ConnectionState::ESTABLISHED);
        assert_eq!(eb.state, ConnectionState::ESTABLISHED);
        assert_eq!(ea.send_seq(), eb.recv_ack());
        assert_eq!(eb.send_seq(), ea.recv_ack());
    }

    #[test]
    fn corrupted_segment_dropped_without_ack() {
        let mut p = pair(Link::default());
        let (_, sfd, cfd) = establish(&mut p, 1);

        p.sim.set_link(Link {
            hold: true,
            ..Default::default()
        });

        let write = p.sim.syscall(
            p.client,
            PID,
            Syscall::Write {
                fd: cfd,
                data: b"hello".to_vec(),
            },
        );

        let mut frames = p.sim.held_frames();
        assert_eq!(frames.len(), 1);
        let original = frames.remove(0);

        let mut corrupted = original.clone();
        corrupted[TCP_START + 20] ^= 0x20;

        p.sim.inject(corrupted);
        p.sim.run_for(Duration::from_millis(10));

        // No ACK left the server, and nothing was buffered.
        assert!(p.sim.held_frames().is_empty());
        let server = p.sim.engine(p.server).connection(PID, sfd).unwrap();
        assert_eq!(server.recv_buffer().unwrap().contig_end(), 0);

        p.sim.inject(original);
        p.sim.run_for(Duration::from_millis(10));

        let acks = p.sim.held_frames();
        assert_eq!(acks.len(), 1);

        p.sim.set_link(Link::default());
        for ack in acks {
            p.sim.inject(ack);
        }

        assert_eq!(p.sim.wait(p.client, write).unwrap().result, 5);
    }

    #[test]
    fn lost_final_ack_recovered() {
        let mut p = pair(Link::default());

        let lfd = socket(&mut p.sim, p.server);
        bind(&mut p.sim, p.server, lfd, SERVER);
        p.sim.call(p.server, PID, Syscall::Listen { fd: lfd, backlog: 1 });

        // SYN out, SYN_ACK back, then hold the client's final ACK.
        let cfd = socket(&mut p.sim, p.client);
        let connect = p.sim.syscall(
            p.client,
            PID,
            Syscall::Connect {
                fd: cfd,
                addr: SERVER.into(),
            },
        );

        p.sim.run_for(Duration::from_millis(1));
        p.sim.set_link(Link {
            hold: true,
            ..Default::default()
        });
        p.sim.run_for(Duration::from_millis(1));

        assert_eq!(p.sim.completion(p.client, connect).unwrap().result, 0);
        assert_eq!(p.sim.held_frames().len(), 1);

        // The server's SYN_ACK retry draws a fresh ACK.
        p.sim.set_link(Link::default());
        let accepted = p.sim.call(p.server, PID, Syscall::Accept { fd: lfd }).unwrap();
        assert!(accepted.is_ok());

        let server = p.sim.engine(p.server).connection(PID, accepted.result).unwrap();
        assert_eq!(server.state, ConnectionState::ESTABLISHED);
    }

    #[test]
    fn repeated_timeouts_leave_no_stale_cancellations() {
        let mut p = pair(Link::default());
        let (_, _, cfd) = establish(&mut p, 1);

        p.sim.set_link(Link {
            hold: true,
            ..Default::default()
        });

        let write = p.sim.syscall(
            p.client,
            PID,
            Syscall::Write {
                fd: cfd,
                data: pattern(100),
            },
        );
        p.sim.run_for(Duration::from_secs(2));

        // The first send plus several timeouts, all swallowed by the link.
        assert!(p.sim.held_frames().len() > 2);
        assert!(p.sim.completion(p.client, write).is_none());

        assert!(p.sim.cancelled.is_empty());
        assert_eq!(p.sim.pending.len(), 1);
    }
}
