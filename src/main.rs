use std::process;
use std::time::Duration;

use simtcp::net::{Fd, Syscall};
use simtcp::protocol::{SockAddrIn, SocketAddr};
use simtcp::sim::{HostId, Link, Simulation};
use simtcp::{Config, error, info, warn};

const CLIENT: SocketAddr = SocketAddr::new([10, 0, 0, 1], 9000);
const SERVER: SocketAddr = SocketAddr::new([10, 0, 0, 2], 80);
const PID: u32 = 1;

fn main() {
    if let Err(err) = simtcp::log::init_from_env() {
        eprintln!("ignoring SIMTCP_LOG: {err}");
    }

    let mut sim = Simulation::new(Link {
        latency: Duration::from_millis(2),
        jitter: Duration::from_millis(1),
        ..Default::default()
    });

    let (client, server) = match (
        sim.add_host(Config::default(), &[CLIENT.addr]),
        sim.add_host(Config::default(), &[SERVER.addr]),
    ) {
        (Ok(c), Ok(s)) => (c, s),
        (Err(err), _) | (_, Err(err)) => {
            error!("failed to create hosts: {err}");
            process::exit(1);
        }
    };

    let listener = call(&mut sim, server, Syscall::Socket);
    call(&mut sim, server, bind(listener, SERVER));
    call(&mut sim, server, Syscall::Listen { fd: listener, backlog: 1 });
    let accept = sim.syscall(server, PID, Syscall::Accept { fd: listener });

    let sock = call(&mut sim, client, Syscall::Socket);
    call(&mut sim, client, bind(sock, CLIENT));
    call(
        &mut sim,
        client,
        Syscall::Connect {
            fd: sock,
            addr: SERVER.into(),
        },
    );

    let Some(accepted) = sim.wait(server, accept).filter(|c| c.is_ok()) else {
        error!("accept did not complete");
        process::exit(1);
    };

    let peer = accepted.addr().map(|a| a.socket_addr());
    info!("accepted fd {} from {peer:?}", accepted.result);

    call(
        &mut sim,
        client,
        Syscall::Write {
            fd: sock,
            data: b"hello".to_vec(),
        },
    );

    let read = sim.call(
        server,
        PID,
        Syscall::Read {
            fd: accepted.result,
            len: 100,
        },
    );

    match read.as_ref().and_then(|c| c.bytes()) {
        Some(bytes) => info!("server read {:?}", String::from_utf8_lossy(bytes)),
        None => warn!("server read nothing"),
    }

    call(&mut sim, client, Syscall::Close { fd: sock });
    call(&mut sim, server, Syscall::Close { fd: accepted.result });
    call(&mut sim, server, Syscall::Close { fd: listener });

    info!("done at {:?} of virtual time", sim.now());
}

fn bind(fd: Fd, addr: SocketAddr) -> Syscall {
    Syscall::Bind {
        fd,
        addr: SockAddrIn::from(addr),
    }
}

/// Runs a syscall to completion, exiting on failure.
fn call(sim: &mut Simulation, host: HostId, call: Syscall) -> i32 {
    let name = call.name();

    match sim.call(host, PID, call) {
        Some(completion) if completion.is_ok() => completion.result,
        _ => {
            error!("{name} failed on host {host}");
            process::exit(1);
        }
    }
}
