//! TCP transport engine in user-space, built for learning purposes, running
//! over a simulated IPv4 link.
//!
//! The engine is driven entirely from the outside through three entry points:
//! a process issuing a socket syscall, a frame arriving on an interface, and a
//! timer expiring. Everything it needs from its environment (sending frames,
//! interface addresses, routing, timers, syscall completion, the clock) comes
//! through the [net::Host] trait, so the same engine runs under the
//! deterministic [sim::Simulation] or any other host.
//!
//! Not suitable for production use.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

#[cfg(not(unix))]
compile_error!("This crate is only compatible with Unix systems providing a libc.");

pub mod config;
pub mod error;
pub mod log;
pub mod net;
pub mod protocol;
pub mod sim;

pub use config::Config;
pub use error::{ConfigError, Error, HeaderError, ParseError, Result, SocketError};
