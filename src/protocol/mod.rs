//! Networking primitives for [TCP] over [IPv4].
//!
//! This module implements the per-connection half of the engine: header
//! definitions, frame parsing/serialization, TCP segment construction,
//! receive reassembly, retransmission bookkeeping, the accept backlog and the
//! protocol state machine.
//!
//! [TCP]:  https://www.rfc-editor.org/rfc/rfc793
//! [IPv4]: https://www.rfc-editor.org/rfc/rfc791

pub mod backlog;
pub mod fsm;
pub mod headers;
pub mod reassembly;
pub mod retransmit;
pub mod seq;

pub mod socket;
pub use socket::{INADDR_ANY, SockAddrIn, Socket, SocketAddr};

pub mod segment;
pub use segment::TcpSegment;
