//! Out-of-process reconfiguration of a running aggregator.
//!
//! The `fetch` process binds a loopback listener; `set-interval` and
//! `set-workers` invocations connect, send one command line, read one reply
//! line and disconnect.

mod client;
mod protocol;
mod server;

pub use client::ControlClient;
pub use protocol::{Command, Reply, MAX_LINE_LENGTH};
pub use server::ControlServer;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Address the control listener binds when none is configured
pub const DEFAULT_CONTROL_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7878));
