//! A stealth TCP SYN port scanner: raw half-open probes over IPv4 and IPv6,
//! with no correlation state on the receive side beyond a timestamp smuggled
//! into each SYN's sequence number.
//!
//! [`engine::scan`] is the entry point. It takes a [`host::ScanHost`] — the
//! capabilities (routing, port-range expansion, reporting) an embedding
//! caller supplies — and drives raw sockets plus a `pcap` capture through
//! [`transport::Transport`].

pub mod discovery;
pub mod engine;
pub mod error;
pub mod host;
pub mod inflight;
pub mod rtt;
pub mod transport;
pub mod wire;

pub use engine::{scan, ScanConfig, ScanOutcome};
pub use error::{Error, Result};
pub use host::ScanHost;
