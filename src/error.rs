//! Crate-wide error type.
//!
//! Follows the same convention as `wire::Error` in the smoltcp lineage this
//! crate is forked from: a plain enum with a hand-written `Display` and
//! `std::error::Error` impl, no derive macro.

use std::fmt;
use std::io;

/// Everything that can go wrong while scanning.
#[derive(Debug)]
pub enum Error {
    /// Opening the raw send socket failed.
    SocketOpen(io::Error),
    /// Opening the receive capture/filter failed.
    FilterOpen(pcap::Error),
    /// A `sendto` on the raw socket failed; the scan is aborted.
    Send(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SocketOpen(err) => write!(f, "failed to open raw socket: {err}"),
            Error::FilterOpen(err) => write!(f, "failed to open capture filter: {err}"),
            Error::Send(err) => write!(f, "send failed: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SocketOpen(err) => Some(err),
            Error::FilterOpen(err) => Some(err),
            Error::Send(err) => Some(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Send(err)
    }
}
