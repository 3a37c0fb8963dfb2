//! The capability bundle the scan engine is invoked with.
//!
//! The system this crate models calls into its embedding host through a
//! loosely-typed variadic argument list (a capability environment threaded
//! through every call). The actual requirement is a small, fixed set of
//! callbacks, so it's expressed here as a plain trait instead.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Everything the scan engine needs from its embedding host but does not
/// implement itself: port-range parsing, route lookup, liveness
/// short-circuiting, and reporting.
pub trait ScanHost {
    /// The human port-range specification to scan (e.g. `"1-1000,8080"`).
    fn port_range_preference(&self) -> String;

    /// Expand a port-range string into a sorted list of port numbers.
    fn port_list_from_range(&self, range: &str) -> Vec<u16>;

    /// Look up the outbound interface and source address for an IPv4
    /// destination.
    fn route_v4(&self, dst: Ipv4Addr) -> Option<(String, Ipv4Addr)>;

    /// Look up the outbound interface and source address for an IPv6
    /// destination.
    fn route_v6(&self, dst: Ipv6Addr) -> Option<(String, Ipv6Addr)>;

    /// True if `dst` is unreachable, loopback, or otherwise local enough
    /// that scanning it should be skipped entirely.
    fn host_is_local(&self, dst: IpAddr) -> bool;

    /// Called exactly once per open port, immediately after the RST that
    /// closes it back down.
    fn report_open_port(&mut self, port: u16, proto: &str);

    /// Called every 100 ports with the current index and total count.
    fn progress(&mut self, hostname: &str, phase: &str, current: usize, total: usize);

    /// Record a scalar fact about the host (`Host/scanned`,
    /// `Host/scanners/synscan`, `Host/full_scan`, ...).
    fn set_host_flag(&mut self, key: &str, value: i32);
}
