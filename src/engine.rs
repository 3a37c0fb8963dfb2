//! The scan driver: iterates the port list two at a time, alternating a
//! silent transmit with a transmit-then-drain, then retires whatever is
//! still in flight once the list is exhausted.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use rand::Rng;

use crate::discovery;
use crate::host::ScanHost;
use crate::inflight::InFlightTable;
use crate::rtt::{self, Estimator};
use crate::transport::{RawTransport, Transport};
use crate::wire::{self, ipv4, ipv6};

/// Lower/upper bound of the random magic source port used by every probe
/// of one scan run.
const MAGIC_PORT_RANGE: std::ops::RangeInclusive<u16> = 4441..=5640;

const PROGRESS_EVERY: usize = 100;
const FULL_SCAN_THRESHOLD: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The destination was local/unreachable; nothing was sent.
    Skipped,
    /// The port list was exhausted and all in-flight probes retired.
    Completed,
}

/// Immutable parameters for one scan invocation, plus whether to run the
/// RTT discovery bootstrap first (see `SPEC_FULL.md` §4 — this crate keeps
/// `find_rtt` reachable instead of leaving it permanently dead code).
pub struct ScanConfig {
    pub discover_rtt: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig { discover_rtt: false }
    }
}

/// Run a SYN scan of `dst` against the port list the host's `port_range`
/// preference expands to. Mirrors the original entry point's signature:
/// `dst` may be a genuine IPv6 address or an IPv4-mapped one, and the
/// family switch happens once, here.
pub fn scan(host: &mut dyn ScanHost, hostname: &str, dst: IpAddr, config: &ScanConfig) -> crate::error::Result<ScanOutcome> {
    if host.host_is_local(dst) {
        log::debug!("skipping {hostname}: local or unreachable");
        return Ok(ScanOutcome::Skipped);
    }

    let magic = magic_port();
    match dst {
        IpAddr::V4(dst_v4) => {
            let (iface, src) = host
                .route_v4(dst_v4)
                .ok_or_else(|| crate::error::Error::SocketOpen(std::io::Error::other("no route to host")))?;
            let filter = crate::transport::filter_expr(&dst_v4.to_string(), magic);
            let mut transport = Transport::open_v4(&iface, &filter)?;
            scan_with(host, hostname, dst, &mut transport, magic, Some(src), config)
        }
        IpAddr::V6(dst_v6) => {
            let (iface, _src) = host
                .route_v6(dst_v6)
                .ok_or_else(|| crate::error::Error::SocketOpen(std::io::Error::other("no route to host")))?;
            let filter = crate::transport::filter_expr(&dst_v6.to_string(), magic);
            let mut transport = Transport::open_v6(&iface, &filter)?;
            scan_with(host, hostname, dst, &mut transport, magic, None, config)
        }
    }
}

/// Drives one scan against an already-open transport, port-range expansion,
/// family dispatch, and the post-scan host-flag bookkeeping included. Split
/// out from [`scan`] so tests can inject a fake transport and exercise the
/// full-scan-flag logic end to end instead of only its constituent pieces.
fn scan_with(
    host: &mut dyn ScanHost,
    hostname: &str,
    dst: IpAddr,
    transport: &mut dyn RawTransport,
    magic: u16,
    src_v4: Option<Ipv4Addr>,
    config: &ScanConfig,
) -> crate::error::Result<ScanOutcome> {
    let range = host.port_range_preference();
    let ports = host.port_list_from_range(&range);

    let outcome = match dst {
        IpAddr::V4(dst_v4) => {
            let src = src_v4.expect("v4 destination requires a source address");
            scan_v4(host, hostname, transport, src, dst_v4, magic, &ports, config)?
        }
        IpAddr::V6(dst_v6) => scan_v6(host, hostname, transport, dst_v6, magic, &ports)?,
    };

    host.set_host_flag("Host/scanned", 1);
    host.set_host_flag("Host/scanners/synscan", 1);
    if ports.len() >= FULL_SCAN_THRESHOLD {
        log::debug!("{hostname}: port list reached full-scan threshold ({} ports)", ports.len());
        host.set_host_flag("Host/full_scan", 1);
    }

    Ok(outcome)
}

fn magic_port() -> u16 {
    rand::thread_rng().gen_range(MAGIC_PORT_RANGE)
}

fn scan_v4(
    host: &mut dyn ScanHost,
    hostname: &str,
    transport: &mut dyn RawTransport,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    magic: u16,
    ports: &[u16],
    config: &ScanConfig,
) -> crate::error::Result<ScanOutcome> {
    let mut rtt = if config.discover_rtt {
        Estimator::seeded(discovery::find_rtt(transport, src, dst, magic))
    } else {
        Estimator::new()
    };

    let mut inflight = InFlightTable::new();
    run_port_pairs_v4(host, hostname, transport, src, dst, magic, ports, &mut inflight, &mut rtt)?;
    drain_tail_v4(transport, src, dst, magic, &mut inflight, &mut rtt, host)?;

    host.progress(hostname, "portscan", ports.len(), ports.len());
    Ok(ScanOutcome::Completed)
}

fn scan_v6(
    host: &mut dyn ScanHost,
    hostname: &str,
    transport: &mut dyn RawTransport,
    dst: Ipv6Addr,
    magic: u16,
    ports: &[u16],
) -> crate::error::Result<ScanOutcome> {
    let mut inflight = InFlightTable::new();
    // IPv6 has no tail retry loop in the system this models: a SYN|ACK that
    // arrives after the last per-pair sniff window is simply missed. See
    // `SPEC_FULL.md` §9.
    run_port_pairs_v6(host, hostname, transport, dst, magic, ports, &mut inflight)?;

    host.progress(hostname, "portscan", ports.len(), ports.len());
    Ok(ScanOutcome::Completed)
}

#[allow(clippy::too_many_arguments)]
fn run_port_pairs_v4(
    host: &mut dyn ScanHost,
    hostname: &str,
    transport: &mut dyn RawTransport,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    magic: u16,
    ports: &[u16],
    inflight: &mut InFlightTable,
    rtt: &mut Estimator,
) -> crate::error::Result<()> {
    let mut i = 0;
    while i < ports.len() {
        if i % PROGRESS_EVERY == 0 {
            host.progress(hostname, "portscan", i, ports.len());
        }

        send_syn_v4(transport, src, dst, magic, ports[i], inflight)?;

        // An odd-length port list leaves its final port with no sniffing
        // window of its own here; it can only be observed during the tail
        // retry loop. Preserved from the system this models.
        if i + 1 < ports.len() {
            send_syn_v4(transport, src, dst, magic, ports[i + 1], inflight)?;
            drain_replies_v4(host, transport, src, dst, magic, inflight, rtt)?;
        }

        i += 2;
    }
    Ok(())
}

fn run_port_pairs_v6(
    host: &mut dyn ScanHost,
    hostname: &str,
    transport: &mut dyn RawTransport,
    dst: Ipv6Addr,
    magic: u16,
    ports: &[u16],
    inflight: &mut InFlightTable,
) -> crate::error::Result<()> {
    let mut i = 0;
    while i < ports.len() {
        if i % PROGRESS_EVERY == 0 {
            host.progress(hostname, "portscan", i, ports.len());
        }

        send_syn_v6(transport, dst, magic, ports[i], inflight)?;

        if i + 1 < ports.len() {
            send_syn_v6(transport, dst, magic, ports[i + 1], inflight)?;
            drain_replies_v6(host, transport, dst, magic)?;
        }

        i += 2;
    }
    Ok(())
}

fn send_syn_v4(
    transport: &mut dyn RawTransport,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    magic: u16,
    port: u16,
    inflight: &mut InFlightTable,
) -> crate::error::Result<()> {
    if port == 0 {
        return Ok(());
    }
    let seq = rtt::encode_now();
    let seg = ipv4::build_segment(src, dst, magic, port, seq, wire::TCP_SYN);
    inflight.add(port, seq);
    transport.send_v4(dst, &seg)
}

fn send_syn_v6(
    transport: &mut dyn RawTransport,
    dst: Ipv6Addr,
    magic: u16,
    port: u16,
    inflight: &mut InFlightTable,
) -> crate::error::Result<()> {
    if port == 0 {
        return Ok(());
    }
    let seq = rtt::encode_now();
    let seg = ipv6::build_segment(magic, port, seq, wire::TCP_SYN);
    inflight.add(port, seq);
    transport.send_v6(dst, &seg)
}

/// Drain frames until the capture deadline (derived from the current RTT
/// estimate) elapses with nothing more arriving.
fn drain_replies_v4(
    host: &mut dyn ScanHost,
    transport: &mut dyn RawTransport,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    magic: u16,
    inflight: &mut InFlightTable,
    rtt: &mut Estimator,
) -> crate::error::Result<()> {
    loop {
        let (secs, micros) = rtt.deadline();
        let deadline = Duration::new(secs, micros * 1000);
        let frame = match transport.next_frame(deadline) {
            Some(frame) => frame,
            None => return Ok(()),
        };
        let Some(parsed) = ipv4::parse(transport.datalink_skip(), &frame) else {
            continue;
        };

        inflight.remove(parsed.source_port);

        if parsed.is_syn_ack() {
            log::debug!("port {} open", parsed.source_port);
            host.report_open_port(parsed.source_port, "tcp");
            // The captured ACK already is the original SYN's sequence + 1.
            let seq = parsed.ack;
            let rst = ipv4::build_segment(src, dst, magic, parsed.source_port, seq, wire::TCP_RST);
            transport.send_v4(dst, &rst)?;
            rtt.update(parsed.ack.wrapping_sub(1));
            log::trace!("rtt estimate now {}", rtt.get());
        }
    }
}

fn drain_replies_v6(
    host: &mut dyn ScanHost,
    transport: &mut dyn RawTransport,
    dst: Ipv6Addr,
    magic: u16,
) -> crate::error::Result<()> {
    // The original's IPv6 drain is a single take, not a loop-to-timeout:
    // one `next_frame` call per sniffing pair. Preserved as-is (see
    // `SPEC_FULL.md` §9 — no IPv6 tail retry loop either).
    let frame = match transport.next_frame(Duration::from_secs(1)) {
        Some(frame) => frame,
        None => return Ok(()),
    };
    let Some(parsed) = ipv6::parse(transport.datalink_skip(), &frame) else {
        return Ok(());
    };

    if parsed.is_syn_ack() {
        host.report_open_port(parsed.source_port, "tcp");
        // The captured ACK already is the original SYN's sequence + 1.
        let seq = parsed.ack;
        let rst = ipv6::build_segment(magic, parsed.source_port, seq, wire::TCP_RST);
        transport.send_v6(dst, &rst)?;
    }
    Ok(())
}

fn drain_tail_v4(
    transport: &mut dyn RawTransport,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    magic: u16,
    inflight: &mut InFlightTable,
    rtt: &mut Estimator,
    host: &mut dyn ScanHost,
) -> crate::error::Result<()> {
    while !inflight.is_empty() {
        let retry = inflight.sweep();
        if let Some(port) = retry {
            log::trace!("retransmitting probe for port {port}");
            send_syn_v4(transport, src, dst, magic, port, inflight)?;
        }
        drain_replies_v4(host, transport, src, dst, magic, inflight, rtt)?;
    }
    Ok(())
}
