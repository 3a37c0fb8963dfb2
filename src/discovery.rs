//! Bootstraps an initial RTT estimate by probing a handful of commonly-open
//! ports before the real scan starts. IPv4 only, matching the system this
//! models (the analogous IPv6 bootstrap was never wired up upstream).

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::rtt;
use crate::transport::RawTransport;
use crate::wire::{self, ipv4};

/// Fixed beacon list, tried in order until three reply.
pub const BEACON_PORTS: [u16; 20] = [
    21, 22, 34, 25, 53, 79, 80, 110, 113, 135, 139, 143, 264, 389, 443, 993, 1454, 1723, 3389,
    8080,
];

const ROUNDS: u32 = 10;
const MAX_ERRORS: u32 = 10;

/// Probe up to three beacon ports, then measure ten round trips among the
/// ones that answered. Falls back to [`rtt::SATURATION`] if nothing
/// replies, or if the round-trip measurement loop accumulates too many
/// consecutive misses.
pub fn find_rtt(transport: &mut dyn RawTransport, src: Ipv4Addr, dst: Ipv4Addr, magic_port: u16) -> u32 {
    let beacons = discover_beacons(transport, src, dst, magic_port);
    if beacons.is_empty() {
        log::debug!("rtt discovery: no beacon ports replied, using saturation RTT");
        return rtt::SATURATION;
    }

    let mut max: u32 = 0;
    let mut max_max: u32 = 0;
    let mut errors: u32 = 0;
    let mut round: u32 = 0;
    let mut n: usize = 0;

    while round < ROUNDS {
        let port = beacons[n % beacons.len()];
        n += 1;

        let seq = rtt::encode_now();
        let seg = ipv4::build_segment(src, dst, magic_port, port, seq, wire::TCP_SYN);
        if transport.send_v4(dst, &seg).is_err() {
            log::warn!("rtt discovery: send failed for beacon port {port}");
        }

        match transport.next_frame(Duration::from_secs(1)) {
            Some(frame) => {
                if let Some(parsed) = ipv4::parse(transport.datalink_skip(), &frame) {
                    let then = parsed.ack.wrapping_sub(1);
                    let sample = rtt::sample(then, rtt::encode_now());
                    accept_sample(sample, &mut max, &mut max_max);
                }
                round += 1;
            }
            None => {
                errors += 1;
                if errors > MAX_ERRORS {
                    log::debug!("rtt discovery: too many misses, using saturation RTT");
                    return rtt::SATURATION;
                }
            }
        }
    }

    if max == 0 {
        rtt::SATURATION
    } else {
        max
    }
}

/// Outlier-guarded running-maxima update: a new sample greater than
/// `max_max` becomes the new `max_max`, demoting the previous `max_max` to
/// `max` only if `max` hasn't been set yet or the new sample isn't more
/// than double it.
fn accept_sample(sample: u32, max: &mut u32, max_max: &mut u32) {
    if sample != 0 && sample > *max_max && (*max == 0 || sample < *max * 2) {
        *max = *max_max;
        *max_max = sample;
    }
}

fn discover_beacons(
    transport: &mut dyn RawTransport,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    magic_port: u16,
) -> Vec<u16> {
    let mut beacons = Vec::with_capacity(3);
    for &port in BEACON_PORTS.iter() {
        let seq = rtt::encode_now();
        let seg = ipv4::build_segment(src, dst, magic_port, port, seq, wire::TCP_SYN);
        if transport.send_v4(dst, &seg).is_err() {
            log::warn!("rtt discovery: send failed probing beacon port {port}");
            continue;
        }
        if transport.next_frame(Duration::from_secs(1)).is_some() {
            beacons.push(port);
            if beacons.len() >= 3 {
                break;
            }
        }
    }
    beacons
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_sample_installs_first_nonzero_sample_as_max_max() {
        let mut max = 0;
        let mut max_max = 0;
        accept_sample(500, &mut max, &mut max_max);
        assert_eq!(max_max, 500);
        assert_eq!(max, 0);
    }

    #[test]
    fn accept_sample_demotes_previous_max_max_when_within_outlier_guard() {
        let mut max = 0;
        let mut max_max = 0;
        accept_sample(500, &mut max, &mut max_max);
        accept_sample(800, &mut max, &mut max_max); // 800 < 500*2, demotes
        assert_eq!(max, 500);
        assert_eq!(max_max, 800);
    }

    #[test]
    fn accept_sample_rejects_outlier_beyond_guard() {
        let mut max = 0;
        let mut max_max = 0;
        accept_sample(500, &mut max, &mut max_max);
        accept_sample(2000, &mut max, &mut max_max); // 2000 >= 500*2
        assert_eq!(max, 0);
        assert_eq!(max_max, 500);
    }

    #[test]
    fn accept_sample_ignores_zero_samples() {
        let mut max = 0;
        let mut max_max = 0;
        accept_sample(0, &mut max, &mut max_max);
        assert_eq!((max, max_max), (0, 0));
    }
}
