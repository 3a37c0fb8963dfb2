//! IPv4 SYN/RST segment construction and parsing.
//!
//! The raw socket this crate sends on is opened with `IP_HDRINCL`, so every
//! byte of the IP header is ours to fill in — there is no separate `Repr`
//! type here the way `Ipv4Packet`/`Ipv4Repr` split that concern elsewhere; a
//! scan probe has exactly one shape, so the builder writes it directly.

use std::net::Ipv4Addr;

use byteorder::{ByteOrder, NetworkEndian};
use rand::Rng;

use super::{checksum, ParsedSegment};

pub const IP_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
pub const SEGMENT_LEN: usize = IP_HEADER_LEN + TCP_HEADER_LEN;

const PROTO_TCP: u8 = 6;

/// Build a 40-byte IP+TCP segment with the given `flags` (SYN or RST).
pub fn build_segment(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    flags: u8,
) -> [u8; SEGMENT_LEN] {
    let mut buf = [0u8; SEGMENT_LEN];

    buf[0] = (4 << 4) | 5; // version 4, IHL 5 words
    buf[1] = 0; // TOS
    NetworkEndian::write_u16(&mut buf[2..4], SEGMENT_LEN as u16);
    NetworkEndian::write_u16(&mut buf[4..6], rand::thread_rng().gen());
    NetworkEndian::write_u16(&mut buf[6..8], 0); // flags/fragment offset
    buf[8] = 64; // TTL
    buf[9] = PROTO_TCP;
    // buf[10..12] checksum, filled below
    buf[12..16].copy_from_slice(&src.octets());
    buf[16..20].copy_from_slice(&dst.octets());

    let ip_sum = checksum::ones_complement(&buf[..IP_HEADER_LEN]);
    NetworkEndian::write_u16(&mut buf[10..12], ip_sum);

    let tcp = &mut buf[IP_HEADER_LEN..];
    NetworkEndian::write_u16(&mut tcp[0..2], src_port);
    NetworkEndian::write_u16(&mut tcp[2..4], dst_port);
    NetworkEndian::write_u32(&mut tcp[4..8], seq);
    NetworkEndian::write_u32(&mut tcp[8..12], 0); // ack
    tcp[12] = 5 << 4; // data offset, 5 words
    tcp[13] = flags;
    NetworkEndian::write_u16(&mut tcp[14..16], 4096); // window
    // tcp[16..18] checksum, filled below
    NetworkEndian::write_u16(&mut tcp[18..20], 0); // urgent pointer

    let pseudo_sum = checksum::pseudo_header_v4(src, dst, TCP_HEADER_LEN as u16);
    let tcp_data_sum = checksum::data(&buf[IP_HEADER_LEN..]);
    let tcp_sum = !checksum::combine(&[pseudo_sum, tcp_data_sum]);
    NetworkEndian::write_u16(&mut buf[IP_HEADER_LEN + 16..IP_HEADER_LEN + 18], tcp_sum);

    buf
}

/// Parse a captured IPv4 frame, skipping `datalink_skip` link-layer bytes.
/// Returns `None` if the TCP header would extend past the captured bytes.
pub fn parse(datalink_skip: usize, frame: &[u8]) -> Option<ParsedSegment> {
    let ip = frame.get(datalink_skip..)?;
    if ip.len() < IP_HEADER_LEN {
        return None;
    }
    let ihl = (ip[0] & 0x0F) as usize * 4;
    let tcp = ip.get(ihl..)?;
    if tcp.len() < TCP_HEADER_LEN {
        return None;
    }

    Some(ParsedSegment {
        source_port: NetworkEndian::read_u16(&tcp[0..2]),
        ack: NetworkEndian::read_u32(&tcp[8..12]),
        flags: tcp[13],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_header_checksum_verifies() {
        let seg = build_segment(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            4500,
            80,
            0x1234_5678,
            super::super::TCP_SYN,
        );
        assert_eq!(checksum::data(&seg[..IP_HEADER_LEN]), 0xffff);
    }

    #[test]
    fn total_length_is_forty() {
        let seg = build_segment(
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(127, 0, 0, 2),
            1,
            2,
            0,
            super::super::TCP_SYN,
        );
        assert_eq!(seg.len(), SEGMENT_LEN);
        assert_eq!(NetworkEndian::read_u16(&seg[2..4]), SEGMENT_LEN as u16);
    }

    #[test]
    fn parse_round_trips_port_and_flags() {
        let seg = build_segment(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            4500,
            443,
            0xdead_beef,
            super::super::TCP_SYN | super::super::TCP_ACK,
        );
        let parsed = parse(0, &seg).expect("well-formed segment parses");
        assert_eq!(parsed.source_port, 4500);
        assert!(parsed.is_syn_ack());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let seg = build_segment(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            1,
            2,
            0,
            super::super::TCP_SYN,
        );
        assert!(parse(0, &seg[..IP_HEADER_LEN + 4]).is_none());
    }

    #[test]
    fn datalink_prefix_is_skipped() {
        let seg = build_segment(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            4500,
            80,
            0,
            super::super::TCP_SYN,
        );
        let mut framed = vec![0u8; 14];
        framed.extend_from_slice(&seg);
        let parsed = parse(14, &framed).expect("parses past ethernet header");
        assert_eq!(parsed.source_port, 4500);
    }
}
