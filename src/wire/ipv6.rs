//! IPv6 SYN/RST TCP-header-only construction and parsing.
//!
//! The IPv6 raw socket is opened with the `IPV6_CHECKSUM` offset option
//! (see [`crate::transport`]), so the kernel computes the real TCP checksum
//! over the pseudo-header it already knows; the checksum field written here
//! is a placeholder, matching the convention the original scanner relies on.

use byteorder::{ByteOrder, NetworkEndian};
use rand::Rng;

use super::ParsedSegment;

pub const TCP_HEADER_LEN: usize = 20;
/// Fixed IPv6 header size this scanner assumes — no extension headers.
pub const IPV6_HEADER_LEN: usize = 40;
/// Placeholder checksum value left in the outgoing header; the kernel
/// overwrites it using the `IPV6_CHECKSUM` socket option.
const CHECKSUM_PLACEHOLDER: u16 = 2;

/// Build a 20-byte TCP header (no IP header — the kernel supplies it).
pub fn build_segment(src_port: u16, dst_port: u16, seq: u32, flags: u8) -> [u8; TCP_HEADER_LEN] {
    let mut tcp = [0u8; TCP_HEADER_LEN];

    NetworkEndian::write_u16(&mut tcp[0..2], src_port);
    NetworkEndian::write_u16(&mut tcp[2..4], dst_port);
    NetworkEndian::write_u32(&mut tcp[4..8], seq);
    NetworkEndian::write_u32(&mut tcp[8..12], rand::thread_rng().gen());
    tcp[12] = 5 << 4;
    tcp[13] = flags;
    NetworkEndian::write_u16(&mut tcp[14..16], 5760); // window
    NetworkEndian::write_u16(&mut tcp[16..18], CHECKSUM_PLACEHOLDER);
    NetworkEndian::write_u16(&mut tcp[18..20], 0); // urgent pointer

    tcp
}

/// Parse a captured IPv6 frame. Extension headers are not handled: the TCP
/// header is assumed to sit immediately after the fixed 40-byte IPv6
/// header.
pub fn parse(datalink_skip: usize, frame: &[u8]) -> Option<ParsedSegment> {
    let tcp = frame.get(datalink_skip + IPV6_HEADER_LEN..)?;
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
    fn checksum_field_is_placeholder() {
        let seg = build_segment(4500, 443, 0, super::super::TCP_SYN);
        assert_eq!(NetworkEndian::read_u16(&seg[16..18]), CHECKSUM_PLACEHOLDER);
    }

    #[test]
    fn segment_is_twenty_bytes() {
        let seg = build_segment(4500, 443, 0, super::super::TCP_SYN);
        assert_eq!(seg.len(), TCP_HEADER_LEN);
    }

    #[test]
    fn parse_at_fixed_offset() {
        let seg = build_segment(4500, 443, 0xabcd, super::super::TCP_SYN | super::super::TCP_ACK);
        let mut framed = vec![0u8; IPV6_HEADER_LEN];
        framed.extend_from_slice(&seg);
        let parsed = parse(0, &framed).expect("parses fixed-offset TCP header");
        assert_eq!(parsed.source_port, 4500);
        assert!(parsed.is_syn_ack());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let framed = vec![0u8; IPV6_HEADER_LEN + 4];
        assert!(parse(0, &framed).is_none());
    }
}
