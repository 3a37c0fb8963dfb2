//! Owns the one raw send socket and the one capture handle for a scan run.
//!
//! Grounded the same way `phy::sys::TunTapInterfaceDesc` owns a tun/tap file
//! descriptor: a thin struct over a raw fd, opened with a handful of `libc`
//! calls, closed in `Drop`. The capture side plays the role of the
//! "packet-filter library that returns next-captured-frame-with-timeout"
//! this scanner treats as an external collaborator — here that's the
//! `pcap` crate, used directly rather than reimplemented.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use pcap::{Capture, Active};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFamily {
    V4,
    V6,
}

/// Bytes of link-layer framing to skip before the network-layer header in
/// every captured frame. Determined once, from the capture's datalink type.
fn datalink_skip(linktype: pcap::Linktype) -> usize {
    match linktype {
        pcap::Linktype::ETHERNET => 14,
        pcap::Linktype::NULL | pcap::Linktype::LOOP => 4,
        pcap::Linktype::LINUX_SLL => 16,
        pcap::Linktype::RAW | pcap::Linktype::IPV4 | pcap::Linktype::IPV6 => 0,
        _ => 14,
    }
}

/// The send/receive surface the scan engine actually drives. Split out as a
/// trait so `engine`'s tests can swap in an in-memory fake instead of
/// opening a real raw socket and capture.
pub trait RawTransport {
    fn datalink_skip(&self) -> usize;
    fn send_v4(&self, dst: Ipv4Addr, segment: &[u8]) -> Result<()>;
    fn send_v6(&self, dst: Ipv6Addr, segment: &[u8]) -> Result<()>;
    fn next_frame(&mut self, timeout: Duration) -> Option<Vec<u8>>;
}

pub struct Transport {
    send_fd: libc::c_int,
    capture: Capture<Active>,
    datalink_skip: usize,
    family: ScanFamily,
}

impl Transport {
    /// Open the IPv4 raw send socket (`IPPROTO_RAW` + `IP_HDRINCL`) and a
    /// capture bound to `filter` on `iface`.
    pub fn open_v4(iface: &str, filter: &str) -> Result<Self> {
        let send_fd = open_raw_send_socket_v4()?;
        let capture = open_capture(iface, filter).map_err(|err| {
            unsafe { libc::close(send_fd) };
            Error::FilterOpen(err)
        })?;
        let datalink_skip = datalink_skip(capture.get_datalink());
        Ok(Transport {
            send_fd,
            capture,
            datalink_skip,
            family: ScanFamily::V4,
        })
    }

    /// Open the IPv6 raw send socket (`IPPROTO_TCP` + checksum offload at
    /// offset 8) and a capture bound to `filter` on `iface`.
    pub fn open_v6(iface: &str, filter: &str) -> Result<Self> {
        let send_fd = open_raw_send_socket_v6()?;
        let capture = open_capture(iface, filter).map_err(|err| {
            unsafe { libc::close(send_fd) };
            Error::FilterOpen(err)
        })?;
        let datalink_skip = datalink_skip(capture.get_datalink());
        Ok(Transport {
            send_fd,
            capture,
            datalink_skip,
            family: ScanFamily::V6,
        })
    }

    pub fn family(&self) -> ScanFamily {
        self.family
    }

    pub fn datalink_skip(&self) -> usize {
        self.datalink_skip
    }

    /// Best-effort send; any failure is fatal to the scan.
    pub fn send_v4(&self, dst: Ipv4Addr, segment: &[u8]) -> Result<()> {
        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(dst.octets()),
            },
            sin_zero: [0; 8],
        };
        self.sendto(segment, &addr as *const _ as *const libc::sockaddr, std::mem::size_of_val(&addr))
    }

    pub fn send_v6(&self, dst: Ipv6Addr, segment: &[u8]) -> Result<()> {
        let addr = libc::sockaddr_in6 {
            sin6_family: libc::AF_INET6 as libc::sa_family_t,
            sin6_port: 0,
            sin6_flowinfo: 0,
            sin6_addr: libc::in6_addr {
                s6_addr: dst.octets(),
            },
            sin6_scope_id: 0,
        };
        self.sendto(segment, &addr as *const _ as *const libc::sockaddr, std::mem::size_of_val(&addr))
    }

    fn sendto(&self, segment: &[u8], addr: *const libc::sockaddr, addrlen: usize) -> Result<()> {
        let sent = unsafe {
            libc::sendto(
                self.send_fd,
                segment.as_ptr() as *const libc::c_void,
                segment.len(),
                0,
                addr,
                addrlen as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(Error::Send(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Poll the capture for a frame, waiting at most `timeout`. Returns
    /// `None` on timeout or a frame that the kernel filter let through but
    /// is otherwise unusable.
    pub fn next_frame(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        let mut pfd = libc::pollfd {
            fd: self.capture.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready <= 0 {
            return None;
        }
        self.capture.next_packet().ok().map(|packet| packet.data.to_vec())
    }
}

impl RawTransport for Transport {
    fn datalink_skip(&self) -> usize {
        Transport::datalink_skip(self)
    }

    fn send_v4(&self, dst: Ipv4Addr, segment: &[u8]) -> Result<()> {
        Transport::send_v4(self, dst, segment)
    }

    fn send_v6(&self, dst: Ipv6Addr, segment: &[u8]) -> Result<()> {
        Transport::send_v6(self, dst, segment)
    }

    fn next_frame(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        Transport::next_frame(self, timeout)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.send_fd);
        }
        log::debug!("transport closed");
    }
}

fn open_raw_send_socket_v4() -> Result<libc::c_int> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_RAW) };
    if fd < 0 {
        return Err(Error::SocketOpen(io::Error::last_os_error()));
    }
    let on: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_HDRINCL,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of_val(&on) as libc::socklen_t,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(Error::SocketOpen(err));
    }
    Ok(fd)
}

fn open_raw_send_socket_v6() -> Result<libc::c_int> {
    let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_RAW, libc::IPPROTO_TCP) };
    if fd < 0 {
        return Err(Error::SocketOpen(io::Error::last_os_error()));
    }
    // Offset (in bytes) of the TCP checksum field within the TCP header;
    // the kernel fills it in using the pseudo-header it already knows.
    let checksum_offset: libc::c_int = 8;
    unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            libc::IPV6_CHECKSUM,
            &checksum_offset as *const _ as *const libc::c_void,
            std::mem::size_of_val(&checksum_offset) as libc::socklen_t,
        );
    }
    Ok(fd)
}

fn open_capture(iface: &str, filter: &str) -> std::result::Result<Capture<Active>, pcap::Error> {
    let mut capture = Capture::from_device(iface)?
        .promisc(true)
        .snaplen(128)
        .timeout(1)
        .open()?;
    capture.filter(filter, true)?;
    log::debug!("capture opened on {iface} with filter `{filter}`");
    Ok(capture)
}

/// Build the BPF-style filter expression admitting only replies from `dst`
/// addressed back to our magic port.
pub fn filter_expr(dst_display: &str, magic_port: u16) -> String {
    format!("tcp and src host {dst_display} and dst port {magic_port}")
}
