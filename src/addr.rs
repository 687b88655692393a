//! Fixed-layout socket address records for the kernel query ABI.
//!
//! The ownership sysctl and the packet filter expect BSD-style
//! `sockaddr_in`/`sockaddr_in6` records embedded in `sockaddr_storage`
//! slots, with the length and family tags in the first two bytes. These
//! mirrors are written byte-for-byte with explicit offsets instead of
//! borrowing the host libc types, whose layout differs across build
//! hosts (Linux `sockaddr_in` has no length byte at all).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IPv4 address family tag (BSD `AF_INET`).
pub const AF_INET: u8 = 2;
/// IPv6 address family tag (BSD `AF_INET6`).
pub const AF_INET6: u8 = 24;

/// Declared length of an IPv4 record (`sizeof(struct sockaddr)`).
pub const SOCKADDR_LEN: u8 = 16;
/// Declared length of a full IPv6 record (`sizeof(struct sockaddr_in6)`).
pub const SOCKADDR_IN6_LEN: u8 = 28;

// Offsets shared by sockaddr_in and sockaddr_in6.
const OFF_LEN: usize = 0;
const OFF_FAMILY: usize = 1;
const OFF_PORT: usize = 2;
const OFF_V4_ADDR: usize = 4;
const OFF_V6_ADDR: usize = 8;

const STORAGE_SIZE: usize = 256;

/// Mirror of the BSD `struct sockaddr_storage` (256 bytes, 8-byte
/// aligned). Carries one socket address of either family, tagged with
/// its declared length and family.
#[repr(C, align(8))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SockaddrStorage {
    bytes: [u8; STORAGE_SIZE],
}

impl SockaddrStorage {
    pub const fn zeroed() -> Self {
        Self {
            bytes: [0u8; STORAGE_SIZE],
        }
    }

    /// An IPv4 endpoint with the tags a BSD kernel would supply.
    pub fn v4(addr: Ipv4Addr, port: u16) -> Self {
        let mut ss = Self::zeroed();
        ss.set_len(SOCKADDR_LEN);
        ss.set_family(AF_INET);
        ss.set_port(port);
        ss.set_v4_addr(addr);
        ss
    }

    /// An IPv6 endpoint with the tags a BSD kernel would supply.
    pub fn v6(addr: Ipv6Addr, port: u16) -> Self {
        let mut ss = Self::zeroed();
        ss.set_len(SOCKADDR_IN6_LEN);
        ss.set_family(AF_INET6);
        ss.set_port(port);
        ss.set_v6_addr(addr);
        ss
    }

    /// Wraps raw bytes handed over by the OS. Anything past the first
    /// 256 bytes is ignored; the declared length byte is preserved
    /// as-is so callers can validate it against the record they are
    /// about to fill.
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut ss = Self::zeroed();
        let n = raw.len().min(STORAGE_SIZE);
        ss.bytes[..n].copy_from_slice(&raw[..n]);
        ss
    }

    pub fn as_bytes(&self) -> &[u8; STORAGE_SIZE] {
        &self.bytes
    }

    /// The length the OS claims for this record. Not trusted: callers
    /// must bounds-check it before copying into a fixed-size record.
    pub fn declared_len(&self) -> u8 {
        self.bytes[OFF_LEN]
    }

    pub fn family(&self) -> u8 {
        self.bytes[OFF_FAMILY]
    }

    /// Port in host order, for display and logging.
    pub fn port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[OFF_PORT], self.bytes[OFF_PORT + 1]])
    }

    pub fn v4_addr(&self) -> Option<Ipv4Addr> {
        if self.family() != AF_INET {
            return None;
        }
        let b = &self.bytes[OFF_V4_ADDR..OFF_V4_ADDR + 4];
        Some(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }

    pub fn v6_addr(&self) -> Option<Ipv6Addr> {
        if self.family() != AF_INET6 {
            return None;
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes[OFF_V6_ADDR..OFF_V6_ADDR + 16]);
        Some(Ipv6Addr::from(octets))
    }

    /// Address in host-readable form, for display and logging.
    pub fn ip(&self) -> Option<IpAddr> {
        match self.family() {
            AF_INET => self.v4_addr().map(IpAddr::V4),
            AF_INET6 => self.v6_addr().map(IpAddr::V6),
            _ => None,
        }
    }

    pub(crate) fn set_len(&mut self, len: u8) {
        self.bytes[OFF_LEN] = len;
    }

    pub(crate) fn set_family(&mut self, family: u8) {
        self.bytes[OFF_FAMILY] = family;
    }

    /// Stores the port in network byte order, as every kernel record
    /// carries it.
    pub(crate) fn set_port(&mut self, port: u16) {
        self.bytes[OFF_PORT..OFF_PORT + 2].copy_from_slice(&port.to_be_bytes());
    }

    pub(crate) fn set_v4_addr(&mut self, addr: Ipv4Addr) {
        self.bytes[OFF_V4_ADDR..OFF_V4_ADDR + 4].copy_from_slice(&addr.octets());
    }

    pub(crate) fn set_v6_addr(&mut self, addr: Ipv6Addr) {
        self.bytes[OFF_V6_ADDR..OFF_V6_ADDR + 16].copy_from_slice(&addr.octets());
    }
}

impl std::fmt::Debug for SockaddrStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SockaddrStorage")
            .field("len", &self.declared_len())
            .field("family", &self.family())
            .field("ip", &self.ip())
            .field("port", &self.port())
            .finish()
    }
}

const _: () = {
    assert!(std::mem::size_of::<SockaddrStorage>() == STORAGE_SIZE);
    assert!(std::mem::align_of::<SockaddrStorage>() == 8);
};
