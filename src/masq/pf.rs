//! Packet filter `DIOCNATLOOK` backend.
//!
//! These structures match the OpenBSD `net/pfvar.h` layout for a NAT
//! state lookup on `/dev/pf`: the caller supplies the translated
//! source/destination of an established connection, the kernel answers
//! with the real (pre-NAT) endpoints.

use std::fs::{File, OpenOptions};
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::addr::AF_INET;

use super::{NatDirection, NatError, NatLookup, NatQuery, NatReply};

/// PF direction: inbound.
pub const PF_IN: u8 = 1;
/// PF direction: outbound.
pub const PF_OUT: u8 = 2;

const IPPROTO_TCP: u8 = 6;

/// Control device queried for NAT state.
pub const PF_DEVICE: &str = "/dev/pf";

/// `pf_addr`: 16-byte address slot, network byte order. IPv4 occupies
/// the first four bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PfAddr {
    pub addr8: [u8; 16],
}

impl PfAddr {
    pub const fn zeroed() -> Self {
        Self { addr8: [0u8; 16] }
    }

    pub fn set_v4(&mut self, addr: Ipv4Addr) {
        self.addr8[..4].copy_from_slice(&addr.octets());
    }

    pub fn v4(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.addr8[0], self.addr8[1], self.addr8[2], self.addr8[3])
    }
}

/// `pfioc_natlook`: the `DIOCNATLOOK` request/reply record. Ports are
/// carried in network byte order; `rsaddr`/`rsport`/`rdport` come back
/// filled with the pre-NAT endpoints.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PfiocNatlook {
    pub saddr: PfAddr,
    pub daddr: PfAddr,
    pub rsaddr: PfAddr,
    pub rdaddr: PfAddr,
    pub sport: u16,
    pub dport: u16,
    pub rsport: u16,
    pub rdport: u16,
    pub af: u8,
    pub proto: u8,
    pub direction: u8,
}

impl PfiocNatlook {
    pub const fn zeroed() -> Self {
        Self {
            saddr: PfAddr::zeroed(),
            daddr: PfAddr::zeroed(),
            rsaddr: PfAddr::zeroed(),
            rdaddr: PfAddr::zeroed(),
            sport: 0,
            dport: 0,
            rsport: 0,
            rdport: 0,
            af: 0,
            proto: 0,
            direction: 0,
        }
    }
}

// 4 * pf_addr + 4 ports + af/proto/direction, padded to u16 alignment.
const _: () = {
    assert!(std::mem::size_of::<PfAddr>() == 16);
    assert!(std::mem::size_of::<PfiocNatlook>() == 76);
};

/// `_IOWR('D', 23, struct pfioc_natlook)`.
fn diocnatlook() -> libc::c_ulong {
    let size = std::mem::size_of::<PfiocNatlook>() as libc::c_ulong;
    // IOC_INOUT = 0xC0000000, IOCPARM_MASK = 0x1FFF
    0xC000_0000 | ((size & 0x1FFF) << 16) | ((b'D' as libc::c_ulong) << 8) | 23
}

fn encode_natlook(query: &NatQuery) -> PfiocNatlook {
    let mut pnl = PfiocNatlook::zeroed();
    pnl.saddr.set_v4(*query.src.ip());
    pnl.sport = query.src.port().to_be();
    pnl.daddr.set_v4(*query.dst.ip());
    pnl.dport = query.dst.port().to_be();
    pnl.af = AF_INET;
    pnl.proto = IPPROTO_TCP;
    pnl.direction = match query.direction {
        NatDirection::In => PF_IN,
        NatDirection::Out => PF_OUT,
    };
    pnl
}

fn decode_natlook(pnl: &PfiocNatlook) -> NatReply {
    NatReply {
        real_src: pnl.rsaddr.v4(),
        masq_lport: u16::from_be(pnl.rsport),
        masq_fport: u16::from_be(pnl.rdport),
    }
}

/// NAT state lookups against the pf control device. The device is
/// opened for the duration of one lookup and closed on every exit
/// path; nothing is cached across resolutions.
#[derive(Debug, Clone)]
pub struct PfNat {
    device: PathBuf,
}

impl PfNat {
    pub fn new() -> Self {
        Self::with_device(PF_DEVICE)
    }

    pub fn with_device(device: impl AsRef<Path>) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
        }
    }
}

impl Default for PfNat {
    fn default() -> Self {
        Self::new()
    }
}

impl NatLookup for PfNat {
    fn natlook(&self, query: &NatQuery) -> Result<NatReply, NatError> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)
            .map_err(NatError::Device)?;
        let mut pnl = encode_natlook(query);
        natlook_ioctl(&device, &mut pnl).map_err(NatError::Lookup)?;
        Ok(decode_natlook(&pnl))
    }
}

#[cfg(unix)]
fn natlook_ioctl(device: &File, pnl: &mut PfiocNatlook) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let rc = unsafe { libc::ioctl(device.as_raw_fd(), diocnatlook(), pnl as *mut PfiocNatlook) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn natlook_ioctl(_device: &File, _pnl: &mut PfiocNatlook) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "pf control device not available on this platform",
    ))
}
