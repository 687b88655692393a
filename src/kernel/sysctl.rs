//! Connection ownership via the BSD ident sysctl.
//!
//! The kernel answers `sysctl(CTL_NET, PF_INET, IPPROTO_TCP,
//! TCPCTL_IDENT)` with a `tcp_ident_mapping` record: the caller fills
//! in the foreign and local endpoints, the kernel fills in `ruid`. A
//! successful call with `ruid` still at -1 means the kernel holds no
//! mapping for that tuple, which is why the field starts at an explicit
//! sentinel rather than zero (uid 0 is a real owner).

use std::io;
use std::net::Ipv4Addr;

use tracing::debug;

use crate::addr::{SockaddrStorage, SOCKADDR_IN6_LEN, SOCKADDR_LEN, AF_INET, AF_INET6};

use super::OwnerLookup;

/// `ruid` value meaning no owner was reported, the bit pattern of the
/// kernel's `(uid_t)-1`.
pub const UNSET_RUID: u32 = u32::MAX;

/// Mirror of the kernel's `struct tcp_ident_mapping`: foreign and local
/// endpoint slots keying the query, `ruid` carrying the answer back.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TcpIdentMapping {
    pub faddr: SockaddrStorage,
    pub laddr: SockaddrStorage,
    pub ruid: u32,
}

impl TcpIdentMapping {
    /// A record ready to be filled: endpoints zeroed, `ruid` at the
    /// unset sentinel so a kernel that reports success without writing
    /// an owner is still recognized as a miss.
    pub fn unset() -> Self {
        Self {
            faddr: SockaddrStorage::zeroed(),
            laddr: SockaddrStorage::zeroed(),
            ruid: UNSET_RUID,
        }
    }
}

// 2 * sockaddr_storage + uid_t, padded to 8-byte alignment.
const _: () = {
    assert!(std::mem::size_of::<TcpIdentMapping>() == 520);
};

/// Builds the IPv4 ownership query. The foreign slot's family and
/// length tags are always written explicitly; they key the kernel's
/// record match and must not depend on zero initialization.
///
/// When `proxy` names the configured front-end proxy and the foreign
/// address equals it, the foreign address bytes stay zeroed. The kernel
/// keys such connections without a specific foreign address, and the
/// wildcard lets them match.
pub fn build_ident_query_v4(
    lport: u16,
    fport: u16,
    laddr: &SockaddrStorage,
    faddr: &SockaddrStorage,
    proxy: Option<Ipv4Addr>,
) -> Option<TcpIdentMapping> {
    let lip = laddr.v4_addr()?;
    let fip = faddr.v4_addr()?;

    let mut record = TcpIdentMapping::unset();

    record.faddr.set_family(AF_INET);
    record.faddr.set_len(SOCKADDR_LEN);
    record.faddr.set_port(fport);
    if proxy != Some(fip) {
        record.faddr.set_v4_addr(fip);
    }

    record.laddr.set_family(AF_INET);
    record.laddr.set_len(SOCKADDR_LEN);
    record.laddr.set_port(lport);
    record.laddr.set_v4_addr(lip);

    Some(record)
}

/// Builds the IPv6 ownership query.
///
/// The declared length of each OS-supplied address is checked against
/// the size of a full IPv6 record before anything is copied; an
/// oversized claim is rejected outright rather than truncated.
pub fn build_ident_query_v6(
    lport: u16,
    fport: u16,
    laddr: &SockaddrStorage,
    faddr: &SockaddrStorage,
) -> Option<TcpIdentMapping> {
    if faddr.declared_len() > SOCKADDR_IN6_LEN || laddr.declared_len() > SOCKADDR_IN6_LEN {
        return None;
    }

    let lip = laddr.v6_addr()?;
    let fip = faddr.v6_addr()?;

    let mut record = TcpIdentMapping::unset();

    record.faddr.set_family(AF_INET6);
    record.faddr.set_len(SOCKADDR_IN6_LEN);
    record.faddr.set_port(fport);
    record.faddr.set_v6_addr(fip);

    record.laddr.set_family(AF_INET6);
    record.laddr.set_len(SOCKADDR_IN6_LEN);
    record.laddr.set_port(lport);
    record.laddr.set_v6_addr(lip);

    Some(record)
}

/// Raw submission of an ownership query. Split out so the backend can
/// be driven by a stub kernel in tests and so other query mechanisms
/// can reuse the record handling.
pub trait TcpIdentQuery {
    /// Submits the record; the kernel writes `ruid` in place. `Err` is
    /// a query-level failure, not a miss.
    fn query(&self, record: &mut TcpIdentMapping) -> io::Result<()>;
}

/// The real sysctl submission.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelSysctl;

#[cfg(any(
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "macos"
))]
mod mib {
    use libc::c_int;

    pub const CTL_NET: c_int = 4;
    pub const PF_INET: c_int = 2;
    pub const IPPROTO_TCP: c_int = 6;
    // <netinet/tcp_var.h>
    pub const TCPCTL_IDENT: c_int = 9;
}

impl TcpIdentQuery for KernelSysctl {
    #[cfg(any(
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "macos"
    ))]
    fn query(&self, record: &mut TcpIdentMapping) -> io::Result<()> {
        let mut name = [mib::CTL_NET, mib::PF_INET, mib::IPPROTO_TCP, mib::TCPCTL_IDENT];
        let mut len = std::mem::size_of::<TcpIdentMapping>();
        let rc = unsafe {
            libc::sysctl(
                name.as_mut_ptr(),
                name.len() as libc::c_uint,
                record as *mut TcpIdentMapping as *mut libc::c_void,
                &mut len,
                std::ptr::null_mut(),
                0,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "macos"
    )))]
    fn query(&self, _record: &mut TcpIdentMapping) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "ident sysctl not available on this platform",
        ))
    }
}

/// Ownership lookups through the ident sysctl. Needs no setup before
/// privileges are dropped, so the default `init`/`open` hooks apply.
///
/// `proxy` is the one process-wide relay address, fixed at
/// construction; connections arriving from it query the kernel with a
/// wildcard foreign address.
pub struct SysctlLookup<Q = KernelSysctl> {
    proxy: Option<Ipv4Addr>,
    kernel: Q,
}

impl SysctlLookup {
    pub fn new(proxy: Option<Ipv4Addr>) -> Self {
        Self {
            proxy,
            kernel: KernelSysctl,
        }
    }
}

impl<Q: TcpIdentQuery> SysctlLookup<Q> {
    pub fn with_kernel(proxy: Option<Ipv4Addr>, kernel: Q) -> Self {
        Self { proxy, kernel }
    }

    fn submit(&self, mut record: TcpIdentMapping) -> Option<u32> {
        match self.kernel.query(&mut record) {
            Ok(()) if record.ruid != UNSET_RUID => Some(record.ruid),
            Ok(()) => None,
            Err(err) => {
                debug!(error = %err, "ident sysctl failed");
                None
            }
        }
    }
}

impl<Q: TcpIdentQuery> OwnerLookup for SysctlLookup<Q> {
    fn owner_v4(
        &self,
        lport: u16,
        fport: u16,
        laddr: &SockaddrStorage,
        faddr: &SockaddrStorage,
    ) -> Option<u32> {
        let record = build_ident_query_v4(lport, fport, laddr, faddr, self.proxy)?;
        self.submit(record)
    }

    fn owner_v6(
        &self,
        lport: u16,
        fport: u16,
        laddr: &SockaddrStorage,
        faddr: &SockaddrStorage,
    ) -> Option<u32> {
        let record = build_ident_query_v6(lport, fport, laddr, faddr)?;
        self.submit(record)
    }
}
