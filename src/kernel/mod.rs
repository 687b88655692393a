use std::io;

use thiserror::Error;

use crate::addr::SockaddrStorage;

pub mod sysctl;

/// Startup failure of a kernel backend. Distinct from per-query
/// failures, which are contained and reduced to a missing owner; a
/// backend that cannot set itself up aborts startup.
#[derive(Debug, Error)]
#[error("kernel backend setup failed: {0}")]
pub struct BackendError(#[from] pub io::Error);

/// Maps a TCP connection, keyed by its local and foreign endpoints, to
/// the uid owning the local socket. One implementation per supported
/// kernel, selected when the embedding daemon is built or configured.
///
/// Per-query failures never propagate: a backend logs what it must and
/// answers `None`.
pub trait OwnerLookup {
    /// One-time setup, called before privileges are dropped.
    fn init(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Acquires any persistent handle the backend keeps across queries.
    /// Also called before privileges are dropped.
    fn open(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn owner_v4(
        &self,
        lport: u16,
        fport: u16,
        laddr: &SockaddrStorage,
        faddr: &SockaddrStorage,
    ) -> Option<u32>;

    fn owner_v6(
        &self,
        lport: u16,
        fport: u16,
        laddr: &SockaddrStorage,
        faddr: &SockaddrStorage,
    ) -> Option<u32>;
}

/// Backend for platforms with no native ownership query. Refuses to
/// start so a misconfigured deployment fails at startup instead of
/// answering nothing forever.
pub struct UnsupportedLookup;

impl OwnerLookup for UnsupportedLookup {
    fn init(&self) -> Result<(), BackendError> {
        Err(BackendError(io::Error::new(
            io::ErrorKind::Unsupported,
            "no connection ownership backend for this platform",
        )))
    }

    fn owner_v4(
        &self,
        _lport: u16,
        _fport: u16,
        _laddr: &SockaddrStorage,
        _faddr: &SockaddrStorage,
    ) -> Option<u32> {
        None
    }

    fn owner_v6(
        &self,
        _lport: u16,
        _fport: u16,
        _laddr: &SockaddrStorage,
        _faddr: &SockaddrStorage,
    ) -> Option<u32> {
        None
    }
}
