//! Connection-owner resolution for RFC 1413 identification services.
//!
//! Given the 4-tuple of an inbound TCP connection, this crate answers
//! "which local user owns it": a per-kernel ownership query
//! ([`kernel::OwnerLookup`]) for connections the host terminates
//! itself, and a masquerade resolver ([`masq::MasqResolver`]) for
//! connections NAT-ed through this host, which recovers the real
//! internal endpoint from the packet filter's state table and answers
//! from a static registry or by forwarding the query to the internal
//! host.
//!
//! The embedding daemon owns the listener, request parsing, privilege
//! handling and configuration files; everything here is synchronous,
//! blocking and free of shared mutable state, so resolutions may run
//! concurrently from any scheduling model.

pub mod addr;
pub mod forward;
pub mod kernel;
pub mod masq;
pub mod registry;
pub mod reply;

pub use addr::SockaddrStorage;
pub use forward::{ForwardQuery, ForwardReply, Forwarder, IdentForwarder};
pub use kernel::{sysctl::SysctlLookup, BackendError, OwnerLookup};
pub use masq::{
    AuditSink, MasqOptions, MasqResolver, NatError, NatLookup, NatQuery, NatReply, TracingAudit,
};
pub use registry::{MasqEntry, MasqRegistry, RegistryError};
