//! Masquerade resolution.
//!
//! A connection terminating on a NAT gateway is owned by nobody on the
//! gateway itself. This module recovers the real internal endpoint
//! from the packet filter's state table and produces an answer either
//! by forwarding the query to the internal host or from the static
//! registry of known masqueraded hosts.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::addr::{SockaddrStorage, AF_INET};
use crate::forward::{ForwardQuery, Forwarder, IdentForwarder, DEFAULT_FORWARD_TIMEOUT};
use crate::registry::MasqRegistry;
use crate::reply;

pub mod pf;

/// Direction of the translation being looked up, relative to the
/// gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatDirection {
    In,
    Out,
}

/// One NAT state lookup: the connection's endpoints as the gateway
/// observes them. All lookups are for TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatQuery {
    pub direction: NatDirection,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
}

impl NatQuery {
    pub fn inbound(src: SocketAddrV4, dst: SocketAddrV4) -> Self {
        Self {
            direction: NatDirection::In,
            src,
            dst,
        }
    }
}

/// The state table's answer: who the connection really belongs to.
/// Ports are in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatReply {
    /// Real (pre-NAT) source address of the internal host.
    pub real_src: Ipv4Addr,
    /// Rewritten local port.
    pub masq_lport: u16,
    /// Rewritten foreign port.
    pub masq_fport: u16,
}

#[derive(Debug, Error)]
pub enum NatError {
    /// The packet filter control device could not be opened.
    #[error("cannot open packet filter device: {0}")]
    Device(#[source] std::io::Error),
    /// The lookup itself failed. The usual cause is that no state
    /// entry exists, which simply means the connection is not
    /// masqueraded.
    #[error("nat state lookup failed: {0}")]
    Lookup(#[source] std::io::Error),
}

/// Queries the packet filter's connection-tracking table for the real
/// endpoint behind a translated connection.
pub trait NatLookup {
    fn natlook(&self, query: &NatQuery) -> Result<NatReply, NatError>;
}

/// Receives one line per successful masquerade-resolved answer.
pub trait AuditSink {
    fn masq_resolved(&self, peer: IpAddr, lport: u16, fport: u16, os: &str, user: &str);
}

/// Default audit sink, logging through `tracing`.
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn masq_resolved(&self, peer: IpAddr, lport: u16, fport: u16, os: &str, user: &str) {
        tracing::info!(peer = %peer, lport, fport, os, user, "masquerade lookup succeeded");
    }
}

/// Resolution policy, fixed at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct MasqOptions {
    /// Identification service port on internal hosts. `None` disables
    /// forwarding.
    pub forward_port: Option<u16>,
    /// When set, a registry entry answers without trying the internal
    /// host first.
    pub registry_override: bool,
    /// Bound on outbound forwarding connects, so one unresponsive
    /// internal host cannot hold a resolution open indefinitely.
    pub timeout: Duration,
}

impl Default for MasqOptions {
    fn default() -> Self {
        Self {
            forward_port: None,
            registry_override: false,
            timeout: DEFAULT_FORWARD_TIMEOUT,
        }
    }
}

/// Resolves identification queries for masqueraded connections.
///
/// Holds only read-only state, so one resolver may serve any number of
/// concurrent resolutions.
pub struct MasqResolver<N, F, A = TracingAudit> {
    options: MasqOptions,
    registry: MasqRegistry,
    nat: N,
    forwarder: F,
    audit: A,
}

impl MasqResolver<pf::PfNat, IdentForwarder, TracingAudit> {
    pub fn new(options: MasqOptions, registry: MasqRegistry) -> Self {
        let forwarder = IdentForwarder::new(options.timeout);
        Self {
            options,
            registry,
            nat: pf::PfNat::new(),
            forwarder,
            audit: TracingAudit,
        }
    }
}

impl<N: NatLookup, F: Forwarder, A: AuditSink> MasqResolver<N, F, A> {
    pub fn with_backends(
        options: MasqOptions,
        registry: MasqRegistry,
        nat: N,
        forwarder: F,
        audit: A,
    ) -> Self {
        Self {
            options,
            registry,
            nat,
            forwarder,
            audit,
        }
    }

    /// Answers an identification query for a connection that missed
    /// the local ownership lookup.
    ///
    /// Returns true when an answer was produced and written to `chan`;
    /// false means no answer, and nothing was written.
    pub fn resolve(
        &self,
        chan: &mut dyn Write,
        lport: u16,
        fport: u16,
        laddr: &SockaddrStorage,
        faddr: &SockaddrStorage,
    ) -> bool {
        // Only IPv4 connections can be masqueraded through pf state we
        // understand. Anything else fails closed, before any resource
        // is acquired.
        if laddr.family() != AF_INET || faddr.family() != AF_INET {
            return false;
        }
        let (lip, fip) = match (laddr.v4_addr(), faddr.v4_addr()) {
            (Some(lip), Some(fip)) => (lip, fip),
            _ => return false,
        };

        let query = NatQuery::inbound(
            SocketAddrV4::new(lip, lport),
            SocketAddrV4::new(fip, fport),
        );
        let nat_reply = match self.nat.natlook(&query) {
            Ok(nat_reply) => nat_reply,
            Err(NatError::Device(err)) => {
                debug!(error = %err, "packet filter device unavailable");
                return false;
            }
            Err(NatError::Lookup(err)) => {
                // No state entry: the connection is simply not
                // masqueraded. Expected for most traffic.
                debug!(error = %err, "no nat state for connection");
                return false;
            }
        };

        let entry = self.registry.find(IpAddr::V4(nat_reply.real_src));

        if let Some(port) = self.options.forward_port {
            if entry.is_none() || !self.options.registry_override {
                let fwd = ForwardQuery {
                    host: nat_reply.real_src,
                    port,
                    lport,
                    fport,
                    masq_lport: nat_reply.masq_lport,
                    masq_fport: nat_reply.masq_fport,
                };
                if self.forwarder.forward(chan, &fwd) {
                    return true;
                }
                debug!(
                    host = %nat_reply.real_src,
                    lport,
                    masq_lport = nat_reply.masq_lport,
                    fport,
                    "forward to internal host failed"
                );
            }
        }

        if let Some(entry) = entry {
            if reply::write_userid(chan, lport, fport, &entry.os, &entry.user).is_err() {
                return false;
            }
            self.audit
                .masq_resolved(IpAddr::V4(fip), lport, fport, &entry.os, &entry.user);
            return true;
        }

        false
    }
}
