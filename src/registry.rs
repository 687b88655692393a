//! Static registry of masqueraded hosts that do not run their own
//! identification service. Loaded once by the embedding daemon and
//! read-only afterwards.

use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::Path;

use thiserror::Error;

/// Longest accepted username in a registry entry.
pub const MAX_USER_LEN: usize = 128;
/// Longest accepted operating-system label in a registry entry.
pub const MAX_OS_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasqEntry {
    pub addr: IpAddr,
    pub user: String,
    pub os: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[line {line}] {message}")]
pub struct RegistryError {
    pub line: usize,
    pub message: String,
}

impl RegistryError {
    fn new(line: usize, message: &str) -> Self {
        Self {
            line,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MasqRegistry {
    entries: Vec<MasqEntry>,
}

impl MasqRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let input = fs::read_to_string(path)?;
        Self::parse(&input).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Parses `address user os` lines. `#` starts a comment; blank
    /// lines are skipped. Oversized fields are rejected at load, never
    /// truncated at request time.
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let mut entries = Vec::new();
        for (idx, raw_line) in input.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let host = parts
                .next()
                .ok_or_else(|| RegistryError::new(line_no, "expected host entry"))?;
            let user = parts
                .next()
                .ok_or_else(|| RegistryError::new(line_no, "expected user"))?;
            let os = parts
                .next()
                .ok_or_else(|| RegistryError::new(line_no, "expected os"))?;
            if parts.next().is_some() {
                return Err(RegistryError::new(line_no, "unexpected trailing data"));
            }

            let addr: IpAddr = host
                .parse()
                .map_err(|_| RegistryError::new(line_no, "invalid host address"))?;
            if user.len() > MAX_USER_LEN {
                return Err(RegistryError::new(line_no, "user name too long"));
            }
            if os.len() > MAX_OS_LEN {
                return Err(RegistryError::new(line_no, "os name too long"));
            }

            entries.push(MasqEntry {
                addr,
                user: user.to_string(),
                os: os.to_string(),
            });
        }

        Ok(Self { entries })
    }

    /// Exact-match lookup by the real (pre-NAT) address.
    pub fn find(&self, addr: IpAddr) -> Option<&MasqEntry> {
        self.entries.iter().find(|entry| entry.addr == addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn parse_single_entry() {
        let registry = MasqRegistry::parse("192.0.2.5 alice UNIX").unwrap();
        assert_eq!(registry.len(), 1);
        let entry = registry
            .find(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 5)))
            .unwrap();
        assert_eq!(entry.user, "alice");
        assert_eq!(entry.os, "UNIX");
    }

    #[test]
    fn lookup_is_exact_match_only() {
        let registry = MasqRegistry::parse("10.0.0.5 alice UNIX").unwrap();
        assert!(registry.find(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))).is_some());
        assert!(registry.find(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6))).is_none());
    }

    #[test]
    fn ipv6_entries_are_accepted() {
        let registry = MasqRegistry::parse("2001:db8::7 carol UNIX").unwrap();
        let addr: Ipv6Addr = "2001:db8::7".parse().unwrap();
        assert!(registry.find(IpAddr::V6(addr)).is_some());
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let input = "\n# comment\n203.0.113.1 dave UNIX # trailing\n\n10.0.0.9 erin OTHER\n";
        let registry = MasqRegistry::parse(input).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn trailing_data_is_rejected_with_line_number() {
        let err = MasqRegistry::parse("192.0.2.5 alice UNIX extra").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn invalid_address_is_rejected() {
        let err = MasqRegistry::parse("# leading comment\nnot-an-address bob UNIX").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("address"));
    }

    #[test]
    fn oversized_user_is_rejected_not_truncated() {
        let user = "u".repeat(MAX_USER_LEN + 1);
        let err = MasqRegistry::parse(&format!("192.0.2.5 {user} UNIX")).unwrap_err();
        assert!(err.message.contains("user"));
    }

    #[test]
    fn oversized_os_label_is_rejected() {
        let os = "o".repeat(MAX_OS_LEN + 1);
        let err = MasqRegistry::parse(&format!("192.0.2.5 alice {os}")).unwrap_err();
        assert!(err.message.contains("os"));
    }
}
