//! Query forwarding to the true owner of a masqueraded connection.
//!
//! The internal host runs its own identification service; we ask it
//! about the rewritten port pair and relay its answer to the original
//! requester under the ports the requester asked about.

use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::reply;

/// Well-known identification service port.
pub const DEFAULT_FORWARD_PORT: u16 = 113;
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// One forwarded query: where to ask, what to ask, and which ports the
/// relayed answer must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardQuery {
    /// Real (pre-NAT) address of the internal host.
    pub host: Ipv4Addr,
    /// Identification service port on that host.
    pub port: u16,
    /// Local port as the requester sees the connection.
    pub lport: u16,
    /// Foreign port as the requester sees the connection.
    pub fport: u16,
    /// Rewritten local port, what the internal host knows.
    pub masq_lport: u16,
    /// Rewritten foreign port, what the internal host knows.
    pub masq_fport: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardReply {
    pub os: String,
    pub user: String,
}

/// Relays an identification query to an internal host.
pub trait Forwarder {
    /// Returns true when an answer was obtained and written to `chan`.
    /// On false, nothing has been written.
    fn forward(&self, chan: &mut dyn Write, query: &ForwardQuery) -> bool;
}

/// The real client: one outbound TCP connection per forwarded query,
/// every socket operation bounded by the timeout.
#[derive(Debug, Clone)]
pub struct IdentForwarder {
    timeout: Duration,
}

impl IdentForwarder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn fetch(&self, query: &ForwardQuery) -> Option<ForwardReply> {
        let addr = SocketAddr::new(IpAddr::V4(query.host), query.port);
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout).ok()?;
        let _ = stream.set_read_timeout(Some(self.timeout));
        let _ = stream.set_write_timeout(Some(self.timeout));

        let request = format!("{},{}\r\n", query.masq_lport, query.masq_fport);
        stream.write_all(request.as_bytes()).ok()?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        parse_forward_reply(&line)
    }
}

impl Forwarder for IdentForwarder {
    fn forward(&self, chan: &mut dyn Write, query: &ForwardQuery) -> bool {
        let Some(answer) = self.fetch(query) else {
            return false;
        };
        match reply::write_userid(chan, query.lport, query.fport, &answer.os, &answer.user) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "relay to requester failed");
                false
            }
        }
    }
}

/// Parses a `<port>,<port>:USERID:<os>:<user>` reply line. Whitespace
/// around the separators is tolerated; a username may contain colons.
fn parse_forward_reply(line: &str) -> Option<ForwardReply> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let mut parts = trimmed.splitn(4, ':');
    let _ports = parts.next()?;
    if parts.next()?.trim() != "USERID" {
        return None;
    }
    let os = parts.next()?.trim();
    let user = parts.next()?.trim();
    if os.is_empty() || user.is_empty() {
        return None;
    }
    Some(ForwardReply {
        os: os.to_string(),
        user: user.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    #[test]
    fn parse_plain_reply() {
        let reply = parse_forward_reply("6000,23:USERID:UNIX:alice\r\n").unwrap();
        assert_eq!(reply.os, "UNIX");
        assert_eq!(reply.user, "alice");
    }

    #[test]
    fn parse_tolerates_spaced_separators() {
        let reply = parse_forward_reply("6000 , 23 : USERID : UNIX : alice\r\n").unwrap();
        assert_eq!(reply.os, "UNIX");
        assert_eq!(reply.user, "alice");
    }

    #[test]
    fn parse_keeps_colons_in_usernames() {
        let reply = parse_forward_reply("1,2:USERID:UNIX:a:b\r\n").unwrap();
        assert_eq!(reply.user, "a:b");
    }

    #[test]
    fn parse_rejects_error_replies() {
        assert!(parse_forward_reply("6000,23:ERROR:NO-USER\r\n").is_none());
    }

    #[test]
    fn parse_rejects_empty_identifier() {
        assert!(parse_forward_reply("6000,23:USERID:UNIX:\r\n").is_none());
        assert!(parse_forward_reply("6000,23:USERID::alice\r\n").is_none());
        assert!(parse_forward_reply("garbage").is_none());
    }

    #[test]
    fn forward_relays_with_requester_visible_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 64];
            let n = stream.read(&mut request).unwrap();
            let request = String::from_utf8_lossy(&request[..n]).into_owned();
            stream
                .write_all(b"12345,23:USERID:OTHER:bob\r\n")
                .unwrap();
            request
        });

        let forwarder = IdentForwarder::new(Duration::from_secs(5));
        let query = ForwardQuery {
            host: Ipv4Addr::LOCALHOST,
            port,
            lport: 6000,
            fport: 23,
            masq_lport: 12345,
            masq_fport: 23,
        };
        let mut chan = Vec::new();
        assert!(forwarder.forward(&mut chan, &query));
        // The internal host was asked about the rewritten ports.
        assert_eq!(server.join().unwrap(), "12345,23\r\n");
        // The requester sees the ports it asked about.
        assert_eq!(chan, b"6000,23:USERID:OTHER:bob\r\n");
    }

    #[test]
    fn unreachable_host_writes_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let forwarder = IdentForwarder::new(Duration::from_secs(1));
        let query = ForwardQuery {
            host: Ipv4Addr::LOCALHOST,
            port,
            lport: 6000,
            fport: 23,
            masq_lport: 12345,
            masq_fport: 23,
        };
        let mut chan = Vec::new();
        assert!(!forwarder.forward(&mut chan, &query));
        assert!(chan.is_empty());
    }

    #[test]
    fn malformed_remote_reply_writes_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 64];
            let _ = stream.read(&mut request).unwrap();
            stream.write_all(b"12345,23:ERROR:HIDDEN-USER\r\n").unwrap();
        });

        let forwarder = IdentForwarder::new(Duration::from_secs(5));
        let query = ForwardQuery {
            host: Ipv4Addr::LOCALHOST,
            port,
            lport: 6000,
            fport: 23,
            masq_lport: 12345,
            masq_fport: 23,
        };
        let mut chan = Vec::new();
        assert!(!forwarder.forward(&mut chan, &query));
        assert!(chan.is_empty());
        server.join().unwrap();
    }
}
