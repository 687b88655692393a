//! Success-reply rendering for the identification protocol.

use std::io::{self, Write};

/// Longest os or user field carried in a reply.
pub const MAX_REPLY_FIELD: usize = 512;

/// Renders the success reply line. Ports appear in host-readable
/// decimal; oversized fields are cut at a character boundary.
pub fn format_userid(lport: u16, fport: u16, os: &str, user: &str) -> String {
    let os = truncate(os, MAX_REPLY_FIELD);
    let user = truncate(user, MAX_REPLY_FIELD);
    format!("{lport},{fport}:USERID:{os}:{user}\r\n")
}

/// Writes the reply line in full to the requester's channel.
pub fn write_userid(
    chan: &mut dyn Write,
    lport: u16,
    fport: u16,
    os: &str,
    user: &str,
) -> io::Result<()> {
    chan.write_all(format_userid(lport, fport, os, user).as_bytes())?;
    chan.flush()
}

fn truncate(input: &str, max: usize) -> &str {
    if input.len() <= max {
        return input;
    }
    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}
