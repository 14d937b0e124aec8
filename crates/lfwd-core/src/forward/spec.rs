//! Local forward specification parsing.
//!
//! SSH-style `-L` syntax: `[bind_addr:]port:host:hostport`.
//!
//! Either address may be an IPv6 literal in brackets. The bind address
//! also accepts `localhost` and `*` (all interfaces).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::protocol::{ChannelParams, DirectTcpIpParams};
use crate::{Error, Result};

/// A parsed `-L` forward: where to listen and what the peer should reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalForwardSpec {
    /// Local address to listen on.
    pub bind_addr: SocketAddr,
    /// Hostname the peer connects to.
    pub target_host: String,
    /// Port the peer connects to.
    pub target_port: u16,
}

impl LocalForwardSpec {
    /// Build a spec from its parts.
    pub fn new(bind_addr: SocketAddr, target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            bind_addr,
            target_host: target_host.into(),
            target_port,
        }
    }

    /// Parse `[bind_addr:]port:host:hostport`.
    ///
    /// Examples:
    /// - `127.0.0.1:5432:db.internal:5432`
    /// - `5432:db.internal:5432` (binds to localhost)
    /// - `[::1]:8080:localhost:80`
    /// - `8080:[fd00::2]:80`
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(invalid("empty specification"));
        }

        let fields = split_fields(s)?;
        let (bind_ip, bind_port, host, port) = match fields.as_slice() {
            [bind_port, host, port] => (IpAddr::V4(Ipv4Addr::LOCALHOST), *bind_port, *host, *port),
            [bind, bind_port, host, port] => (parse_bind_ip(bind)?, *bind_port, *host, *port),
            _ => {
                return Err(invalid(format!(
                    "expected [bind_addr:]port:host:hostport, got: {}",
                    s
                )));
            }
        };

        let target_host = strip_brackets(host);
        if target_host.is_empty() {
            return Err(invalid("empty target host"));
        }

        Ok(Self {
            bind_addr: SocketAddr::new(bind_ip, parse_port(bind_port)?),
            target_host: target_host.to_string(),
            target_port: parse_port(port)?,
        })
    }

    /// Target as `host:port`.
    pub fn target(&self) -> String {
        if self.target_host.contains(':') {
            format!("[{}]:{}", self.target_host, self.target_port)
        } else {
            format!("{}:{}", self.target_host, self.target_port)
        }
    }

    /// Channel-open parameters for a connection accepted from `originator`.
    pub fn channel_params(&self, originator: SocketAddr) -> ChannelParams {
        ChannelParams::DirectTcpIp(DirectTcpIpParams {
            target_host: self.target_host.clone(),
            target_port: self.target_port,
            originator_host: originator.ip().to_string(),
            originator_port: originator.port(),
        })
    }
}

impl FromStr for LocalForwardSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for LocalForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.bind_addr, self.target())
    }
}

/// Split on ':' outside of brackets.
fn split_fields(s: &str) -> Result<Vec<&str>> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut in_brackets = false;

    for (i, c) in s.char_indices() {
        match c {
            '[' if !in_brackets => in_brackets = true,
            ']' if in_brackets => in_brackets = false,
            '[' | ']' => return Err(invalid(format!("unbalanced bracket in: {}", s))),
            ':' if !in_brackets => {
                fields.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_brackets {
        return Err(invalid("unclosed IPv6 bracket"));
    }
    fields.push(&s[start..]);
    Ok(fields)
}

fn strip_brackets(s: &str) -> &str {
    s.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(s)
}

fn parse_bind_ip(s: &str) -> Result<IpAddr> {
    match s {
        "" | "*" => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        "localhost" => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        _ => strip_brackets(s)
            .parse()
            .map_err(|_| invalid(format!("invalid bind address: {}", s))),
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|_| invalid(format!("invalid port: {}", s)))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidForwardSpec {
        message: message.into(),
    }
}
