//! Target-side forwarding policy.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use lfwd_core::constants::DEFAULT_CONNECT_TIMEOUT;
use lfwd_core::{Error, Result};

/// Default maximum concurrent forwarded connections.
pub const DEFAULT_MAX_FORWARDS: usize = 64;

// =============================================================================
// Forwarding Filter
// =============================================================================

/// One allowed target: `host:port` or `host:*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRule {
    pub host: String,
    /// `None` matches any port.
    pub port: Option<u16>,
}

impl TargetRule {
    /// Check whether the rule covers `host:port`. Hosts compare
    /// case-insensitively.
    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host.eq_ignore_ascii_case(host) && self.port.is_none_or(|p| p == port)
    }
}

impl FromStr for TargetRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfig {
            message: format!("invalid target rule (expected host:port or host:*): {}", s),
        };

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }

        let port = match port {
            "*" => None,
            p => Some(p.parse::<u16>().map_err(|_| invalid())?),
        };
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for TargetRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}:*", self.host),
        }
    }
}

/// Which targets the peer may ask us to connect to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ForwardingFilter {
    /// Any target.
    #[default]
    AcceptAll,
    /// No target; every open is refused.
    DenyAll,
    /// Only targets matching one of the rules.
    Allow(Vec<TargetRule>),
}

impl ForwardingFilter {
    /// Check whether forwarding to `host:port` is permitted.
    pub fn permits(&self, host: &str, port: u16) -> bool {
        match self {
            ForwardingFilter::AcceptAll => true,
            ForwardingFilter::DenyAll => false,
            ForwardingFilter::Allow(rules) => rules.iter().any(|r| r.matches(host, port)),
        }
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Limits and policy for the target side.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Which targets may be reached.
    pub filter: ForwardingFilter,
    /// Maximum concurrent forwarded connections.
    pub max_forwards: usize,
    /// How long to wait for the TCP connect to a target.
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            filter: ForwardingFilter::AcceptAll,
            max_forwards: DEFAULT_MAX_FORWARDS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the forwarding filter.
    pub fn with_filter(mut self, filter: ForwardingFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the maximum concurrent forwards.
    pub fn with_max_forwards(mut self, max: usize) -> Self {
        self.max_forwards = max;
        self
    }

    /// Set the target connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.filter, ForwardingFilter::AcceptAll);
        assert_eq!(config.max_forwards, DEFAULT_MAX_FORWARDS);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new()
            .with_filter(ForwardingFilter::DenyAll)
            .with_max_forwards(2)
            .with_connect_timeout(Duration::from_secs(1));
        assert_eq!(config.filter, ForwardingFilter::DenyAll);
        assert_eq!(config.max_forwards, 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_target_rule_parse() {
        let rule: TargetRule = "db.internal:5432".parse().unwrap();
        assert_eq!(rule.host, "db.internal");
        assert_eq!(rule.port, Some(5432));

        let rule: TargetRule = "localhost:*".parse().unwrap();
        assert_eq!(rule.port, None);
        assert_eq!(rule.to_string(), "localhost:*");

        let rule: TargetRule = "[::1]:80".parse().unwrap();
        assert_eq!(rule.host, "::1");

        assert!("no-port".parse::<TargetRule>().is_err());
        assert!(":80".parse::<TargetRule>().is_err());
        assert!("host:http".parse::<TargetRule>().is_err());
    }

    #[test]
    fn test_filter_permits() {
        assert!(ForwardingFilter::AcceptAll.permits("anything", 1));
        assert!(!ForwardingFilter::DenyAll.permits("localhost", 80));

        let filter = ForwardingFilter::Allow(vec![
            "db.internal:5432".parse().unwrap(),
            "LOCALHOST:*".parse().unwrap(),
        ]);
        assert!(filter.permits("db.internal", 5432));
        assert!(!filter.permits("db.internal", 5433));
        assert!(filter.permits("localhost", 8080));
        assert!(!filter.permits("example.com", 80));
    }
}
