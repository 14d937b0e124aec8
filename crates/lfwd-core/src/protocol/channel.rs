//! Channel identification and type definitions.
//!
//! This module provides:
//! - Channel side discrimination (forwarding side vs target side initiated)
//! - Channel type definitions

use serde::{Deserialize, Serialize};

// =============================================================================
// Channel Identification Types
// =============================================================================

/// Which side initiated the channel.
///
/// Both ends of a session may open channels. To avoid ID collisions and make
/// the initiator explicit, channel IDs include a side discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelSide {
    /// Opened by the client (the side running local forward listeners).
    Client,
    /// Opened by the server (the side that connects to forward targets).
    Server,
}

/// Unique channel identifier within a session.
///
/// Each side allocates from its own namespace:
/// - Client assigns `ChannelId::client(n)` starting from 0
/// - Server assigns `ChannelId::server(n)` starting from 0
/// - `(Client, 5)` and `(Server, 5)` are distinct channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub side: ChannelSide,
    pub id: u64,
}

impl ChannelId {
    /// Create a client-initiated channel ID.
    pub fn client(id: u64) -> Self {
        Self {
            side: ChannelSide::Client,
            id,
        }
    }

    /// Create a server-initiated channel ID.
    pub fn server(id: u64) -> Self {
        Self {
            side: ChannelSide::Server,
            id,
        }
    }

    /// Check if this is a client-initiated channel.
    pub fn is_client(&self) -> bool {
        matches!(self.side, ChannelSide::Client)
    }

    /// Check if this is a server-initiated channel.
    pub fn is_server(&self) -> bool {
        matches!(self.side, ChannelSide::Server)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.side {
            ChannelSide::Client => "c",
            ChannelSide::Server => "s",
        };
        write!(f, "{}{}", prefix, self.id)
    }
}

// =============================================================================
// Channel Types
// =============================================================================

/// Channel types supported by lfwd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    /// Local port forward (-L): client listens, server connects to target.
    DirectTcpIp,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::DirectTcpIp => write!(f, "direct-tcpip"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_sides() {
        assert!(ChannelId::client(1).is_client());
        assert!(!ChannelId::client(1).is_server());
        assert!(ChannelId::server(1).is_server());
        assert_ne!(ChannelId::client(5), ChannelId::server(5));
    }

    #[test]
    fn test_channel_id_display() {
        assert_eq!(ChannelId::client(5).to_string(), "c5");
        assert_eq!(ChannelId::server(10).to_string(), "s10");
    }

    #[test]
    fn test_channel_type_display() {
        assert_eq!(ChannelType::DirectTcpIp.to_string(), "direct-tcpip");
    }
}
