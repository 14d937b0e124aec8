//! Channel lifecycle payloads.
//!
//! Open/accept/reject/close messages, their parameters, and reason codes.

use serde::{Deserialize, Serialize};

use super::channel::{ChannelId, ChannelType};

// =============================================================================
// Channel Parameters
// =============================================================================

/// Parameters for a direct-tcpip (local forward) channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectTcpIpParams {
    /// Host the peer should connect to.
    pub target_host: String,
    /// Port the peer should connect to.
    pub target_port: u16,
    /// Address of the local connection that triggered the open.
    pub originator_host: String,
    /// Port of the local connection that triggered the open.
    pub originator_port: u16,
}

/// Type-specific parameters carried in a channel open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelParams {
    DirectTcpIp(DirectTcpIpParams),
}

impl ChannelParams {
    /// Get the channel type for these parameters.
    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelParams::DirectTcpIp(_) => ChannelType::DirectTcpIp,
        }
    }

    /// Target as `host:port`, for logging.
    pub fn target(&self) -> String {
        match self {
            ChannelParams::DirectTcpIp(p) => format!("{}:{}", p.target_host, p.target_port),
        }
    }
}

// =============================================================================
// Channel Lifecycle Payloads
// =============================================================================

/// Request to open a new channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelOpenPayload {
    /// Channel ID assigned by the initiating side.
    pub channel_id: ChannelId,
    /// Channel type and parameters.
    pub params: ChannelParams,
    /// Credit the initiator grants the peer to start with.
    pub initial_window: u32,
    /// Largest data payload the initiator accepts per message.
    pub max_packet_size: u32,
}

/// Accept a channel open request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAcceptPayload {
    /// Channel ID being accepted.
    pub channel_id: ChannelId,
    /// Credit the acceptor grants the initiator to start with.
    pub initial_window: u32,
    /// Largest data payload the acceptor accepts per message.
    pub max_packet_size: u32,
}

/// Reject a channel open request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRejectPayload {
    /// Channel ID being rejected.
    pub channel_id: ChannelId,
    /// Rejection code.
    pub code: ChannelRejectCode,
    /// Human-readable rejection message.
    pub message: String,
}

/// Channel rejection reasons (SSH-compatible codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRejectCode {
    /// Administrative prohibition (forwarding filter).
    AdministrativelyProhibited,
    /// Target unreachable.
    ConnectFailed,
    /// Unknown channel type.
    UnknownChannelType,
    /// Resource limit (too many channels or forwards).
    ResourceShortage,
}

impl ChannelRejectCode {
    /// The SSH reason code (RFC 4254 section 5.1).
    pub fn as_u32(&self) -> u32 {
        match self {
            ChannelRejectCode::AdministrativelyProhibited => 1,
            ChannelRejectCode::ConnectFailed => 2,
            ChannelRejectCode::UnknownChannelType => 3,
            ChannelRejectCode::ResourceShortage => 4,
        }
    }
}

impl std::fmt::Display for ChannelRejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRejectCode::AdministrativelyProhibited => {
                write!(f, "administratively prohibited")
            }
            ChannelRejectCode::ConnectFailed => write!(f, "connect failed"),
            ChannelRejectCode::UnknownChannelType => write!(f, "unknown channel type"),
            ChannelRejectCode::ResourceShortage => write!(f, "resource shortage"),
        }
    }
}

/// Signals that the sender will send no more data on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEofPayload {
    pub channel_id: ChannelId,
}

/// Close a channel.
///
/// SSH-style close handshake: each side sends exactly one close. A channel
/// is released once a close has been both sent and received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelClosePayload {
    /// Channel ID being closed.
    pub channel_id: ChannelId,
    /// Reason for closing.
    pub reason: ChannelCloseReason,
}

/// Reason for channel close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelCloseReason {
    /// Both directions finished normally.
    Normal,
    /// A socket on either end failed.
    ConnectionClosed,
    /// Error occurred.
    Error { message: String },
}

impl std::fmt::Display for ChannelCloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelCloseReason::Normal => write!(f, "normal"),
            ChannelCloseReason::ConnectionClosed => write!(f, "connection closed"),
            ChannelCloseReason::Error { message } => write!(f, "error: {}", message),
        }
    }
}

// =============================================================================
// Session Lifecycle
// =============================================================================

/// Orderly end of a whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectPayload {
    pub reason: DisconnectReason,
    pub message: Option<String>,
}

/// Why a session is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Local user or application asked to close.
    ByApplication,
    /// Peer violated the protocol.
    ProtocolError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_code_display() {
        assert_eq!(
            ChannelRejectCode::AdministrativelyProhibited.to_string(),
            "administratively prohibited"
        );
        assert_eq!(ChannelRejectCode::ConnectFailed.to_string(), "connect failed");
        assert_eq!(
            ChannelRejectCode::UnknownChannelType.to_string(),
            "unknown channel type"
        );
        assert_eq!(
            ChannelRejectCode::ResourceShortage.to_string(),
            "resource shortage"
        );
    }

    #[test]
    fn test_reject_code_ssh_values() {
        assert_eq!(ChannelRejectCode::AdministrativelyProhibited.as_u32(), 1);
        assert_eq!(ChannelRejectCode::ConnectFailed.as_u32(), 2);
        assert_eq!(ChannelRejectCode::UnknownChannelType.as_u32(), 3);
        assert_eq!(ChannelRejectCode::ResourceShortage.as_u32(), 4);
    }

    #[test]
    fn test_params_target() {
        let params = ChannelParams::DirectTcpIp(DirectTcpIpParams {
            target_host: "db.internal".into(),
            target_port: 5432,
            originator_host: "127.0.0.1".into(),
            originator_port: 40000,
        });
        assert_eq!(params.channel_type(), ChannelType::DirectTcpIp);
        assert_eq!(params.target(), "db.internal:5432");
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(ChannelCloseReason::Normal.to_string(), "normal");
        assert_eq!(
            ChannelCloseReason::Error {
                message: "boom".into()
            }
            .to_string(),
            "error: boom"
        );
    }
}
