//! Top-level protocol message enum.

use serde::{Deserialize, Serialize};

use super::{
    ChannelAcceptPayload, ChannelClosePayload, ChannelDataPayload, ChannelEofPayload, ChannelId,
    ChannelOpenPayload, ChannelRejectPayload, DisconnectPayload, WindowAdjustPayload,
};

/// Top-level protocol message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // =========================================================================
    // Session-level messages
    // =========================================================================
    /// Orderly session shutdown.
    Disconnect(DisconnectPayload),

    // =========================================================================
    // Channel lifecycle messages
    // =========================================================================
    /// Request to open a new channel.
    ChannelOpen(ChannelOpenPayload),
    /// Accept a channel open request.
    ChannelAccept(ChannelAcceptPayload),
    /// Reject a channel open request.
    ChannelReject(ChannelRejectPayload),
    /// No more data will be sent on a channel.
    ChannelEof(ChannelEofPayload),
    /// Close a channel.
    ChannelClose(ChannelClosePayload),

    // =========================================================================
    // Channel data and flow control
    // =========================================================================
    /// Stream data.
    ChannelData(ChannelDataPayload),
    /// Additional send credit for the receiver of this message.
    WindowAdjust(WindowAdjustPayload),
}

impl Message {
    /// The channel this message refers to, if any.
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Message::Disconnect(_) => None,
            Message::ChannelOpen(p) => Some(p.channel_id),
            Message::ChannelAccept(p) => Some(p.channel_id),
            Message::ChannelReject(p) => Some(p.channel_id),
            Message::ChannelEof(p) => Some(p.channel_id),
            Message::ChannelClose(p) => Some(p.channel_id),
            Message::ChannelData(p) => Some(p.channel_id),
            Message::WindowAdjust(p) => Some(p.channel_id),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Disconnect(_) => "disconnect",
            Message::ChannelOpen(_) => "channel-open",
            Message::ChannelAccept(_) => "channel-accept",
            Message::ChannelReject(_) => "channel-reject",
            Message::ChannelEof(_) => "channel-eof",
            Message::ChannelClose(_) => "channel-close",
            Message::ChannelData(_) => "channel-data",
            Message::WindowAdjust(_) => "window-adjust",
        }
    }
}
