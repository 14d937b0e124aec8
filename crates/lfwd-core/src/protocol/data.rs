//! Channel data and flow control payloads.

use serde::{Deserialize, Serialize};

use super::channel::ChannelId;

/// A chunk of stream data on a channel.
///
/// The sender must hold at least `data.len()` bytes of credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDataPayload {
    pub channel_id: ChannelId,
    pub data: Vec<u8>,
}

/// Grant the peer additional send credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAdjustPayload {
    pub channel_id: ChannelId,
    /// Bytes to add to the peer's window.
    pub bytes_to_add: u32,
}
