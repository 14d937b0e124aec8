//! Peer-initiated channel opens.

use tracing::debug;

use super::Session;
use crate::channel::Channel;
use crate::protocol::{
    ChannelAcceptPayload, ChannelId, ChannelOpenPayload, ChannelParams, ChannelRejectCode,
    ChannelRejectPayload, Message,
};
use crate::{Error, Result};

/// A channel open from the peer, waiting for an answer.
///
/// Dropping it without calling [`accept`](Self::accept) or
/// [`reject`](Self::reject) rejects the open.
pub struct IncomingChannel {
    session: Session,
    channel_id: ChannelId,
    params: ChannelParams,
    peer_window: u32,
    peer_max_packet: u32,
    answered: bool,
}

impl std::fmt::Debug for IncomingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingChannel")
            .field("channel_id", &self.channel_id)
            .field("params", &self.params)
            .finish()
    }
}

impl IncomingChannel {
    pub(super) fn new(session: Session, payload: ChannelOpenPayload) -> Self {
        Self {
            session,
            channel_id: payload.channel_id,
            params: payload.params,
            peer_window: payload.initial_window,
            peer_max_packet: payload.max_packet_size,
            answered: false,
        }
    }

    /// Channel ID chosen by the peer.
    pub fn id(&self) -> ChannelId {
        self.channel_id
    }

    /// What the peer asked for.
    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    /// Accept the open and return the established channel.
    pub async fn accept(mut self) -> Result<Channel> {
        self.answered = true;
        if self.session.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let windows = self
            .session
            .windows_for_peer(self.peer_window, self.peer_max_packet);
        let channel = Channel::new(
            self.channel_id,
            self.params.clone(),
            windows,
            self.session.outbound(),
        );
        if !self.session.register_channel(&channel).await {
            return Err(Error::ConnectionClosed);
        }

        let config = self.session.config();
        self.session
            .send(Message::ChannelAccept(ChannelAcceptPayload {
                channel_id: self.channel_id,
                initial_window: config.window_size,
                max_packet_size: config.max_packet_size,
            }))?;

        debug!(channel_id = %self.channel_id, target = %self.params.target(), "Accepted channel");
        Ok(channel)
    }

    /// Refuse the open.
    pub fn reject(mut self, code: ChannelRejectCode, message: impl Into<String>) {
        self.answered = true;
        self.send_reject(code, message.into());
    }

    fn send_reject(&self, code: ChannelRejectCode, message: String) {
        debug!(
            channel_id = %self.channel_id,
            code = %code,
            message = %message,
            "Rejecting channel"
        );
        // Nothing to tell a peer that is already gone.
        let _ = self
            .session
            .send(Message::ChannelReject(ChannelRejectPayload {
                channel_id: self.channel_id,
                code,
                message,
            }));
    }
}

impl Drop for IncomingChannel {
    fn drop(&mut self) {
        if !self.answered {
            self.send_reject(
                ChannelRejectCode::AdministrativelyProhibited,
                "channel not accepted".to_string(),
            );
        }
    }
}
