//! Session multiplexer.
//!
//! A [`Session`] owns the channels of one link. Two background tasks drive
//! it:
//! - the reader dispatches inbound messages to channels (data, window
//!   adjusts, EOF, close) and to pending opens (accept, reject), and queues
//!   peer-initiated opens for [`Session::accept_channel`]
//! - the writer drains the outbound queue shared by every channel onto the
//!   link
//!
//! When the link ends, the peer disconnects, or [`Session::close`] is called,
//! every channel is torn down and the disconnect callbacks run once.

mod incoming;

pub use incoming::IncomingChannel;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelWindows};
use crate::config::SessionConfig;
use crate::connection::ChannelMap;
use crate::constants::INCOMING_CHANNEL_BACKLOG;
use crate::protocol::{
    ChannelAcceptPayload, ChannelCloseReason, ChannelClosePayload, ChannelId, ChannelOpenPayload,
    ChannelParams, ChannelRejectCode, ChannelRejectPayload, ChannelSide, DisconnectPayload,
    DisconnectReason, Message,
};
use crate::transport::{Link, LinkReceiver, LinkSender};
use crate::{Error, Result};

type DisconnectCallback = Box<dyn FnOnce() + Send + 'static>;

/// Answer to a channel open we initiated.
enum OpenOutcome {
    Accepted(Channel),
    Rejected {
        code: ChannelRejectCode,
        message: String,
    },
}

/// A channel open we sent and have not had an answer for.
struct PendingOpen {
    params: ChannelParams,
    tx: oneshot::Sender<OpenOutcome>,
}

#[derive(Default)]
struct DisconnectCallbacks {
    fired: bool,
    list: Vec<DisconnectCallback>,
}

/// A multiplexed session over one link. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    /// Active channels keyed by ChannelId.
    channels: ChannelMap<Channel>,
    /// Opens we initiated, awaiting accept/reject.
    pending_opens: Mutex<HashMap<ChannelId, PendingOpen>>,
    /// Queue drained by the writer task.
    outbound: mpsc::UnboundedSender<Message>,
    /// Peer-initiated opens awaiting accept.
    incoming: Mutex<mpsc::Receiver<IncomingChannel>>,
    callbacks: std::sync::Mutex<DisconnectCallbacks>,
    /// Set when teardown starts.
    closing: AtomicBool,
    /// Set when teardown has finished.
    closed_tx: watch::Sender<bool>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("side", &self.side())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    /// Start a session over `link`.
    ///
    /// `side` decides which half of the channel ID space this end allocates
    /// from; the two ends of a link must use different sides. Must be called
    /// from within a tokio runtime.
    pub fn new<L: Link>(link: L, side: ChannelSide, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = link.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CHANNEL_BACKLOG);
        let (closed_tx, _) = watch::channel(false);

        let session = Self {
            inner: Arc::new(SessionInner {
                config,
                channels: ChannelMap::new(side),
                pending_opens: Mutex::new(HashMap::new()),
                outbound: outbound_tx,
                incoming: Mutex::new(incoming_rx),
                callbacks: std::sync::Mutex::new(DisconnectCallbacks::default()),
                closing: AtomicBool::new(false),
                closed_tx,
                reader_task: std::sync::Mutex::new(None),
            }),
        };

        tokio::spawn(write_loop(session.clone(), sender, outbound_rx));
        let reader = tokio::spawn(read_loop(session.clone(), receiver, incoming_tx));
        *session.lock_reader_task() = Some(reader);

        debug!(side = ?side, "Session started");
        Ok(session)
    }

    /// Which side of the link this is.
    pub fn side(&self) -> ChannelSide {
        self.inner.channels.side()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Number of channels not yet released.
    pub async fn channel_count(&self) -> usize {
        self.inner.channels.len().await
    }

    // =========================================================================
    // Channel Open
    // =========================================================================

    /// Open a channel to the peer and wait for its answer.
    ///
    /// Fails with [`Error::ChannelOpenRejected`] if the peer refuses,
    /// [`Error::Timeout`] if it does not answer within the configured open
    /// timeout, and [`Error::ConnectionClosed`] if the session ends first.
    pub async fn open_channel(&self, params: ChannelParams) -> Result<Channel> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        if self.inner.channels.len().await >= self.inner.config.max_channels {
            return Err(Error::ChannelOpenRejected {
                code: ChannelRejectCode::ResourceShortage,
                message: format!(
                    "local channel limit of {} reached",
                    self.inner.config.max_channels
                ),
            });
        }

        let channel_id = self.inner.channels.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending_opens.lock().await.insert(
            channel_id,
            PendingOpen {
                params: params.clone(),
                tx,
            },
        );

        // Teardown clears pending opens after setting the flag.
        if self.is_closed() {
            self.inner.pending_opens.lock().await.remove(&channel_id);
            return Err(Error::ConnectionClosed);
        }

        debug!(
            channel_id = %channel_id,
            target = %params.target(),
            "Opening channel"
        );

        let open = Message::ChannelOpen(ChannelOpenPayload {
            channel_id,
            params,
            initial_window: self.inner.config.window_size,
            max_packet_size: self.inner.config.max_packet_size,
        });
        if let Err(e) = self.send(open) {
            self.inner.pending_opens.lock().await.remove(&channel_id);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.config.open_timeout, rx).await {
            Ok(Ok(OpenOutcome::Accepted(channel))) => Ok(channel),
            Ok(Ok(OpenOutcome::Rejected { code, message })) => {
                debug!(channel_id = %channel_id, code = %code, "Channel open rejected");
                Err(Error::ChannelOpenRejected { code, message })
            }
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.inner.pending_opens.lock().await.remove(&channel_id);
                warn!(channel_id = %channel_id, "Channel open timed out");
                Err(Error::Timeout)
            }
        }
    }

    /// Wait for the next channel opened by the peer.
    ///
    /// Returns `None` once the session has ended.
    pub async fn accept_channel(&self) -> Option<IncomingChannel> {
        self.inner.incoming.lock().await.recv().await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register a callback to run once when the session ends.
    ///
    /// Runs immediately if the session has already ended.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.lock_callbacks();
            if !callbacks.fired {
                callbacks.list.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Disconnect from the peer and tear down every channel.
    ///
    /// Idempotent; returns once teardown has finished.
    pub async fn close(&self) {
        self.teardown(DisconnectReason::ByApplication, None, true)
            .await;
    }

    /// Wait until the session has ended.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Check if the session has ended or is ending.
    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn send(&self, msg: Message) -> Result<()> {
        self.inner
            .outbound
            .send(msg)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn outbound(&self) -> mpsc::UnboundedSender<Message> {
        self.inner.outbound.clone()
    }

    fn windows_for_peer(&self, peer_window: u32, peer_max_packet: u32) -> ChannelWindows {
        ChannelWindows {
            peer_window,
            peer_max_packet,
            local_window: self.inner.config.window_size,
            local_max_packet: self.inner.config.max_packet_size,
            max_buffered: self.inner.config.max_buffered,
        }
    }

    /// Track a newly established channel.
    ///
    /// Returns false (and terminates the channel) if the session is ending.
    async fn register_channel(&self, channel: &Channel) -> bool {
        self.inner.channels.insert(channel.id(), channel.clone()).await;
        if self.is_closed() {
            self.inner.channels.remove(&channel.id()).await;
            channel.terminate();
            return false;
        }
        true
    }

    /// Drop a channel once close has gone both ways.
    async fn release_if_done(&self, channel_id: ChannelId) {
        let Some(channel) = self.inner.channels.get(&channel_id).await else {
            return;
        };
        if channel.is_released() {
            self.inner.channels.remove(&channel_id).await;
            debug!(
                channel_id = %channel_id,
                sent = channel.bytes_sent(),
                received = channel.bytes_received(),
                "Channel released"
            );
        }
    }

    async fn dispatch(
        &self,
        msg: Message,
        incoming_tx: &mpsc::Sender<IncomingChannel>,
    ) -> Result<()> {
        trace!(kind = msg.kind(), "Received message");
        match msg {
            Message::ChannelOpen(payload) => self.handle_open(payload, incoming_tx).await,
            Message::ChannelAccept(payload) => {
                self.handle_accept(payload).await;
                Ok(())
            }
            Message::ChannelReject(payload) => {
                self.handle_reject(payload).await;
                Ok(())
            }
            Message::ChannelData(payload) => {
                let Some(channel) = self.lookup(payload.channel_id, "channel-data").await else {
                    return Ok(());
                };
                if let Err(e) = channel.on_data(payload.data) {
                    warn!(
                        channel_id = %payload.channel_id,
                        error = %e,
                        "Closing misbehaving channel"
                    );
                    channel.close_with(ChannelCloseReason::Error {
                        message: e.to_string(),
                    });
                }
                Ok(())
            }
            Message::WindowAdjust(payload) => {
                if let Some(channel) = self.lookup(payload.channel_id, "window-adjust").await {
                    channel.on_window_adjust(payload.bytes_to_add);
                }
                Ok(())
            }
            Message::ChannelEof(payload) => {
                if let Some(channel) = self.lookup(payload.channel_id, "channel-eof").await {
                    channel.on_eof();
                }
                Ok(())
            }
            Message::ChannelClose(payload) => {
                if let Some(channel) = self.lookup(payload.channel_id, "channel-close").await {
                    debug!(
                        channel_id = %payload.channel_id,
                        reason = %payload.reason,
                        "Peer closed channel"
                    );
                    channel.on_close();
                    self.release_if_done(payload.channel_id).await;
                }
                Ok(())
            }
            // Handled by the read loop.
            Message::Disconnect(_) => Ok(()),
        }
    }

    async fn lookup(&self, channel_id: ChannelId, kind: &'static str) -> Option<Channel> {
        let channel = self.inner.channels.get(&channel_id).await;
        if channel.is_none() {
            debug!(channel_id = %channel_id, kind, "Message for unknown channel");
        }
        channel
    }

    async fn handle_open(
        &self,
        payload: ChannelOpenPayload,
        incoming_tx: &mpsc::Sender<IncomingChannel>,
    ) -> Result<()> {
        let channel_id = payload.channel_id;
        if channel_id.side == self.side() || self.inner.channels.contains(&channel_id).await {
            return Err(Error::Protocol {
                message: format!("peer opened channel with invalid id {}", channel_id),
            });
        }

        let incoming = IncomingChannel::new(self.clone(), payload);

        if self.inner.channels.len().await >= self.inner.config.max_channels {
            incoming.reject(ChannelRejectCode::ResourceShortage, "too many channels");
            return Ok(());
        }

        if let Err(e) = incoming_tx.try_send(incoming) {
            let incoming = match e {
                mpsc::error::TrySendError::Full(incoming) => incoming,
                mpsc::error::TrySendError::Closed(incoming) => incoming,
            };
            incoming.reject(ChannelRejectCode::ResourceShortage, "accept backlog full");
        }
        Ok(())
    }

    async fn handle_accept(&self, payload: ChannelAcceptPayload) {
        let channel_id = payload.channel_id;
        let Some(pending) = self.inner.pending_opens.lock().await.remove(&channel_id) else {
            // Opener gave up; let the peer release its end.
            debug!(channel_id = %channel_id, "Accept for abandoned open");
            let _ = self.send(Message::ChannelClose(ChannelClosePayload {
                channel_id,
                reason: ChannelCloseReason::Normal,
            }));
            return;
        };

        let windows = self.windows_for_peer(payload.initial_window, payload.max_packet_size);
        let channel = Channel::new(channel_id, pending.params, windows, self.outbound());
        if !self.register_channel(&channel).await {
            return;
        }

        debug!(channel_id = %channel_id, "Channel open accepted");
        // The opener gave up (timeout) after the peer accepted.
        if let Err(OpenOutcome::Accepted(channel)) =
            pending.tx.send(OpenOutcome::Accepted(channel))
        {
            channel.close();
        }
    }

    async fn handle_reject(&self, payload: ChannelRejectPayload) {
        match self.inner.pending_opens.lock().await.remove(&payload.channel_id) {
            Some(pending) => {
                let _ = pending.tx.send(OpenOutcome::Rejected {
                    code: payload.code,
                    message: payload.message,
                });
            }
            None => debug!(channel_id = %payload.channel_id, "Reject for abandoned open"),
        }
    }

    /// Tear everything down. The first caller does the work; later callers
    /// wait for it to finish.
    async fn teardown(
        &self,
        reason: DisconnectReason,
        message: Option<String>,
        abort_reader: bool,
    ) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            self.closed().await;
            return;
        }

        info!(side = ?self.side(), reason = ?reason, "Session closing");

        // Also stops the writer once flushed.
        let _ = self.send(Message::Disconnect(DisconnectPayload { reason, message }));

        if abort_reader {
            if let Some(reader) = self.lock_reader_task().take() {
                reader.abort();
            }
        }

        for (channel_id, channel) in self.inner.channels.drain().await {
            trace!(channel_id = %channel_id, "Terminating channel");
            channel.terminate();
        }
        self.inner.pending_opens.lock().await.clear();

        // Queued opens hold a session handle; reject them now.
        if let Ok(mut incoming) = self.inner.incoming.try_lock() {
            while let Ok(pending) = incoming.try_recv() {
                drop(pending);
            }
        }

        let callbacks = {
            let mut callbacks = self.lock_callbacks();
            callbacks.fired = true;
            std::mem::take(&mut callbacks.list)
        };
        for callback in callbacks {
            callback();
        }

        self.inner.closed_tx.send_replace(true);
        debug!(side = ?self.side(), "Session closed");
    }

    fn lock_callbacks(&self) -> std::sync::MutexGuard<'_, DisconnectCallbacks> {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn lock_reader_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

async fn read_loop<R: LinkReceiver>(
    session: Session,
    mut receiver: R,
    incoming_tx: mpsc::Sender<IncomingChannel>,
) {
    let (reason, message) = loop {
        let msg = match receiver.recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!("Link closed by peer");
                break (DisconnectReason::ByApplication, None);
            }
            Err(e) => {
                warn!(error = %e, "Link receive failed");
                break (DisconnectReason::ByApplication, None);
            }
        };

        if let Message::Disconnect(payload) = &msg {
            info!(
                reason = ?payload.reason,
                message = ?payload.message,
                "Peer disconnected"
            );
            break (DisconnectReason::ByApplication, None);
        }

        if let Err(e) = session.dispatch(msg, &incoming_tx).await {
            warn!(error = %e, "Protocol violation, disconnecting");
            break (DisconnectReason::ProtocolError, Some(e.to_string()));
        }
    };

    drop(incoming_tx);
    session.teardown(reason, message, false).await;
}

async fn write_loop<S: LinkSender>(
    session: Session,
    mut sender: S,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outbound.recv().await {
        let is_disconnect = matches!(msg, Message::Disconnect(_));
        let closing = match &msg {
            Message::ChannelClose(payload) => Some(payload.channel_id),
            _ => None,
        };

        trace!(kind = msg.kind(), "Sending message");
        if let Err(e) = sender.send(msg).await {
            if !is_disconnect {
                debug!(error = %e, "Link send failed");
                session
                    .teardown(DisconnectReason::ByApplication, None, true)
                    .await;
            }
            break;
        }

        if is_disconnect {
            break;
        }
        if let Some(channel_id) = closing {
            session.release_if_done(channel_id).await;
        }
    }
}
