//! Logical channel handle.
//!
//! A [`Channel`] is one bidirectional byte stream multiplexed over a
//! [`Session`](crate::Session). Outbound data is checked against the send
//! window and queued to the session writer. Inbound data is fed in by the
//! session reader through the `on_*` handlers, accepted into the inbound
//! buffer, and credited back to the peer based on buffer occupancy.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::flow::{InboundBuffer, ReceiveWindow, SendWindow};
use crate::protocol::{
    ChannelCloseReason, ChannelClosePayload, ChannelDataPayload, ChannelEofPayload, ChannelId,
    ChannelParams, Message, WindowAdjustPayload,
};
use crate::{Error, Result};

/// Window sizes negotiated when a channel is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelWindows {
    /// Credit the peer granted us.
    pub peer_window: u32,
    /// Largest data payload the peer accepts.
    pub peer_max_packet: u32,
    /// Credit we grant the peer.
    pub local_window: u32,
    /// Largest data payload we advertised.
    pub local_max_packet: u32,
    /// Inbound buffer plus outstanding credit limit.
    pub max_buffered: usize,
}

/// Handle to an open channel. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: ChannelId,
    params: ChannelParams,
    outbound: mpsc::UnboundedSender<Message>,
    peer_max_packet: u32,
    local_max_packet: u32,
    send_window: SendWindow,
    recv_window: Mutex<ReceiveWindow>,
    buffer: InboundBuffer,
    eof_sent: AtomicBool,
    close_sent: AtomicBool,
    close_received: AtomicBool,
    closed_tx: watch::Sender<bool>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("target", &self.inner.params.target())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        id: ChannelId,
        params: ChannelParams,
        windows: ChannelWindows,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ChannelInner {
                id,
                params,
                outbound,
                peer_max_packet: windows.peer_max_packet.max(1),
                local_max_packet: windows.local_max_packet,
                send_window: SendWindow::new(windows.peer_window),
                recv_window: Mutex::new(ReceiveWindow::new(
                    windows.local_window,
                    windows.max_buffered,
                )),
                buffer: InboundBuffer::new(),
                eof_sent: AtomicBool::new(false),
                close_sent: AtomicBool::new(false),
                close_received: AtomicBool::new(false),
                closed_tx,
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
            }),
        }
    }

    /// Channel ID.
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Parameters the channel was opened with.
    pub fn params(&self) -> &ChannelParams {
        &self.inner.params
    }

    /// Largest payload the peer accepts per data message.
    pub fn max_packet_size(&self) -> u32 {
        self.inner.peer_max_packet
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Whether `n` bytes could be sent right now without waiting.
    pub fn can_send(&self, n: usize) -> bool {
        self.inner.send_window.can_send(n)
    }

    /// Current send credit.
    pub fn send_credit(&self) -> u32 {
        self.inner.send_window.available()
    }

    /// Wait until the peer has granted credit, returning at most `max`
    /// bytes (and never more than one packet).
    pub async fn wait_send_credit(&self, max: u32) -> Result<u32> {
        let max = max.min(self.inner.peer_max_packet);
        self.inner.send_window.wait_for_credit(max).await
    }

    /// Send data to the peer.
    ///
    /// The whole of `data` must fit in the current send credit; otherwise
    /// nothing is sent and [`Error::WindowExceeded`] is returned. Data is
    /// split into packets of at most the peer's maximum packet size.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.inner.eof_sent.load(Ordering::SeqCst) || self.is_local_closed() {
            return Err(Error::ChannelClosed);
        }

        self.inner.send_window.consume(data.len())?;

        for chunk in data.chunks(self.inner.peer_max_packet as usize) {
            self.enqueue(Message::ChannelData(ChannelDataPayload {
                channel_id: self.inner.id,
                data: chunk.to_vec(),
            }))?;
        }

        self.inner
            .bytes_sent
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        trace!(channel_id = %self.inner.id, len = data.len(), "Sent channel data");
        Ok(())
    }

    /// Tell the peer we will send no more data.
    ///
    /// Idempotent. A no-op once the channel is closed.
    pub fn send_eof(&self) -> Result<()> {
        if self.is_local_closed() || self.inner.eof_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(channel_id = %self.inner.id, "Sending channel EOF");
        self.enqueue(Message::ChannelEof(ChannelEofPayload {
            channel_id: self.inner.id,
        }))
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Read up to `max_len` bytes of inbound data.
    ///
    /// Suspends while nothing is buffered. Returns `Ok(None)` once the peer
    /// has sent EOF (or closed) and everything buffered has been read, and
    /// `Err(ChannelClosed)` if the channel was torn down.
    pub async fn read(&self, max_len: usize) -> Result<Option<Bytes>> {
        let data = self.inner.buffer.read(max_len).await?;
        if let Some(ref bytes) = data {
            self.inner
                .bytes_received
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            self.replenish();
        }
        Ok(data)
    }

    /// Bytes accepted from the peer but not yet read.
    pub fn buffered(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Credit currently granted to the peer and not yet used.
    pub fn receive_credit(&self) -> u32 {
        self.recv_window().outstanding()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the channel normally.
    pub fn close(&self) {
        self.close_with(ChannelCloseReason::Normal);
    }

    /// Close the channel with a reason. Idempotent.
    ///
    /// Pending sends and credit waiters fail; the inbound buffer is
    /// discarded. The channel is released by the session once the peer
    /// confirms the close.
    pub fn close_with(&self, reason: ChannelCloseReason) {
        if self.inner.close_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(channel_id = %self.inner.id, reason = %reason, "Closing channel");

        self.inner.send_window.close();
        self.inner.buffer.abort();
        self.inner.closed_tx.send_replace(true);

        // The session may already be gone; nothing left to notify then.
        let _ = self.enqueue(Message::ChannelClose(ChannelClosePayload {
            channel_id: self.inner.id,
            reason,
        }));
    }

    /// Wait until the channel is closed by either side.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        // Sender lives as long as the channel, so this only returns once the
        // flag is set.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Check if either side has closed the channel.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    /// Total bytes sent to the peer.
    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes read out of the inbound buffer.
    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Transport-facing handlers (called by the session reader)
    // =========================================================================

    /// Accept a data message from the peer.
    ///
    /// Never blocks. Fails if the peer sent a message larger than the packet
    /// size we advertised, more than the credit we granted, or data after
    /// EOF. A rejected message leaves the receive credit untouched.
    pub fn on_data(&self, data: Vec<u8>) -> Result<()> {
        if self.is_local_closed() {
            // Late data for a channel we already closed.
            return Ok(());
        }

        if data.len() > self.inner.local_max_packet as usize {
            return Err(Error::Protocol {
                message: format!(
                    "{}-byte data message exceeds max packet size {} on channel {}",
                    data.len(),
                    self.inner.local_max_packet,
                    self.inner.id
                ),
            });
        }

        let grant = {
            let mut window = self.recv_window();
            if self.inner.buffer.is_finished() {
                return Err(Error::Protocol {
                    message: format!("data after EOF on channel {}", self.inner.id),
                });
            }
            window.on_data(data.len())?;
            if !self.inner.buffer.append(Bytes::from(data)) {
                // Aborted by a concurrent local close.
                return Ok(());
            }
            window.replenish(self.inner.buffer.len())
        };

        if let Some(bytes_to_add) = grant {
            self.send_window_adjust(bytes_to_add);
        }
        Ok(())
    }

    /// Apply a window adjust from the peer.
    pub fn on_window_adjust(&self, bytes_to_add: u32) {
        trace!(channel_id = %self.inner.id, bytes_to_add, "Peer granted credit");
        self.inner.send_window.on_peer_grant(bytes_to_add);
    }

    /// The peer will send no more data.
    pub fn on_eof(&self) {
        debug!(channel_id = %self.inner.id, "Peer sent EOF");
        self.inner.buffer.finish();
    }

    /// The peer closed the channel.
    ///
    /// Buffered data stays readable; sending stops.
    pub fn on_close(&self) {
        self.inner.close_received.store(true, Ordering::SeqCst);
        self.inner.buffer.finish();
        self.inner.send_window.close();
        self.inner.closed_tx.send_replace(true);
    }

    /// Tear the channel down without a handshake (session gone).
    ///
    /// Wakes the reader with an error and any credit waiter.
    pub(crate) fn terminate(&self) {
        self.inner.close_sent.store(true, Ordering::SeqCst);
        self.inner.close_received.store(true, Ordering::SeqCst);
        self.inner.buffer.abort();
        self.inner.send_window.close();
        self.inner.closed_tx.send_replace(true);
    }

    /// Close has been both sent and received.
    pub(crate) fn is_released(&self) -> bool {
        self.inner.close_sent.load(Ordering::SeqCst)
            && self.inner.close_received.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn is_local_closed(&self) -> bool {
        self.inner.close_sent.load(Ordering::SeqCst)
    }

    fn recv_window(&self) -> MutexGuard<'_, ReceiveWindow> {
        self.inner
            .recv_window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn replenish(&self) {
        let grant = self.recv_window().replenish(self.inner.buffer.len());
        if let Some(bytes_to_add) = grant {
            self.send_window_adjust(bytes_to_add);
        }
    }

    fn send_window_adjust(&self, bytes_to_add: u32) {
        if self.inner.close_received.load(Ordering::SeqCst) || self.is_local_closed() {
            return;
        }
        trace!(channel_id = %self.inner.id, bytes_to_add, "Granting credit");
        if let Err(e) = self.enqueue(Message::WindowAdjust(WindowAdjustPayload {
            channel_id: self.inner.id,
            bytes_to_add,
        })) {
            warn!(channel_id = %self.inner.id, error = %e, "Failed to send window adjust");
        }
    }

    fn enqueue(&self, msg: Message) -> Result<()> {
        self.inner
            .outbound
            .send(msg)
            .map_err(|_| Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DirectTcpIpParams;

    fn params() -> ChannelParams {
        ChannelParams::DirectTcpIp(DirectTcpIpParams {
            target_host: "127.0.0.1".to_string(),
            target_port: 9000,
            originator_host: "127.0.0.1".to_string(),
            originator_port: 50000,
        })
    }

    const LOCAL_MAX_PACKET: u32 = 128;

    fn channel(
        peer_window: u32,
        peer_max_packet: u32,
        local_window: u32,
        max_buffered: usize,
    ) -> (Channel, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let windows = ChannelWindows {
            peer_window,
            peer_max_packet,
            local_window,
            local_max_packet: LOCAL_MAX_PACKET,
            max_buffered,
        };
        (Channel::new(ChannelId::client(0), params(), windows, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn granted(messages: &[Message]) -> u32 {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::WindowAdjust(p) => Some(p.bytes_to_add),
                _ => None,
            })
            .sum()
    }

    #[test]
    fn send_splits_into_packets() {
        let (ch, mut rx) = channel(100, 4, 100, 200);
        ch.send(b"abcdefghij").unwrap();

        let sizes: Vec<usize> = drain(&mut rx)
            .into_iter()
            .map(|m| match m {
                Message::ChannelData(p) => p.data.len(),
                other => panic!("unexpected {}", other.kind()),
            })
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(ch.send_credit(), 90);
        assert_eq!(ch.bytes_sent(), 10);
    }

    #[test]
    fn send_beyond_credit_transmits_nothing() {
        let (ch, mut rx) = channel(5, 32, 100, 200);
        let err = ch.send(b"too long").unwrap_err();
        assert!(matches!(err, Error::WindowExceeded { requested: 8, available: 5 }));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(ch.send_credit(), 5);
    }

    #[test]
    fn send_after_eof_fails() {
        let (ch, mut rx) = channel(100, 32, 100, 200);
        ch.send_eof().unwrap();
        ch.send_eof().unwrap();
        assert!(matches!(ch.send(b"x"), Err(Error::ChannelClosed)));

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind(), "channel-eof");
    }

    #[tokio::test]
    async fn data_is_credited_on_arrival_not_on_read() {
        let (ch, mut rx) = channel(100, 32, 100, 400);

        // Peer uses 60 of 100: outstanding 40 <= low water 50, top up to 100.
        ch.on_data(vec![1; 60]).unwrap();
        assert_eq!(granted(&drain(&mut rx)), 60);
        assert_eq!(ch.receive_credit(), 100);
        assert_eq!(ch.buffered(), 60);

        // Nobody has read yet, more arrives and is still credited.
        ch.on_data(vec![2; 100]).unwrap();
        assert_eq!(granted(&drain(&mut rx)), 100);
        assert_eq!(ch.buffered(), 160);

        let first = ch.read(1000).await.unwrap().unwrap();
        assert_eq!(first.len(), 60);
        assert_eq!(ch.bytes_received(), 60);
    }

    #[tokio::test]
    async fn credit_withheld_until_buffer_drains() {
        // max_buffered == window: no credit while the buffer holds data.
        let (ch, mut rx) = channel(100, 32, 100, 100);

        ch.on_data(vec![7; 100]).unwrap();
        assert_eq!(granted(&drain(&mut rx)), 0);
        assert_eq!(ch.receive_credit(), 0);

        // Peer oversending now is a protocol violation and nothing is lost.
        assert!(matches!(ch.on_data(vec![0; 1]), Err(Error::Protocol { .. })));
        assert_eq!(ch.buffered(), 100);

        let got = ch.read(100).await.unwrap().unwrap();
        assert_eq!(got.len(), 100);
        assert_eq!(granted(&drain(&mut rx)), 100);
        assert_eq!(ch.receive_credit(), 100);
    }

    #[tokio::test]
    async fn eof_after_drain() {
        let (ch, _rx) = channel(100, 32, 100, 200);
        ch.on_data(b"tail".to_vec()).unwrap();
        ch.on_eof();

        assert_eq!(ch.read(16).await.unwrap().unwrap(), &b"tail"[..]);
        assert_eq!(ch.read(16).await.unwrap(), None);
        assert!(matches!(ch.on_data(b"late".to_vec()), Err(Error::Protocol { .. })));
    }

    #[test]
    fn oversized_data_message_is_rejected_without_consuming_credit() {
        let (ch, mut rx) = channel(100, 32, 400, 800);

        let err = ch.on_data(vec![0; LOCAL_MAX_PACKET as usize + 1]).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(ch.receive_credit(), 400);
        assert_eq!(ch.buffered(), 0);
        assert!(drain(&mut rx).is_empty());

        // Exactly the advertised size is fine.
        ch.on_data(vec![0; LOCAL_MAX_PACKET as usize]).unwrap();
        assert_eq!(ch.receive_credit(), 400 - LOCAL_MAX_PACKET);
    }

    #[test]
    fn data_after_eof_keeps_receive_credit() {
        let (ch, _rx) = channel(100, 32, 100, 200);
        ch.on_data(b"tail".to_vec()).unwrap();
        ch.on_eof();
        let before = ch.receive_credit();

        assert!(matches!(ch.on_data(b"late".to_vec()), Err(Error::Protocol { .. })));
        assert_eq!(ch.receive_credit(), before);
        assert_eq!(ch.buffered(), 4);
    }

    #[tokio::test]
    async fn peer_close_keeps_buffered_data_readable() {
        let (ch, _rx) = channel(100, 32, 100, 200);
        ch.on_data(b"kept".to_vec()).unwrap();
        ch.on_close();

        assert!(ch.is_closed());
        assert!(!ch.is_released());
        assert!(matches!(ch.send(b"x"), Err(Error::ChannelClosed)));
        assert_eq!(ch.read(16).await.unwrap().unwrap(), &b"kept"[..]);
        assert_eq!(ch.read(16).await.unwrap(), None);

        ch.close();
        assert!(ch.is_released());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_wakes_waiters() {
        let (ch, mut rx) = channel(0, 32, 100, 200);

        let waiter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.wait_send_credit(10).await })
        };
        let reader = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.read(10).await })
        };
        tokio::task::yield_now().await;

        ch.close();
        ch.close();
        ch.closed().await;

        assert!(matches!(waiter.await.unwrap(), Err(Error::ChannelClosed)));
        assert!(matches!(reader.await.unwrap(), Err(Error::ChannelClosed)));

        let closes = drain(&mut rx)
            .iter()
            .filter(|m| m.kind() == "channel-close")
            .count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn credit_waiter_resumes_on_grant() {
        let (ch, _rx) = channel(0, 8, 100, 200);

        let waiter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.wait_send_credit(1024).await })
        };
        tokio::task::yield_now().await;

        ch.on_window_adjust(100);
        // Limited by the peer's packet size.
        assert_eq!(waiter.await.unwrap().unwrap(), 8);
    }

    #[tokio::test]
    async fn terminate_fails_reader() {
        let (ch, _rx) = channel(100, 32, 100, 200);
        ch.on_data(b"dropped".to_vec()).unwrap();
        ch.terminate();

        assert!(ch.is_released());
        assert!(matches!(ch.read(16).await, Err(Error::ChannelClosed)));
    }
}
