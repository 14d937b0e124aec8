//! Inbound buffer for channel data.
//!
//! Sits between the session task that receives data from the transport and
//! the pump that writes it to the local socket. Appending never blocks and
//! never fails for pacing reasons; reading suspends while the buffer is
//! empty and the stream has not ended.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::Notify;

use crate::{Error, Result};

#[derive(Debug, Default)]
struct BufferState {
    chunks: VecDeque<Bytes>,
    len: usize,
    finished: bool,
    aborted: bool,
}

/// Ordered byte queue for one direction of one channel.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
}

impl InboundBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes that arrived from the transport.
    ///
    /// Data arriving after `finish` or `abort` is discarded; that can only
    /// happen when the peer keeps sending on a channel it already ended.
    pub fn append(&self, data: Bytes) -> bool {
        if data.is_empty() {
            return true;
        }
        {
            let mut state = self.lock();
            if state.finished || state.aborted {
                return false;
            }
            state.len += data.len();
            state.chunks.push_back(data);
        }
        self.notify.notify_waiters();
        true
    }

    /// Read up to `max_len` bytes in arrival order.
    ///
    /// - `Ok(Some(bytes))`: at least one byte.
    /// - `Ok(None)`: the stream finished and everything was read.
    /// - `Err(ChannelClosed)`: the channel was aborted.
    pub async fn read(&self, max_len: usize) -> Result<Option<Bytes>> {
        if max_len == 0 {
            return Ok(Some(Bytes::new()));
        }

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.aborted {
                    return Err(Error::ChannelClosed);
                }
                if state.len > 0 {
                    return Ok(Some(Self::take(&mut state, max_len)));
                }
                if state.finished {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    /// Read without waiting. `None` if nothing is buffered.
    #[cfg(test)]
    fn try_read(&self, max_len: usize) -> Option<Bytes> {
        let mut state = self.lock();
        if state.len == 0 || max_len == 0 {
            return None;
        }
        Some(Self::take(&mut state, max_len))
    }

    fn take(state: &mut BufferState, max_len: usize) -> Bytes {
        let front_len = state.chunks.front().map(Bytes::len).unwrap_or(0);

        // Fast path: the whole front chunk fits.
        if front_len <= max_len {
            if let Some(chunk) = state.chunks.pop_front() {
                state.len -= chunk.len();
                return chunk;
            }
        }

        let want = max_len.min(state.len);
        let mut out = BytesMut::with_capacity(want);
        while out.len() < want {
            let Some(front) = state.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(want - out.len());
            out.extend_from_slice(&front[..n]);
            front.advance(n);
            if front.is_empty() {
                state.chunks.pop_front();
            }
        }
        state.len -= out.len();
        out.freeze()
    }

    /// Mark end of stream. Buffered data remains readable.
    pub fn finish(&self) {
        self.lock().finished = true;
        self.notify.notify_waiters();
    }

    /// Abort the stream, discarding buffered data and waking the reader
    /// with an error.
    pub fn abort(&self) {
        {
            let mut state = self.lock();
            state.aborted = true;
            state.chunks.clear();
            state.len = 0;
        }
        self.notify.notify_waiters();
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if end of stream has been signalled.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;

    async fn drain(buffer: &InboundBuffer, read_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = buffer.read(read_size).await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn read_preserves_order_across_chunks() {
        let buffer = InboundBuffer::new();
        buffer.append(Bytes::from_static(b"hello "));
        buffer.append(Bytes::from_static(b"wide "));
        buffer.append(Bytes::from_static(b"world"));
        buffer.finish();

        assert_eq!(buffer.len(), 16);
        assert_eq!(drain(&buffer, 4).await, b"hello wide world");
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn read_returns_partial_front_chunk() {
        let buffer = InboundBuffer::new();
        buffer.append(Bytes::from_static(b"abcdef"));

        assert_eq!(buffer.read(2).await.unwrap().unwrap(), &b"ab"[..]);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.read(100).await.unwrap().unwrap(), &b"cdef"[..]);
    }

    #[tokio::test]
    async fn read_spans_chunks_up_to_max() {
        let buffer = InboundBuffer::new();
        buffer.append(Bytes::from_static(b"abc"));
        buffer.append(Bytes::from_static(b"def"));

        // The front chunk fits, so it is returned whole.
        assert_eq!(buffer.read(4).await.unwrap().unwrap(), &b"abc"[..]);
        assert_eq!(buffer.read(2).await.unwrap().unwrap(), &b"de"[..]);
        assert_eq!(buffer.try_read(10).unwrap(), &b"f"[..]);
        assert!(buffer.try_read(10).is_none());
    }

    #[tokio::test]
    async fn finished_buffer_drains_then_reports_eof() {
        let buffer = InboundBuffer::new();
        buffer.append(Bytes::from_static(b"tail"));
        buffer.finish();

        assert!(buffer.is_finished());
        assert_eq!(buffer.read(10).await.unwrap().unwrap(), &b"tail"[..]);
        assert!(buffer.read(10).await.unwrap().is_none());
        assert!(buffer.read(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_after_finish_is_refused() {
        let buffer = InboundBuffer::new();
        buffer.finish();
        assert!(!buffer.append(Bytes::from_static(b"late")));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn read_waits_for_append() {
        let buffer = Arc::new(InboundBuffer::new());
        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.read(64).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        buffer.append(Bytes::from_static(b"late data"));
        let got = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap(), &b"late data"[..]);
    }

    #[tokio::test]
    async fn abort_wakes_reader_with_error() {
        let buffer = Arc::new(InboundBuffer::new());
        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.read(64).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.abort();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn paused_reader_loses_nothing() {
        let buffer = Arc::new(InboundBuffer::new());
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let writer = {
            let buffer = Arc::clone(&buffer);
            let payload = payload.clone();
            tokio::spawn(async move {
                for chunk in payload.chunks(333) {
                    buffer.append(Bytes::copy_from_slice(chunk));
                    tokio::task::yield_now().await;
                }
                buffer.finish();
            })
        };

        let mut out = Vec::new();
        let first = buffer.read(payload.len() / 2).await.unwrap().unwrap();
        out.extend_from_slice(&first);
        tokio::time::sleep(Duration::from_millis(50)).await;
        out.extend_from_slice(&drain(&buffer, payload.len()).await);

        writer.await.unwrap();
        assert_eq!(out, payload);
    }

    proptest! {
        #[test]
        fn reads_concatenate_to_appends(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32),
            read_sizes in prop::collection::vec(1usize..100, 1..16),
        ) {
            let buffer = InboundBuffer::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                expected.extend_from_slice(chunk);
                buffer.append(Bytes::copy_from_slice(chunk));
            }
            buffer.finish();

            let mut out = Vec::new();
            let mut sizes = read_sizes.iter().cycle();
            while let Some(chunk) = buffer.try_read(*sizes.next().unwrap()) {
                prop_assert!(!chunk.is_empty());
                out.extend_from_slice(&chunk);
            }

            prop_assert_eq!(out, expected);
            prop_assert_eq!(buffer.len(), 0);
        }
    }
}
