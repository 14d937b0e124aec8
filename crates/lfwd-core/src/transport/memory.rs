//! In-memory link for tests and in-process sessions.
//!
//! Messages are passed through bounded tokio channels, so a slow reader on
//! one end exerts backpressure on the writer of the other end just like a
//! socket would.

use tokio::sync::mpsc;

use super::{Link, LinkReceiver, LinkSender};
use crate::error::{Error, Result};
use crate::protocol::Message;

/// Default number of in-flight messages per direction.
const DEFAULT_LINK_CAPACITY: usize = 256;

/// One end of an in-memory link.
#[derive(Debug)]
pub struct MemoryLink {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
}

impl MemoryLink {
    /// Create a connected pair with the default capacity.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_LINK_CAPACITY)
    }

    /// Create a connected pair holding at most `capacity` messages per
    /// direction.
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (tx1, rx1) = mpsc::channel(capacity);
        let (tx2, rx2) = mpsc::channel(capacity);

        let a = Self { tx: tx1, rx: rx2 };
        let b = Self { tx: tx2, rx: rx1 };
        (a, b)
    }
}

impl Link for MemoryLink {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        (MemorySender { tx: self.tx }, MemoryReceiver { rx: self.rx })
    }
}

/// Sending half of a [`MemoryLink`].
#[derive(Debug)]
pub struct MemorySender {
    tx: mpsc::Sender<Message>,
}

impl LinkSender for MemorySender {
    async fn send(&mut self, msg: Message) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| Error::ConnectionClosed)
    }
}

/// Receiving half of a [`MemoryLink`].
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Message>,
}

impl LinkReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.rx.recv().await)
    }
}
