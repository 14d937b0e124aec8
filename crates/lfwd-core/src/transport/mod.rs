//! Transport abstractions for lfwd.
//!
//! A session runs over a [`Link`]: an established, authenticated,
//! message-oriented pipe to the peer. Encryption and framing belong to the
//! link implementation. The session splits the link into a sender half
//! (driven by its writer task) and a receiver half (driven by its reader
//! task).
//!
//! Implementations:
//! - [`MemoryLink`]: in-process pair used by tests and the loopback CLI

mod memory;

pub use memory::{MemoryLink, MemoryReceiver, MemorySender};

use std::future::Future;

use crate::error::Result;
use crate::protocol::Message;

/// Sending half of a link.
pub trait LinkSender: Send + 'static {
    /// Send one message, waiting for buffer space if necessary.
    fn send(&mut self, msg: Message) -> impl Future<Output = Result<()>> + Send;
}

/// Receiving half of a link.
pub trait LinkReceiver: Send + 'static {
    /// Receive the next message. `Ok(None)` once the peer has gone away.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Message>>> + Send;
}

/// A bidirectional message link to the peer.
pub trait Link: Send + 'static {
    /// The sending half.
    type Sender: LinkSender;
    /// The receiving half.
    type Receiver: LinkReceiver;

    /// Split into independently owned halves.
    fn split(self) -> (Self::Sender, Self::Receiver);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_bounds_are_correct() {
        fn assert_link<L: Link>() {}
        fn assert_send<T: Send>() {}

        assert_link::<MemoryLink>();
        assert_send::<MemorySender>();
        assert_send::<MemoryReceiver>();
    }
}
