//! Per-channel flow control.
//!
//! Window accounting and inbound buffering are kept as separate objects:
//! - `window`: send credit from the peer and receive credit granted to it
//! - `buffer`: data accepted from the transport, waiting for the local reader

mod buffer;
mod window;

pub use buffer::InboundBuffer;
pub use window::{ReceiveWindow, SendWindow};
