//! Protocol module for lfwd messages.
//!
//! This module provides:
//! - Channel identifiers and types
//! - Channel lifecycle payloads (open/accept/reject/eof/close)
//! - Channel data and window adjust payloads
//! - The top-level `Message` enum
//!
//! Payloads derive serde traits so a framing layer can encode them; this
//! crate does not define a wire encoding.

mod channel;
mod data;
mod lifecycle;
mod message;
mod proptest;

pub use channel::*;
pub use data::*;
pub use lifecycle::*;
pub use message::*;
