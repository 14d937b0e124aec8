//! lfwd-core: Shared library for lfwd channels, flow control, and relaying.
//!
//! This crate provides:
//! - Protocol message definitions for channel lifecycle and data
//! - Per-channel flow control (send/receive windows) and inbound buffering
//! - Session multiplexing over an abstract message link
//! - The bidirectional socket <-> channel relay pump
//! - Port forward specification parsing
//! - Logging setup

pub mod channel;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod flow;
pub mod forward;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod transport;

pub use channel::Channel;
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
pub use session::{IncomingChannel, Session};
