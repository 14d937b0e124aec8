//! lfwd-server: Target side of lfwd local forwards.
//!
//! Provides:
//! - Forward handler accepting `direct-tcpip` channels from the peer
//! - Forwarding filter and concurrency limits

pub mod config;
pub mod forward;

pub use config::{ForwardingFilter, ServerConfig, TargetRule};
pub use forward::ForwardHandler;
