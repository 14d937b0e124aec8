//! Error types for lfwd-core.

use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::ChannelRejectCode;

/// Main error type for lfwd operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Local listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Peer refused to open a channel.
    #[error("channel open rejected ({code}): {message}")]
    ChannelOpenRejected {
        code: ChannelRejectCode,
        message: String,
    },

    /// Attempted to send more than the peer has granted.
    ///
    /// Correct pump code never triggers this.
    #[error("send window exceeded: requested {requested} bytes, {available} available")]
    WindowExceeded { requested: usize, available: u32 },

    /// Protocol violation or unexpected message.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Channel was closed or aborted.
    #[error("channel closed")]
    ChannelClosed,

    /// Session/link was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Invalid forward specification.
    #[error("invalid forward spec: {message}")]
    InvalidForwardSpec { message: String },

    /// Invalid configuration value.
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    /// Transport layer error.
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl Error {
    /// Returns true if this error only affects a single forwarded connection
    /// and a new connection may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ChannelClosed
                | Error::ChannelOpenRejected { .. }
                | Error::Timeout
                | Error::Transport { .. }
        )
    }

    /// Returns true if this error indicates a broken invariant or a dead
    /// session rather than a per-connection condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::WindowExceeded { .. }
                | Error::Protocol { .. }
                | Error::ConnectionClosed
                | Error::InvalidConfig { .. }
        )
    }
}

/// Convenience result type for lfwd operations.
pub type Result<T> = std::result::Result<T, Error>;
