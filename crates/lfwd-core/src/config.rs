//! Session configuration shared between the forwarding and target sides.
//!
//! Both ends of a link use the same flow-control settings: the window each
//! side grants to its peer, the largest data message it sends, and how many
//! bytes it is willing to hold for a slow local reader.

use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_CHANNELS, DEFAULT_MAX_PACKET_SIZE, DEFAULT_OPEN_TIMEOUT, DEFAULT_WINDOW_SIZE,
    MAX_PACKET_SIZE, MAX_WINDOW_SIZE,
};
use crate::{Error, Result};

/// Per-session flow control and limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Initial receive window granted to the peer for each channel.
    pub window_size: u32,
    /// Maximum data payload per message.
    pub max_packet_size: u32,
    /// Maximum bytes held in a channel's inbound buffer plus outstanding
    /// credit. Grants are withheld beyond this point.
    pub max_buffered: usize,
    /// Maximum concurrent channels.
    pub max_channels: usize,
    /// How long `open_channel` waits for the peer's answer.
    pub open_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_buffered: 2 * DEFAULT_WINDOW_SIZE as usize,
            max_channels: DEFAULT_MAX_CHANNELS,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial window size.
    ///
    /// `max_buffered` is raised to twice the window if it would otherwise
    /// be smaller than the window.
    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size;
        if self.max_buffered < window_size as usize {
            self.max_buffered = 2 * window_size as usize;
        }
        self
    }

    /// Set the maximum packet size.
    pub fn with_max_packet_size(mut self, max_packet_size: u32) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Set the inbound buffering limit.
    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered;
        self
    }

    /// Set the maximum channels.
    pub fn with_max_channels(mut self, max: usize) -> Self {
        self.max_channels = max;
        self
    }

    /// Set the channel open timeout.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Check that the values are usable together.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidConfig {
                message: format!(
                    "window size must be between 1 and {}, got {}",
                    MAX_WINDOW_SIZE, self.window_size
                ),
            });
        }
        if self.max_packet_size == 0 || self.max_packet_size > MAX_PACKET_SIZE {
            return Err(Error::InvalidConfig {
                message: format!(
                    "packet size must be between 1 and {}, got {}",
                    MAX_PACKET_SIZE, self.max_packet_size
                ),
            });
        }
        if self.max_packet_size > self.window_size {
            return Err(Error::InvalidConfig {
                message: format!(
                    "packet size {} exceeds window size {}",
                    self.max_packet_size, self.window_size
                ),
            });
        }
        if self.max_buffered < self.window_size as usize {
            return Err(Error::InvalidConfig {
                message: format!(
                    "max buffered {} is smaller than window size {}",
                    self.max_buffered, self.window_size
                ),
            });
        }
        if self.max_channels == 0 {
            return Err(Error::InvalidConfig {
                message: "max channels must be at least 1".into(),
            });
        }
        Ok(())
    }
}
