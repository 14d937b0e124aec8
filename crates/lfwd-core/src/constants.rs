//! Flow control and timing constants for lfwd.

use std::time::Duration;

// =============================================================================
// Flow Control Constants
// =============================================================================

/// Default initial receive window granted to the peer per channel (2 MiB).
pub const DEFAULT_WINDOW_SIZE: u32 = 2 * 1024 * 1024;

/// Default maximum payload carried by a single data message (32 KiB).
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 32 * 1024;

/// Upper bound accepted for a window size (16 MiB).
pub const MAX_WINDOW_SIZE: u32 = 16 * 1024 * 1024;

/// Upper bound accepted for a packet size (256 KiB).
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Receive credit is topped up once outstanding credit drops to
/// `window / LOW_WATER_DIVISOR`.
pub const LOW_WATER_DIVISOR: u32 = 2;

/// Read buffer used by the socket -> channel pump.
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

// =============================================================================
// Session Constants
// =============================================================================

/// Default maximum concurrent channels per session.
pub const DEFAULT_MAX_CHANNELS: usize = 1024;

/// Capacity of the queue of peer-initiated channel opens awaiting accept.
pub const INCOMING_CHANNEL_BACKLOG: usize = 64;

// =============================================================================
// Timing Constants
// =============================================================================

/// How long to wait for the peer to answer a channel open.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the target side waits for a TCP connect to the forward target.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
