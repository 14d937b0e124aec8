//! lfwd-test-utils: Test infrastructure for lfwd.
//!
//! Provides:
//! - PayloadServer: single-shot TCP writer used as a forward target
//! - Loopback: a connected client/server session pair with a forward handler
//! - Read helpers reproducing fast and paused read patterns

mod loopback;
mod payload;

pub use loopback::Loopback;
pub use payload::{PAYLOAD, PayloadServer, read_in_two, read_to_len};
