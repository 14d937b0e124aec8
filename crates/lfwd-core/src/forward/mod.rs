//! Port forwarding building blocks shared by both sides.
//!
//! This module provides:
//! - Local forward specification parsing (SSH-style `-L` syntax)
//! - The socket <-> channel relay used by the listener and the target side

mod relay;
mod spec;

pub use relay::{RelayStats, relay};
pub use spec::LocalForwardSpec;
