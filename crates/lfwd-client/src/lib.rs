//! lfwd-client: Forwarding side of lfwd.
//!
//! Provides:
//! - CLI argument parsing
//! - Local port forward listeners (-L)
//! - A registry tracking the listeners of one session

pub mod cli;
pub mod forward;

pub use cli::{Cli, CliLogFormat};
pub use forward::{ForwardInfo, ForwardRegistry, ForwarderHandle, ForwarderState, LocalForwarder};
