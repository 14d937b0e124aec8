//! Port forwarding handlers for the target side.
//!
//! Local forwards (-L) arrive as `direct-tcpip` channel opens; the handler
//! connects to the requested target and runs the shared relay.

mod handler;

pub use handler::ForwardHandler;
