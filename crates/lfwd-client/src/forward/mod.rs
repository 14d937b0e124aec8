//! Port forwarding for the lfwd client.
//!
//! - Local forward (-L): [`LocalForwarder`] listens on a local port and opens
//!   a `direct-tcpip` channel per accepted connection
//! - [`ForwardRegistry`] tracks listeners and cascades session teardown to
//!   their connections

mod local;
mod registry;

pub use local::{ForwarderHandle, ForwarderState, LocalForwarder};
pub use registry::{ForwardInfo, ForwardRegistry};
