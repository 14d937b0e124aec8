//! In-process session pair for forwarding tests.

use tokio::task::JoinHandle;

use lfwd_core::protocol::ChannelSide;
use lfwd_core::transport::MemoryLink;
use lfwd_core::{Result, Session, SessionConfig};
use lfwd_server::{ForwardHandler, ServerConfig};

/// A client session connected over a [`MemoryLink`] to a server session
/// that answers `direct-tcpip` opens with a [`ForwardHandler`].
pub struct Loopback {
    /// Forwarding side.
    pub client: Session,
    /// Target side.
    pub server: Session,
    /// Handler serving the target side.
    pub handler: ForwardHandler,
    handler_task: JoinHandle<()>,
}

impl Loopback {
    /// Start with default configuration.
    pub fn start() -> Result<Self> {
        Self::with_config(SessionConfig::default(), ServerConfig::default())
    }

    /// Start with the given session (both ends) and server configuration.
    pub fn with_config(session_config: SessionConfig, server_config: ServerConfig) -> Result<Self> {
        let (client_link, server_link) = MemoryLink::pair();
        let client = Session::new(client_link, ChannelSide::Client, session_config.clone())?;
        let server = Session::new(server_link, ChannelSide::Server, session_config)?;

        let handler = ForwardHandler::new(server.clone(), server_config);
        let handler_task = handler.clone().spawn();

        Ok(Self {
            client,
            server,
            handler,
            handler_task,
        })
    }

    /// Disconnect the client session; the server follows.
    pub async fn disconnect(&self) {
        self.client.close().await;
        self.server.closed().await;
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}
