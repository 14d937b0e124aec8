//! Target-side forward handler.
//!
//! Accepts `direct-tcpip` channel opens from the peer, connects to the
//! requested target and relays data bidirectionally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lfwd_core::forward::relay;
use lfwd_core::protocol::{ChannelId, ChannelParams, ChannelRejectCode, DirectTcpIpParams};
use lfwd_core::{Error, IncomingChannel, Result, Session};

use crate::config::ServerConfig;

/// Target-side forward handler.
///
/// Answers channel opens on one session and tracks the forwarded
/// connections it started.
#[derive(Clone)]
pub struct ForwardHandler {
    session: Session,
    config: Arc<ServerConfig>,
    /// Active forwards keyed by channel, value is the target.
    active_forwards: Arc<Mutex<HashMap<ChannelId, String>>>,
}

impl ForwardHandler {
    /// Create a new forward handler for `session`.
    pub fn new(session: Session, config: ServerConfig) -> Self {
        Self {
            session,
            config: Arc::new(config),
            active_forwards: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of forwards connecting or relaying.
    pub async fn active_count(&self) -> usize {
        self.active_forwards.lock().await.len()
    }

    /// Serve channel opens until the session ends.
    pub async fn run(&self) {
        while let Some(incoming) = self.session.accept_channel().await {
            self.handle_incoming(incoming).await;
        }
        debug!("Session ended, forward handler stopping");
    }

    /// Run the handler on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Answer one channel open.
    ///
    /// Policy checks happen inline; the connect and relay run on a
    /// separate task.
    pub async fn handle_incoming(&self, incoming: IncomingChannel) {
        let channel_id = incoming.id();
        let ChannelParams::DirectTcpIp(params) = incoming.params().clone();
        let target = format!("{}:{}", params.target_host, params.target_port);

        debug!(
            channel_id = %channel_id,
            target = %target,
            originator = %format!("{}:{}", params.originator_host, params.originator_port),
            "Handling direct-tcpip open"
        );

        if !self
            .config
            .filter
            .permits(&params.target_host, params.target_port)
        {
            info!(channel_id = %channel_id, target = %target, "Forward denied by filter");
            incoming.reject(
                ChannelRejectCode::AdministrativelyProhibited,
                format!("forwarding to {} is not permitted", target),
            );
            return;
        }

        // Reserve a slot before connecting so concurrent opens count.
        {
            let mut forwards = self.active_forwards.lock().await;
            if forwards.len() >= self.config.max_forwards {
                warn!(
                    channel_id = %channel_id,
                    limit = self.config.max_forwards,
                    "Max forwards exceeded"
                );
                incoming.reject(ChannelRejectCode::ResourceShortage, "max forwards exceeded");
                return;
            }
            forwards.insert(channel_id, target);
        }

        let active_forwards = Arc::clone(&self.active_forwards);
        let connect_timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            Self::forward(incoming, params, connect_timeout).await;

            // Cleanup
            active_forwards.lock().await.remove(&channel_id);
        });
    }

    async fn forward(
        incoming: IncomingChannel,
        params: DirectTcpIpParams,
        connect_timeout: Duration,
    ) {
        let channel_id = incoming.id();
        let target = format!("{}:{}", params.target_host, params.target_port);

        let connect = connect_target(&params.target_host, params.target_port, connect_timeout);
        let stream = match connect.await {
            Ok(stream) => {
                debug!(channel_id = %channel_id, target = %target, "Connected to target");
                stream
            }
            Err(e) => {
                warn!(
                    channel_id = %channel_id,
                    target = %target,
                    error = %e,
                    "Failed to connect to target"
                );
                incoming.reject(
                    ChannelRejectCode::ConnectFailed,
                    format!("connect to {} failed: {}", target, e),
                );
                return;
            }
        };

        let channel = match incoming.accept().await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(channel_id = %channel_id, error = %e, "Could not accept channel");
                return;
            }
        };

        info!(channel_id = %channel_id, target = %target, "Forwarding to target");
        match relay(stream, channel).await {
            Ok(stats) => debug!(
                channel_id = %channel_id,
                to_target = stats.bytes_to_local,
                from_target = stats.bytes_to_channel,
                "Forward finished"
            ),
            Err(e) => debug!(channel_id = %channel_id, error = %e, "Forward relay ended"),
        }
    }
}

/// Connect to a forward target within `timeout`.
async fn connect_target(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::Timeout)??;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY on target stream");
    }
    Ok(stream)
}
