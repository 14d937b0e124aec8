//! Local port forwarding handler (-L).
//!
//! Flow:
//! 1. Bind the local port
//! 2. Accept a local TCP connection
//! 3. Open a `direct-tcpip` channel to the target
//! 4. The peer connects to the target and accepts or rejects the channel
//! 5. Bidirectional relay until both directions finish

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lfwd_core::forward::{LocalForwardSpec, relay};
use lfwd_core::protocol::ChannelCloseReason;
use lfwd_core::{Channel, Error, Result, Session};

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    /// Accepting connections.
    Listening,
    /// Listener closed; established connections may still be running.
    Stopped,
}

impl fmt::Display for ForwarderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwarderState::Listening => write!(f, "listening"),
            ForwarderState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Local port forwarder.
///
/// Owns the listener and runs the accept loop. Created through
/// [`LocalForwarder::start`], which hands back a [`ForwarderHandle`].
pub struct LocalForwarder {
    /// TCP listener for local connections.
    listener: TcpListener,
    /// Session the channels are opened on.
    session: Session,
    /// State shared with the handles.
    shared: Arc<Shared>,
}

/// State shared between the accept task, connection tasks and handles.
struct Shared {
    spec: LocalForwardSpec,
    local_addr: SocketAddr,
    stopped: AtomicBool,
    next_connection_id: AtomicU64,
    connections: Mutex<Connections>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// Forwarded connections of one listener.
#[derive(Default)]
struct Connections {
    /// Unfinished connections keyed by connection id.
    active: HashMap<u64, Slot>,
    /// Bytes sent by connections that have finished.
    finished_sent: u64,
    /// Bytes received by connections that have finished.
    finished_received: u64,
}

/// One accepted connection.
///
/// Registered before its channel open is sent, so a close request that
/// arrives while the open is in flight is not lost.
#[derive(Default)]
struct Slot {
    /// Set once the peer accepted the channel.
    channel: Option<Channel>,
    /// A close was requested before the channel existed.
    close_requested: bool,
}

impl LocalForwarder {
    /// Bind the forward's local address and start accepting connections.
    ///
    /// Every accepted connection opens one `direct-tcpip` channel on
    /// `session`.
    pub async fn start(spec: LocalForwardSpec, session: Session) -> Result<ForwarderHandle> {
        let bind_addr = spec.bind_addr;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            target = %spec.target(),
            "Local forwarder bound"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            spec,
            local_addr,
            stopped: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(0),
            connections: Mutex::new(Connections::default()),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            accept_task: Mutex::new(None),
        });

        let forwarder = LocalForwarder {
            listener,
            session,
            shared: Arc::clone(&shared),
        };
        let task = tokio::spawn(forwarder.run(shutdown_rx));
        *lock(&shared.accept_task) = Some(task);

        Ok(ForwarderHandle { shared })
    }

    /// Accept connections until shutdown. The listener is dropped on return.
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(
                            peer = %peer,
                            addr = %self.shared.local_addr,
                            "Accepted local connection"
                        );
                        self.handle_connection(stream, peer);
                    }
                    Err(e) => {
                        error!(addr = %self.shared.local_addr, error = %e, "Accept failed");
                    }
                },
                _ = &mut shutdown_rx => {
                    info!(addr = %self.shared.local_addr, "Local forwarder shutting down");
                    break;
                }
            }
        }
    }

    /// Forward one accepted connection on its own task.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let connection_id = self.shared.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let session = self.session.clone();

        tokio::spawn(async move {
            shared
                .forward_connection(connection_id, stream, peer, session)
                .await;
        });
    }
}

impl Shared {
    /// Full lifecycle of a forwarded connection.
    async fn forward_connection(
        &self,
        connection_id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        session: Session,
    ) {
        let target = self.spec.target();
        self.lock_connections()
            .active
            .insert(connection_id, Slot::default());

        // On any failure here the accepted socket is dropped unwritten.
        let opened = session.open_channel(self.spec.channel_params(peer)).await;
        let channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                self.lock_connections().active.remove(&connection_id);
                match e {
                    Error::ChannelOpenRejected { code, message } => info!(
                        connection_id,
                        peer = %peer,
                        target = %target,
                        code = %code,
                        reason = %message,
                        "Forward rejected"
                    ),
                    other if other.is_transient() => info!(
                        connection_id,
                        peer = %peer,
                        target = %target,
                        error = %other,
                        "Failed to open forward channel"
                    ),
                    other => warn!(
                        connection_id,
                        peer = %peer,
                        target = %target,
                        error = %other,
                        "Failed to open forward channel"
                    ),
                }
                return;
            }
        };

        let channel_id = channel.id();
        let close_requested = {
            let mut connections = self.lock_connections();
            match connections.active.get_mut(&connection_id) {
                Some(slot) if !slot.close_requested => {
                    slot.channel = Some(channel.clone());
                    false
                }
                _ => {
                    connections.active.remove(&connection_id);
                    true
                }
            }
        };
        if close_requested {
            debug!(
                connection_id,
                channel_id = %channel_id,
                "Connection closed while its channel was opening"
            );
            channel.close_with(ChannelCloseReason::ConnectionClosed);
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(connection_id, error = %e, "Failed to set TCP_NODELAY");
        }

        debug!(
            connection_id,
            channel_id = %channel_id,
            peer = %peer,
            target = %target,
            "Forward established"
        );

        let result = relay(stream, channel.clone()).await;

        {
            let mut connections = self.lock_connections();
            connections.active.remove(&connection_id);
            connections.finished_sent += channel.bytes_sent();
            connections.finished_received += channel.bytes_received();
        }

        match result {
            Ok(stats) => debug!(
                connection_id,
                channel_id = %channel_id,
                to_target = stats.bytes_to_channel,
                from_target = stats.bytes_to_local,
                "Forward connection closed"
            ),
            Err(e) => debug!(
                connection_id,
                channel_id = %channel_id,
                error = %e,
                "Forward connection failed"
            ),
        }
    }

    fn lock_connections(&self) -> MutexGuard<'_, Connections> {
        lock(&self.connections)
    }
}

/// Handle to a running local forwarder.
///
/// Cheap to clone; all clones control the same listener.
#[derive(Clone)]
pub struct ForwarderHandle {
    shared: Arc<Shared>,
}

impl ForwarderHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// The forward this listener serves.
    pub fn spec(&self) -> &LocalForwardSpec {
        &self.shared.spec
    }

    /// Current listener state.
    pub fn state(&self) -> ForwarderState {
        if self.shared.stopped.load(Ordering::SeqCst) {
            ForwarderState::Stopped
        } else {
            ForwarderState::Listening
        }
    }

    /// Number of unfinished connections, including those whose channel is
    /// still opening.
    pub fn active_connections(&self) -> usize {
        self.shared.lock_connections().active.len()
    }

    /// Bytes sent toward the target, over all connections.
    pub fn bytes_sent(&self) -> u64 {
        let connections = self.shared.lock_connections();
        connections.finished_sent
            + connections
                .active
                .values()
                .filter_map(|slot| slot.channel.as_ref())
                .map(Channel::bytes_sent)
                .sum::<u64>()
    }

    /// Bytes received from the target, over all connections.
    pub fn bytes_received(&self) -> u64 {
        let connections = self.shared.lock_connections();
        connections.finished_received
            + connections
                .active
                .values()
                .filter_map(|slot| slot.channel.as_ref())
                .map(Channel::bytes_received)
                .sum::<u64>()
    }

    /// Abort every unfinished forwarded connection of this listener.
    ///
    /// Connections whose channel is still opening are closed as soon as
    /// the open completes. The listener keeps accepting.
    pub fn close_connections(&self) {
        let mut connections = self.shared.lock_connections();
        if connections.active.is_empty() {
            return;
        }
        debug!(
            addr = %self.shared.local_addr,
            count = connections.active.len(),
            "Closing forwarded connections"
        );
        for slot in connections.active.values_mut() {
            match &slot.channel {
                Some(channel) => channel.close_with(ChannelCloseReason::ConnectionClosed),
                None => slot.close_requested = true,
            }
        }
    }

    /// Stop accepting connections.
    ///
    /// Returns once the listening socket is closed. Established
    /// connections keep running. Idempotent.
    pub async fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);

        if let Some(tx) = lock(&self.shared.shutdown_tx).take() {
            let _ = tx.send(());
        }
        let task = lock(&self.shared.accept_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(addr = %self.shared.local_addr, error = %e, "Accept task failed");
            }
            info!(addr = %self.shared.local_addr, "Local forwarder stopped");
        }
    }
}

impl fmt::Debug for ForwarderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwarderHandle")
            .field("local_addr", &self.shared.local_addr)
            .field("target", &self.shared.spec.target())
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lfwd_core::SessionConfig;
    use lfwd_core::protocol::{ChannelRejectCode, ChannelSide};
    use lfwd_core::transport::MemoryLink;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn client_session() -> (Session, Session) {
        let (a, b) = MemoryLink::pair();
        let client = Session::new(a, ChannelSide::Client, SessionConfig::default()).unwrap();
        let server = Session::new(b, ChannelSide::Server, SessionConfig::default()).unwrap();
        (client, server)
    }

    fn loopback_spec(target_port: u16) -> LocalForwardSpec {
        LocalForwardSpec::new("127.0.0.1:0".parse().unwrap(), "127.0.0.1", target_port)
    }

    #[test]
    fn handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ForwarderHandle>();
    }

    #[test]
    fn state_display() {
        assert_eq!(ForwarderState::Listening.to_string(), "listening");
        assert_eq!(ForwarderState::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let (client, _server) = client_session();

        let spec = LocalForwardSpec::new(addr, "127.0.0.1", 9);
        let err = LocalForwarder::start(spec, client).await.unwrap_err();
        match err {
            Error::Bind { addr: failed, .. } => assert_eq!(failed, addr),
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_releases_port_and_is_idempotent() {
        let (client, _server) = client_session();
        let handle = LocalForwarder::start(loopback_spec(9), client).await.unwrap();
        let addr = handle.local_addr();
        assert_ne!(addr.port(), 0);
        assert_eq!(handle.state(), ForwarderState::Listening);

        handle.stop().await;
        assert_eq!(handle.state(), ForwarderState::Stopped);
        handle.stop().await;

        TcpListener::bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn fresh_listener_has_no_traffic() {
        let (client, _server) = client_session();
        let handle = LocalForwarder::start(loopback_spec(9), client).await.unwrap();

        assert_eq!(handle.active_connections(), 0);
        assert_eq!(handle.bytes_sent(), 0);
        assert_eq!(handle.bytes_received(), 0);
        handle.close_connections();
        assert_eq!(handle.spec().target_port, 9);

        handle.stop().await;
    }

    #[tokio::test]
    async fn close_while_opening_closes_channel_once_accepted() {
        let (client, server) = client_session();
        let handle = LocalForwarder::start(loopback_spec(9), client).await.unwrap();

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        let incoming = timeout(TIMEOUT, server.accept_channel())
            .await
            .expect("no channel open arrived")
            .unwrap();
        assert_eq!(handle.active_connections(), 1);
        assert_eq!(handle.bytes_sent(), 0);

        // Nothing has answered the open yet.
        handle.close_connections();

        let channel = incoming.accept().await.unwrap();
        timeout(TIMEOUT, channel.closed())
            .await
            .expect("accepted channel was not closed");

        let mut buf = [0u8; 16];
        match timeout(TIMEOUT, stream.read(&mut buf)).await.unwrap() {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("read {n} bytes from an aborted connection"),
        }

        timeout(TIMEOUT, async {
            while handle.active_connections() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection was not released");
        assert_eq!(handle.state(), ForwarderState::Listening);

        handle.stop().await;
    }

    #[tokio::test]
    async fn failed_open_releases_connection() {
        let (client, server) = client_session();
        let handle = LocalForwarder::start(loopback_spec(9), client).await.unwrap();

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        let incoming = timeout(TIMEOUT, server.accept_channel())
            .await
            .expect("no channel open arrived")
            .unwrap();
        assert_eq!(handle.active_connections(), 1);

        incoming.reject(ChannelRejectCode::ConnectFailed, "connection refused");

        let mut buf = [0u8; 16];
        match timeout(TIMEOUT, stream.read(&mut buf)).await.unwrap() {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("read {n} bytes from a rejected connection"),
        }
        assert_eq!(handle.active_connections(), 0);

        handle.stop().await;
    }
}
