//! Single-shot payload server and read-pattern helpers.
//!
//! The server writes a fixed payload to every accepted connection and
//! closes it, which is the traffic pattern that exposes lost bytes when the
//! reader on the far side of a forward pauses.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The 399 byte payload written by [`PayloadServer`].
pub const PAYLOAD: &str = "This is significantly longer Test Data. This is significantly \
longer Test Data. This is significantly longer Test Data. This is significantly \
longer Test Data. This is significantly longer Test Data. This is significantly \
longer Test Data. This is significantly longer Test Data. This is significantly \
longer Test Data. This is significantly longer Test Data. This is significantly \
longer Test Data!";

/// TCP server that writes a payload once per connection, then closes it.
///
/// The accept loop is aborted when the server is dropped.
pub struct PayloadServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl PayloadServer {
    /// Start serving [`PAYLOAD`] on an ephemeral loopback port.
    pub async fn start() -> io::Result<Self> {
        Self::with_payload(PAYLOAD.as_bytes().to_vec()).await
    }

    /// Start serving `payload` on an ephemeral loopback port.
    pub async fn with_payload(payload: Vec<u8>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let payload: Arc<[u8]> = payload.into();

        let counter = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            loop {
                let (mut socket, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Payload server accept failed");
                        continue;
                    }
                };
                counter.fetch_add(1, Ordering::SeqCst);
                debug!(peer = %peer, "Payload server got a connection");

                let payload = Arc::clone(&payload);
                tokio::spawn(async move {
                    if let Err(e) = socket.write_all(&payload).await {
                        debug!(peer = %peer, error = %e, "Payload write failed");
                        return;
                    }
                    let _ = socket.flush().await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Ok(Self {
            addr,
            connections,
            task,
        })
    }

    /// Address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for PayloadServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read until `len` bytes have arrived or the stream ends.
///
/// Uses one buffer of `len` bytes, like a single large read.
pub async fn read_to_len<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// One read of at most `first` bytes, a pause, then everything else.
pub async fn read_in_two<R: AsyncRead + Unpin>(
    reader: &mut R,
    first: usize,
    pause: Duration,
) -> io::Result<Vec<u8>> {
    let mut out = vec![0u8; first];
    let n = reader.read(&mut out).await?;
    out.truncate(n);

    tokio::time::sleep(pause).await;

    reader.read_to_end(&mut out).await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[test]
    fn payload_matches_reference_text() {
        assert!(PAYLOAD.starts_with("This is significantly longer Test Data. "));
        assert!(PAYLOAD.ends_with("longer Test Data!"));
        assert_eq!(PAYLOAD.matches("longer Test Data").count(), 10);
        assert_eq!(PAYLOAD.len(), 399);
    }

    #[tokio::test]
    async fn serves_payload_then_closes() {
        let server = PayloadServer::start().await.unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, PAYLOAD.as_bytes());
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn read_in_two_direct() {
        let server = PayloadServer::start().await.unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        let received = read_in_two(&mut stream, PAYLOAD.len() / 2, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(received, PAYLOAD.as_bytes());
    }
}
