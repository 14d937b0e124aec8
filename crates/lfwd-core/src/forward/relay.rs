//! Bidirectional relay between a local stream and a channel.
//!
//! Each forwarded connection runs two pumps as separate tasks:
//! - stream -> channel: reads at most the current send credit, sends EOF
//!   when the stream ends
//! - channel -> stream: drains the inbound buffer into the stream, shuts
//!   down the write side on channel EOF
//!
//! The channel is closed once both pumps finish. If either fails the other
//! is cancelled and the channel is closed with an error.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, trace};

use crate::channel::Channel;
use crate::constants::RELAY_BUFFER_SIZE;
use crate::protocol::ChannelCloseReason;
use crate::{Error, Result};

/// Bytes moved by a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes read from the local stream and sent on the channel.
    pub bytes_to_channel: u64,
    /// Bytes read from the channel and written to the local stream.
    pub bytes_to_local: u64,
}

/// Aborts the pump if the relay itself is dropped.
struct PumpHandle(JoinHandle<Result<u64>>);

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Relay `stream` and `channel` until both directions have finished.
pub async fn relay<S>(stream: S, channel: Channel) -> Result<RelayStats>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let channel_id = channel.id();
    let (reader, writer) = tokio::io::split(stream);

    let mut to_channel = PumpHandle(tokio::spawn(pump_to_channel(reader, channel.clone())));
    let mut to_local = PumpHandle(tokio::spawn(pump_to_local(channel.clone(), writer)));

    // Whichever direction finishes first, wait for the other unless it failed.
    let outcome = tokio::select! {
        result = &mut to_channel.0 => match flatten(result) {
            Ok(sent) => flatten((&mut to_local.0).await).map(|received| (sent, received)),
            Err(e) => Err(e),
        },
        result = &mut to_local.0 => match flatten(result) {
            Ok(received) => flatten((&mut to_channel.0).await).map(|sent| (sent, received)),
            Err(e) => Err(e),
        },
    };

    match outcome {
        Ok((bytes_to_channel, bytes_to_local)) => {
            channel.close();
            debug!(
                channel_id = %channel_id,
                bytes_to_channel,
                bytes_to_local,
                "Relay finished"
            );
            Ok(RelayStats {
                bytes_to_channel,
                bytes_to_local,
            })
        }
        Err(e) => {
            to_channel.0.abort();
            to_local.0.abort();
            if e.is_fatal() {
                error!(channel_id = %channel_id, error = %e, "Relay failed");
            } else {
                debug!(channel_id = %channel_id, error = %e, "Relay failed");
            }
            channel.close_with(ChannelCloseReason::Error {
                message: e.to_string(),
            });
            Err(e)
        }
    }
}

fn flatten(result: std::result::Result<Result<u64>, JoinError>) -> Result<u64> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(Error::Transport {
            message: format!("relay pump failed: {}", e),
        }),
    }
}

/// Local stream -> channel.
async fn pump_to_channel<S>(mut reader: ReadHalf<S>, channel: Channel) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        // The peer stopped listening: nothing more to send.
        let credit = match channel.wait_send_credit(RELAY_BUFFER_SIZE as u32).await {
            Ok(credit) => credit as usize,
            Err(Error::ChannelClosed) => return Ok(total),
            Err(e) => return Err(e),
        };

        let n = tokio::select! {
            n = reader.read(&mut buf[..credit]) => n?,
            _ = channel.closed() => return Ok(total),
        };

        if n == 0 {
            trace!(channel_id = %channel.id(), total, "Local stream EOF");
            channel.send_eof()?;
            return Ok(total);
        }

        match channel.send(&buf[..n]) {
            Ok(()) => total += n as u64,
            Err(Error::ChannelClosed) => return Ok(total),
            Err(e) => return Err(e),
        }
    }
}

/// Channel -> local stream.
async fn pump_to_local<S>(channel: Channel, mut writer: WriteHalf<S>) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut total = 0u64;

    while let Some(data) = channel.read(RELAY_BUFFER_SIZE).await? {
        writer.write_all(&data).await?;
        total += data.len() as u64;
    }

    trace!(channel_id = %channel.id(), total, "Channel EOF");
    writer.shutdown().await?;
    Ok(total)
}
