//! One-shot outbound request/response over a fresh TCP connection.
//!
//! Used by the leader to replicate, by secondaries to forward writes, and by
//! the client. Every step is bounded by [`Timeouts`] so a hung peer can only
//! cost the caller a bounded wait.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::{io::BufReader, net::TcpStream, time::timeout};

use crate::config::Timeouts;
use crate::message::{self, Message};

/// Sends `request` to `address` and returns the single reply.
pub async fn request(address: &str, request: &Message, timeouts: Timeouts) -> Result<Message> {
    request_within(address, request, timeouts, timeouts.io).await
}

/// Like [`request`], but waits up to `reply_within` for the reply instead of
/// the I/O timeout. For peers whose answer depends on further network calls.
pub async fn request_within(
    address: &str,
    request: &Message,
    timeouts: Timeouts,
    reply_within: Duration,
) -> Result<Message> {
    let frame = message::encode(request).context("failed to encode request")?;
    request_frame(address, &frame, timeouts, reply_within).await
}

/// Sends an already encoded frame unchanged and returns the decoded reply.
pub async fn request_frame(
    address: &str,
    frame: &str,
    timeouts: Timeouts,
    reply_within: Duration,
) -> Result<Message> {
    let stream = bounded(timeouts.connect, TcpStream::connect(address))
        .await
        .with_context(|| format!("failed to connect to {address}"))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    bounded(timeouts.io, message::write_frame(&mut writer, frame))
        .await
        .with_context(|| format!("failed to send request to {address}"))?;

    bounded(reply_within, message::read_message(&mut reader))
        .await
        .with_context(|| format!("failed to read reply from {address}"))?
        .ok_or_else(|| anyhow!("{address} closed the connection without replying"))
}

async fn bounded<T, F>(limit: Duration, operation: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(limit, operation).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(anyhow!("timed out after {limit:?}")),
    }
}
