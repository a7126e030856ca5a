use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::ReplicaConfig,
    message::{Message, invalid_frame_reply, read_frame, write_message},
    replica::Replica,
};

/// Accept loop for one replica. Each connection carries exactly one request.
pub struct Server {
    listener: TcpListener,
    replica: Arc<Replica>,
}

impl Server {
    pub fn new(listener: TcpListener, config: ReplicaConfig) -> Self {
        Self {
            listener,
            replica: Arc::new(Replica::new(config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the replica state, for inspection.
    pub fn replica(&self) -> Arc<Replica> {
        Arc::clone(&self.replica)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, replica } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(role = %replica.role(), "server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &replica);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, replica: &Arc<Replica>) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, replica),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, replica: &Arc<Replica>) {
    let replica = Arc::clone(replica);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, &replica).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

/// Reads one request frame, answers it, and closes the connection.
async fn handle_connection(stream: TcpStream, replica: &Replica) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let io_timeout = replica.config().timeouts.io;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let frame = match bounded(io_timeout, read_frame(&mut reader)).await? {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!(?peer, "connection closed before sending a request");
            return Ok(());
        }
        Err(err) => {
            warn!(?peer, error = %err, "failed to read request");
            send_reply(&mut writer, &invalid_frame_reply(""), io_timeout).await?;
            return Ok(());
        }
    };

    let reply = replica.handle_frame(&frame).await;
    debug!(?peer, command = %reply.command(), key = reply.key(), "sending reply");
    send_reply(&mut writer, &reply, io_timeout).await?;

    if let Err(err) = writer.shutdown().await {
        debug!(?peer, error = ?err, "failed to shut down connection cleanly");
    }
    Ok(())
}

async fn bounded<T>(limit: Duration, operation: impl Future<Output = T>) -> Result<T> {
    timeout(limit, operation)
        .await
        .map_err(|_| anyhow!("timed out after {limit:?}"))
}

async fn send_reply<W>(writer: &mut W, reply: &Message, limit: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    bounded(limit, write_message(writer, reply)).await??;
    Ok(())
}
