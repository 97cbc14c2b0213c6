use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::protocol::{Command, Reply, MAX_LINE_LENGTH};
use crate::aggregator::{Aggregator, AggregatorError};

/// How long a client may stay silent before the connection is dropped
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Listener accepting reconfiguration commands for one aggregator.
///
/// Only one process can bind the control address, so a successful bind also
/// marks this process as the single running aggregator.
pub struct ControlServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ControlServer {
    /// Bind the control listener.
    ///
    /// # Errors
    ///
    /// [`AggregatorError::InvalidConfig`] for a non-loopback address,
    /// [`AggregatorError::AlreadyRunning`] if the address is taken, otherwise
    /// [`AggregatorError::Io`].
    pub async fn bind(addr: SocketAddr) -> Result<Self, AggregatorError> {
        // Commands are unauthenticated
        if !addr.ip().is_loopback() {
            return Err(AggregatorError::InvalidConfig(format!(
                "control address {} is not a loopback address",
                addr
            )));
        }

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::error!(addr = %addr, "Control address in use, another aggregator instance is already running");
                return Err(AggregatorError::AlreadyRunning);
            }
            Err(e) => return Err(AggregatorError::Io(e)),
        };
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Control listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` fires, then wait for open
    /// connections to finish.
    pub async fn serve(self, aggregator: Arc<Aggregator>, shutdown: CancellationToken) {
        let connections = TaskTracker::new();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let aggregator = Arc::clone(&aggregator);
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, &aggregator).await {
                            tracing::warn!(peer = %peer, error = %e, "Control connection failed");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept control connection");
                }
            }
        }

        connections.close();
        connections.wait().await;
        tracing::debug!("Control listener stopped");
    }
}

async fn handle_connection(stream: TcpStream, aggregator: &Aggregator) -> Result<(), AggregatorError> {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let line = match tokio::time::timeout(READ_TIMEOUT, framed.next()).await {
        Err(_) => {
            return Err(AggregatorError::Protocol(
                "timed out waiting for a command".to_string(),
            ))
        }
        // Peer closed without sending anything
        Ok(None) => return Ok(()),
        Ok(Some(Err(e))) => {
            let err = AggregatorError::from(e);
            let _ = framed.send(Reply::Err(err.to_string()).to_string()).await;
            return Err(err);
        }
        Ok(Some(Ok(line))) => line,
    };

    let reply = match line.parse::<Command>() {
        Ok(command) => match apply(aggregator, command).await {
            Ok(()) => Reply::Ok,
            Err(e) => Reply::Err(e.to_string()),
        },
        Err(e) => {
            tracing::debug!(line = %line, error = %e, "Rejected control command");
            Reply::Err(e.to_string())
        }
    };

    framed.send(reply.to_string()).await?;
    Ok(())
}

async fn apply(aggregator: &Aggregator, command: Command) -> Result<(), AggregatorError> {
    tracing::info!(command = %command, "Control command received");
    match command {
        Command::SetInterval(interval) => aggregator.set_interval(interval).await,
        Command::SetWorkers(workers) => aggregator.resize(workers).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_rejects_non_loopback_address() {
        for addr in ["0.0.0.0:0", "[::]:0", "192.168.1.10:7878"] {
            let result = ControlServer::bind(addr.parse().unwrap()).await;
            assert!(
                matches!(result, Err(AggregatorError::InvalidConfig(_))),
                "{} should be rejected",
                addr
            );
        }
    }

    #[tokio::test]
    async fn test_bind_accepts_loopback() {
        let server = ControlServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert!(server.local_addr().ip().is_loopback());
        assert_ne!(server.local_addr().port(), 0);
    }
}
