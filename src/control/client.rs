use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use super::protocol::{Command, Reply, MAX_LINE_LENGTH};
use crate::aggregator::AggregatorError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Covers a server that is waiting for a stop to finish draining
const REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends one command per connection to a running aggregator.
#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: String,
}

impl ControlClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Send `command` and wait for the acknowledgment.
    ///
    /// # Errors
    ///
    /// - [`AggregatorError::TransportUnavailable`] when nothing is listening
    /// - [`AggregatorError::Rejected`] when the server answers `ERR`
    /// - [`AggregatorError::Protocol`] for a missing or unreadable reply
    pub async fn send(&self, command: Command) -> Result<(), AggregatorError> {
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!(addr = %self.addr, error = %e, "Control dial failed");
                return Err(self.unavailable());
            }
            Err(_) => {
                tracing::debug!(addr = %self.addr, "Control dial timed out");
                return Err(self.unavailable());
            }
        };

        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        framed.send(command.to_string()).await?;

        let line = tokio::time::timeout(REPLY_TIMEOUT, framed.next())
            .await
            .map_err(|_| AggregatorError::Protocol("timed out waiting for reply".to_string()))?
            .ok_or_else(|| {
                AggregatorError::Protocol("connection closed before reply".to_string())
            })??;

        match line.parse::<Reply>()? {
            Reply::Ok => Ok(()),
            Reply::Err(message) => Err(AggregatorError::Rejected(message)),
        }
    }

    fn unavailable(&self) -> AggregatorError {
        AggregatorError::TransportUnavailable {
            addr: self.addr.clone(),
        }
    }
}
