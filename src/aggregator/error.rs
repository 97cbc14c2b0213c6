use thiserror::Error;

/// Hard errors surfaced to callers of the aggregator and the control client.
///
/// Per-feed fetch failures and per-article persistence failures never appear
/// here; workers log and absorb them.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("aggregator is already running")]
    AlreadyRunning,

    #[error("aggregator is not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("aggregator not running (no control listener at {addr})")]
    TransportUnavailable { addr: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("control protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
