use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio_util::codec::LinesCodecError;

use crate::aggregator::{validate_interval, validate_workers, AggregatorError};
use crate::util::{format_duration, parse_duration};

/// Longest accepted line, in bytes, in either direction
pub const MAX_LINE_LENGTH: usize = 1024;

const SET_INTERVAL: &str = "SET_INTERVAL";
const SET_WORKERS: &str = "SET_WORKERS";

/// A reconfiguration request sent to a running aggregator.
///
/// Wire form is one line: `SET_INTERVAL <duration>` or
/// `SET_WORKERS <positive-int>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetInterval(Duration),
    SetWorkers(usize),
}

impl FromStr for Command {
    type Err = AggregatorError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let (Some(verb), Some(argument), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AggregatorError::Protocol(format!(
                "malformed command {:?}",
                line.trim()
            )));
        };

        match verb {
            SET_INTERVAL => {
                let interval = parse_duration(argument)
                    .map_err(|e| AggregatorError::InvalidConfig(e.to_string()))?;
                validate_interval(interval)?;
                Ok(Command::SetInterval(interval))
            }
            SET_WORKERS => {
                let workers: usize = argument.parse().map_err(|_| {
                    AggregatorError::InvalidConfig(format!(
                        "worker count must be a positive integer, got {:?}",
                        argument
                    ))
                })?;
                validate_workers(workers)?;
                Ok(Command::SetWorkers(workers))
            }
            other => Err(AggregatorError::Protocol(format!(
                "unknown command {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetInterval(interval) => {
                write!(f, "{} {}", SET_INTERVAL, format_duration(*interval))
            }
            Command::SetWorkers(workers) => write!(f, "{} {}", SET_WORKERS, workers),
        }
    }
}

/// Server acknowledgment: `OK` or `ERR <message>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Err(String),
}

impl FromStr for Reply {
    type Err = AggregatorError;

    fn from_str(line: &str) -> Result<Self, AggregatorError> {
        let line = line.trim();
        if line == "OK" {
            return Ok(Reply::Ok);
        }
        match line.strip_prefix("ERR") {
            Some(message) if message.is_empty() || message.starts_with(' ') => {
                Ok(Reply::Err(message.trim().to_string()))
            }
            _ => Err(AggregatorError::Protocol(format!(
                "unexpected reply {:?}",
                line
            ))),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => f.write_str("OK"),
            // Replies are single lines
            Reply::Err(message) => write!(f, "ERR {}", message.replace(['\r', '\n'], " ")),
        }
    }
}

impl From<LinesCodecError> for AggregatorError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => AggregatorError::Io(e),
            LinesCodecError::MaxLineLengthExceeded => AggregatorError::Protocol(format!(
                "line exceeds {} bytes",
                MAX_LINE_LENGTH
            )),
        }
    }
}
