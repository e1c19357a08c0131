//! Probe module for TCP connectivity monitoring.

mod tcp;

pub use tcp::*;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::db::FAILED_LATENCY_MS;

/// Probe error types.
///
/// Network failures are not errors; they come back as a failed [`ProbeOutcome`].
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid probe target: {0}")]
    InvalidTarget(String),
}

/// Why a connection attempt did not complete.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeFailure {
    Refused,
    TimedOut,
    /// Unreachable, reset, resolution failure and the like.
    Network(String),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Refused => f.write_str("connection refused"),
            ProbeFailure::TimedOut => f.write_str("timed out"),
            ProbeFailure::Network(detail) => write!(f, "network error: {}", detail),
        }
    }
}

/// Result of a single connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Connected(Duration),
    Failed(ProbeFailure),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Connected(_))
    }

    /// Connect latency in milliseconds, or -1 for a failed attempt.
    pub fn latency_ms(&self) -> f64 {
        match self {
            ProbeOutcome::Connected(elapsed) => elapsed.as_secs_f64() * 1000.0,
            ProbeOutcome::Failed(_) => FAILED_LATENCY_MS,
        }
    }
}

/// Something that can check whether an endpoint accepts connections.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Attempt one connection to `host:port`.
    ///
    /// Only a malformed target is an error.
    async fn probe(&self, host: &str, port: u16) -> Result<ProbeOutcome, ProbeError>;
}
