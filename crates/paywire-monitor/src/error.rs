//! Error types for `paywire-monitor`.
//!
//! These describe the monitoring process, never the payment: a timeout or an
//! unreachable server says nothing about whether the customer paid.

use thiserror::Error;

/// A failure talking to a status or push source.
#[derive(Debug, Error)]
pub enum SourceError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("unexpected HTTP status {0}")]
  Status(u16),

  #[error("undecodable reply: {0}")]
  Decode(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Error)]
pub enum MonitorError {
  /// No terminal status within the attempt bound.
  #[error("no terminal status after {attempts} polls")]
  Timeout { attempts: u32 },

  /// The status source kept failing until the attempt bound was reached.
  #[error("status source unavailable after {attempts} attempts: {source}")]
  Unavailable {
    attempts: u32,
    #[source]
    source:   SourceError,
  },

  #[error("invalid monitor config: {0}")]
  InvalidConfig(String),
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
