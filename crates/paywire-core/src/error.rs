//! Error types for `paywire-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The webhook payload is missing its minimum required shape.
  #[error("invalid webhook payload: {0}")]
  Validation(String),

  #[error("webhook signature rejected")]
  Auth,

  /// No confirmation exists for the key. Distinct from `pending`.
  #[error("confirmation not found: {0}")]
  NotFound(String),

  #[error("invalid amount: {0:?}")]
  InvalidAmount(String),

  #[error("unknown gateway: {0:?}")]
  UnknownGateway(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
