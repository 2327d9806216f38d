//! The durable-tier traits and supporting query types.
//!
//! [`ConfirmationArchive`] is implemented by storage backends (e.g.
//! `paywire-store-sqlite`). The two-tier store in `paywire-hub` and the
//! change-feed consumers depend on these abstractions, not on any concrete
//! backend.

use std::{fmt, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confirmation::PaymentConfirmation;

// ─── Lookup key ──────────────────────────────────────────────────────────────

/// Any of the three keys a confirmation can be found by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LookupKey {
  CorrelationId(String),
  InvoiceId(String),
  Token(String),
}

impl LookupKey {
  pub fn value(&self) -> &str {
    match self {
      Self::CorrelationId(v) | Self::InvoiceId(v) | Self::Token(v) => v,
    }
  }
}

impl fmt::Display for LookupKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::CorrelationId(v) => write!(f, "correlation id {v:?}"),
      Self::InvoiceId(v) => write!(f, "invoice id {v:?}"),
      Self::Token(v) => write!(f, "token {v:?}"),
    }
  }
}

// ─── Change feed ─────────────────────────────────────────────────────────────

/// One durable write, as seen by change-feed subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
  /// Monotonically increasing position in the feed.
  pub seq:         i64,
  /// The instance that performed the write.
  pub origin:      String,
  pub recorded_at: DateTime<Utc>,
  pub record:      PaymentConfirmation,
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// The durable tier: long-lived owner of confirmation history.
///
/// The archive does not apply the tie-break rule; the two-tier store decides
/// what to write and serialises writes per correlation id.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait ConfirmationArchive: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Insert or replace the record for `record.correlation_id` and append a
  /// [`ChangeEvent`] tagged with `origin`, atomically.
  fn save<'a>(
    &'a self,
    record: &'a PaymentConfirmation,
    origin: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Find a record by any of its keys, expired or not.
  fn find<'a>(
    &'a self,
    key: &'a LookupKey,
  ) -> impl Future<Output = Result<Option<PaymentConfirmation>, Self::Error>> + Send + 'a;
}

/// A tail-able, ordered feed of durable writes. This is the cross-instance
/// notification path: in-process channel registries only see local writes.
pub trait ChangeFeed: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Events with `seq > after`, oldest first, at most `limit`.
  fn changes_since(
    &self,
    after: i64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ChangeEvent>, Self::Error>> + Send + '_;

  /// The current head of the feed (`0` when empty).
  fn head(&self) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;
}
