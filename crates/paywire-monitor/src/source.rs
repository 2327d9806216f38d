//! The two seams the monitor resolves a payment through: point lookups and
//! push streams.

use futures::stream::BoxStream;
use paywire_core::PaymentConfirmation;

use crate::error::SourceError;

/// One item on a push stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
  Connected,
  Heartbeat,
  /// The terminal record. Nothing follows it.
  Terminal(PaymentConfirmation),
  /// The server closed the channel without a delivery.
  TimedOut,
}

pub type PushStream = BoxStream<'static, Result<PushEvent, SourceError>>;

/// Point lookups of the current record.
pub trait StatusSource: Send + Sync {
  /// `Ok(None)` means not found yet, which is not a denial.
  fn lookup<'a>(
    &'a self,
    correlation_id: &'a str,
  ) -> impl Future<Output = Result<Option<PaymentConfirmation>, SourceError>> + Send + 'a;
}

/// Push-style subscriptions: server-sent events or a change feed.
pub trait PushSource: Send + Sync {
  fn open<'a>(
    &'a self,
    correlation_id: &'a str,
  ) -> impl Future<Output = Result<PushStream, SourceError>> + Send + 'a;
}

/// A push source that never opens, for poll-only monitors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPush;

impl PushSource for NoPush {
  async fn open(&self, _correlation_id: &str) -> Result<PushStream, SourceError> {
    Err(SourceError::Decode("push is not configured".into()))
  }
}

/// Tries `primary` first and opens `secondary` only if that fails, e.g. the
/// server's event stream backed by a direct change-feed subscription.
#[derive(Debug, Clone)]
pub struct Chain<A, B> {
  pub primary:   A,
  pub secondary: B,
}

impl<A: PushSource, B: PushSource> PushSource for Chain<A, B> {
  async fn open(&self, correlation_id: &str) -> Result<PushStream, SourceError> {
    match self.primary.open(correlation_id).await {
      Ok(stream) => Ok(stream),
      Err(e) => {
        tracing::debug!(error = %e, "primary push source failed to open");
        self.secondary.open(correlation_id).await
      }
    }
  }
}
