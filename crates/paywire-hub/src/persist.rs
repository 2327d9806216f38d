//! Write-behind persistence: a single writer task that drains a queue of
//! records into the durable tier, retrying with exponential backoff.
//!
//! Every write is reconciled against the durable record before it is saved,
//! so the durable tier obeys the same tie-break rule as the volatile one even
//! when several instances share it. When the durable record wins, the cached
//! one is rebased onto it. Failures never reach the webhook path; they are
//! logged and the volatile tier keeps serving.
//!
//! Deferred writes are updates the store could not decide because the
//! durable tier was unreadable. The writer decides them here, caches the
//! outcome, and reports terminal changes on the `settled` channel so they can
//! be fanned out.

use std::{sync::Arc, time::Duration};

use paywire_core::{ConfirmationArchive, LookupKey, PaymentConfirmation, apply_update};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::cache::Cache;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

enum Job {
  Write(PaymentConfirmation),
  Deferred(PaymentConfirmation),
  Flush(oneshot::Sender<()>),
}

/// Retry policy for durable writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff:      Duration,
}

/// Handle to the writer task. Dropping every handle lets the task drain its
/// queue and exit.
#[derive(Clone)]
pub(crate) struct WriteBehind {
  tx: mpsc::UnboundedSender<Job>,
}

impl WriteBehind {
  pub fn spawn<A: ConfirmationArchive>(
    archive: Arc<A>,
    cache: Arc<Cache>,
    origin: String,
    policy: RetryPolicy,
    settled: mpsc::UnboundedSender<PaymentConfirmation>,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = Writer { archive, cache, origin, policy, settled };
    tokio::spawn(writer.run(rx));
    Self { tx }
  }

  pub fn enqueue(&self, record: PaymentConfirmation) { self.send(Job::Write(record)) }

  /// Queue an update whose outcome depends on a durable record that could
  /// not be read.
  pub fn defer(&self, record: PaymentConfirmation) { self.send(Job::Deferred(record)) }

  fn send(&self, job: Job) {
    if self.tx.send(job).is_err() {
      error!("persistence writer has stopped; durable write dropped");
    }
  }

  /// Resolves once every write enqueued before the call has been attempted.
  pub async fn flush(&self) {
    let (done, wait) = oneshot::channel();
    if self.tx.send(Job::Flush(done)).is_ok() {
      let _ = wait.await;
    }
  }
}

struct Writer<A> {
  archive: Arc<A>,
  cache:   Arc<Cache>,
  origin:  String,
  policy:  RetryPolicy,
  settled: mpsc::UnboundedSender<PaymentConfirmation>,
}

/// What reconciling one record against the durable tier decided.
struct Outcome {
  /// The record the durable tier now holds.
  record: PaymentConfirmation,
  /// Whether this write changed it.
  saved:  bool,
}

impl<A: ConfirmationArchive> Writer<A> {
  async fn run(self, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
      match job {
        Job::Write(record) => {
          match self.persist_with_retry(&record).await {
            // The durable record outranks what was cached.
            Some(outcome) if !outcome.saved => self.cache.rebase(outcome.record).await,
            _ => {}
          }
        }
        Job::Deferred(record) => {
          let Some(outcome) = self.persist_with_retry(&record).await else {
            continue;
          };
          self.cache.rebase(outcome.record.clone()).await;
          if outcome.saved && outcome.record.is_terminal() {
            let _ = self.settled.send(outcome.record);
          }
        }
        Job::Flush(done) => {
          let _ = done.send(());
        }
      }
    }
    debug!("persistence writer stopped");
  }

  async fn persist_with_retry(&self, record: &PaymentConfirmation) -> Option<Outcome> {
    let attempts = self.policy.max_attempts.max(1);
    let mut delay = self.policy.backoff;

    for attempt in 1..=attempts {
      match self.reconcile(record).await {
        Ok(outcome) => return Some(outcome),
        Err(e) if attempt < attempts => {
          warn!(
            correlation_id = %record.correlation_id,
            attempt,
            error = %e,
            "durable write failed; retrying in {delay:?}"
          );
          tokio::time::sleep(delay).await;
          delay = (delay * 2).min(MAX_BACKOFF);
        }
        Err(e) => {
          error!(
            correlation_id = %record.correlation_id,
            attempts,
            error = %e,
            "durable write abandoned"
          );
        }
      }
    }
    None
  }

  async fn reconcile(&self, record: &PaymentConfirmation) -> Result<Outcome, A::Error> {
    let key = LookupKey::CorrelationId(record.correlation_id.clone());
    let current = self.archive.find(&key).await?;
    let applied = apply_update(current.as_ref(), record.clone());

    if applied.changed {
      self.archive.save(&applied.record, &self.origin).await?;
      debug!(
        correlation_id = %record.correlation_id,
        status = %applied.record.canonical_status,
        "persisted"
      );
    }
    Ok(Outcome { record: applied.record, saved: applied.changed })
  }
}
