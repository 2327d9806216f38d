//! [`ConfirmationStore`]: the two-tier store that exclusively owns writes.
//!
//! Reads are cache-aside: the volatile tier answers while a record is live,
//! the durable tier answers afterwards (and for anything the cache never
//! saw). Writes are serialised per correlation id, decided by
//! [`apply_update`], committed to the volatile tier and handed to the
//! write-behind queue.
//!
//! An update that arrives while the durable tier is unreadable, with nothing
//! cached for its key, is not decided here: it is handed to the writer, which
//! decides it against the durable record once it can be read. Terminal
//! changes decided that way come out of [`ConfirmationStore::take_settled`].

use std::sync::{Arc, Mutex};

use chrono::Utc;
use paywire_core::{
  Applied, ConfirmationArchive, LookupKey, PaymentConfirmation, apply_update,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
  Error, Result,
  cache::Cache,
  persist::{RetryPolicy, WriteBehind},
};

pub struct ConfirmationStore<A> {
  cache:   Arc<Cache>,
  archive: Arc<A>,
  writer:  WriteBehind,
  settled: Mutex<Option<mpsc::UnboundedReceiver<PaymentConfirmation>>>,
}

impl<A: ConfirmationArchive> ConfirmationStore<A> {
  /// Build a store over `archive` and spawn its persistence writer, which
  /// tags durable writes with `origin`. Must be called inside a tokio
  /// runtime.
  pub fn new(archive: Arc<A>, origin: impl Into<String>, policy: RetryPolicy) -> Self {
    let cache = Arc::new(Cache::default());
    let (settled_tx, settled) = mpsc::unbounded_channel();
    let writer = WriteBehind::spawn(
      archive.clone(),
      cache.clone(),
      origin.into(),
      policy,
      settled_tx,
    );
    Self { cache, archive, writer, settled: Mutex::new(Some(settled)) }
  }

  /// Terminal records decided by the persistence writer after a deferred
  /// upsert. Only the first caller gets the receiver.
  pub fn take_settled(&self) -> Option<mpsc::UnboundedReceiver<PaymentConfirmation>> {
    self.settled.lock().ok()?.take()
  }

  /// Apply `incoming` under the tie-break rule.
  ///
  /// Returns once the volatile tier is updated; the durable write happens
  /// later. If the durable tier cannot be read on a cache miss the update is
  /// deferred: nothing is cached, `changed` is false, and the writer decides
  /// it once the durable record is readable.
  pub async fn upsert(&self, incoming: PaymentConfirmation) -> Applied {
    let lock = self.cache.lock_for(&incoming.correlation_id);
    let _guard = lock.lock().await;

    let key = LookupKey::CorrelationId(incoming.correlation_id.clone());
    let (stored, cold) = match self.cache.peek(&key) {
      Some(hit) => (Some(hit), false),
      None => match self.archive.find(&key).await {
        Ok(found) => (found, true),
        Err(e) => {
          warn!(
            correlation_id = %incoming.correlation_id,
            error = %e,
            "durable read failed during upsert; deferring to the persistence writer"
          );
          self.writer.defer(incoming.clone());
          return Applied { record: incoming, changed: false };
        }
      },
    };

    let applied = apply_update(stored.as_ref(), incoming);
    if applied.changed {
      self.cache.put(applied.record.clone());
      self.writer.enqueue(applied.record.clone());
    } else if cold && !applied.record.is_expired(Utc::now()) {
      self.cache.fill(applied.record.clone());
    }

    debug!(
      correlation_id = %applied.record.correlation_id,
      status = %applied.record.canonical_status,
      changed = applied.changed,
      "upsert"
    );
    applied
  }

  /// Look a record up by any key. Expired records are still returned from
  /// the durable tier but are never put back in the cache.
  pub async fn get(&self, key: &LookupKey) -> Result<Option<PaymentConfirmation>> {
    let now = Utc::now();
    if let Some(hit) = self.cache.peek(key) {
      if !hit.is_expired(now) {
        return Ok(Some(hit));
      }
      self.cache.remove(&hit.correlation_id);
    }

    let found = self.archive.find(key).await.map_err(Error::persistence)?;
    if let Some(record) = found.as_ref().filter(|r| !r.is_expired(now)) {
      self.cache.fill(record.clone());
    }
    Ok(found)
  }

  /// The live volatile record for `key`, without touching the durable tier.
  pub fn get_cached(&self, key: &LookupKey) -> Option<PaymentConfirmation> {
    self
      .cache
      .peek(key)
      .filter(|r| !r.is_expired(Utc::now()))
  }

  /// Merge a record another instance wrote into the volatile tier.
  pub async fn absorb(&self, record: PaymentConfirmation) -> bool {
    self.cache.absorb(record).await
  }

  /// Remove expired records from the volatile tier.
  pub fn evict_expired(&self) -> usize { self.cache.evict_expired(Utc::now()) }

  /// Number of records held in the volatile tier.
  pub fn cached_len(&self) -> usize { self.cache.len() }

  /// Wait until every accepted write has been attempted against the durable
  /// tier.
  pub async fn flush(&self) { self.writer.flush().await }

  pub fn archive(&self) -> &Arc<A> { &self.archive }
}
