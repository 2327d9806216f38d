//! [`Hub`]: the store and dispatcher wired together, plus the background
//! maintenance loop.

use std::{
  sync::{Arc, Weak},
  time::Duration,
};

use paywire_core::{
  Applied, ChangeFeed, ConfirmationArchive, LookupKey, PaymentConfirmation,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  FeedBridge, Result,
  dispatch::{Dispatcher, Subscription},
  persist::RetryPolicy,
  store::ConfirmationStore,
};

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HubConfig {
  /// Tag written with every durable change; the bridge skips its own.
  pub origin:           String,
  /// Lifetime of a confirmation in the volatile tier.
  pub confirmation_ttl: chrono::Duration,
  /// How long a notification channel stays open without a delivery.
  pub channel_ttl:      Duration,
  pub persist:          RetryPolicy,
  pub sweep_interval:   Duration,
  pub feed_poll:        Duration,
  pub feed_batch:       usize,
}

impl Default for HubConfig {
  fn default() -> Self {
    Self {
      origin:           uuid::Uuid::new_v4().to_string(),
      confirmation_ttl: chrono::Duration::minutes(30),
      channel_ttl:      Duration::from_secs(15 * 60),
      persist:          RetryPolicy {
        max_attempts: 5,
        backoff:      Duration::from_millis(200),
      },
      sweep_interval:   Duration::from_secs(60),
      feed_poll:        Duration::from_millis(500),
      feed_batch:       256,
    }
  }
}

// ─── Hub ─────────────────────────────────────────────────────────────────────

/// Cheap to clone; every clone shares the same store and registry.
pub struct Hub<A> {
  store:      Arc<ConfirmationStore<A>>,
  dispatcher: Arc<Dispatcher<A>>,
  config:     Arc<HubConfig>,
}

impl<A> Clone for Hub<A> {
  fn clone(&self) -> Self {
    Self {
      store:      self.store.clone(),
      dispatcher: self.dispatcher.clone(),
      config:     self.config.clone(),
    }
  }
}

impl<A: ConfirmationArchive> Hub<A> {
  /// Build the hub and spawn its persistence writer.
  pub fn start(archive: Arc<A>, config: HubConfig) -> Self {
    let store = Arc::new(ConfirmationStore::new(
      archive,
      config.origin.clone(),
      config.persist,
    ));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), config.channel_ttl));
    if let Some(settled) = store.take_settled() {
      tokio::spawn(publish_settled(settled, Arc::downgrade(&dispatcher)));
    }
    Self { store, dispatcher, config: Arc::new(config) }
  }

  pub fn store(&self) -> &ConfirmationStore<A> { &self.store }

  pub fn dispatcher(&self) -> &Dispatcher<A> { &self.dispatcher }

  pub fn config(&self) -> &HubConfig { &self.config }

  /// Commit a webhook-derived record and, if it moved the payment into a
  /// terminal state, fan it out to every open channel.
  pub async fn receive(&self, incoming: PaymentConfirmation) -> Applied {
    let applied = self.store.upsert(incoming).await;
    if applied.changed && applied.record.is_terminal() {
      self.dispatcher.publish(&applied.record);
    }
    applied
  }

  pub async fn get(&self, key: &LookupKey) -> Result<Option<PaymentConfirmation>> {
    self.store.get(key).await
  }

  pub async fn subscribe(&self, correlation_id: &str) -> Subscription {
    self.dispatcher.subscribe(correlation_id).await
  }

  /// One maintenance pass: evict expired records, close idle channels.
  pub fn sweep(&self) -> (usize, usize) {
    let evicted = self.store.evict_expired();
    let swept = self.dispatcher.sweep_idle();
    if evicted + swept > 0 {
      debug!(evicted, swept, "sweep");
    }
    (evicted, swept)
  }

  /// Run [`Hub::sweep`] every `sweep_interval` until cancelled.
  pub fn spawn_maintenance(&self, cancel: CancellationToken) -> JoinHandle<()> {
    let hub = self.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(hub.config.sweep_interval);
      interval.tick().await;
      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = interval.tick() => { hub.sweep(); }
        }
      }
      debug!("maintenance loop stopped");
    })
  }

  /// Drain pending durable writes. Call before exit.
  pub async fn shutdown(&self) {
    info!("flushing pending durable writes");
    self.store.flush().await;
  }
}

/// Fan out terminal records the persistence writer decided after a deferred
/// upsert. Ends once the store, and with it the writer, is dropped.
async fn publish_settled<A: ConfirmationArchive>(
  mut settled: mpsc::UnboundedReceiver<PaymentConfirmation>,
  dispatcher: Weak<Dispatcher<A>>,
) {
  while let Some(record) = settled.recv().await {
    let Some(dispatcher) = dispatcher.upgrade() else { break };
    dispatcher.publish(&record);
  }
}

impl<A> Hub<A>
where
  A: ConfirmationArchive + ChangeFeed,
{
  /// Spawn a [`FeedBridge`] tailing the archive's change feed.
  pub async fn spawn_bridge(&self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
    let bridge = FeedBridge::new(self.clone()).await.inspect_err(|e| {
      warn!(error = %e, "could not read change feed head");
    })?;
    Ok(tokio::spawn(bridge.run(cancel)))
  }
}
