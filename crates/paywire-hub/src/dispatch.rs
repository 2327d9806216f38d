//! The notification dispatcher: a registry of one-shot channels keyed by
//! correlation id.
//!
//! A channel is delivered at most once. Publishing removes every channel
//! registered for the key before sending, so a second terminal update for
//! the same key finds nothing to deliver to. Subscribing registers first and
//! reads the store second; a terminal record written in between is either
//! seen by the read or published into the already-registered channel.

use std::{
  sync::{Arc, Mutex},
  time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use paywire_core::{ConfirmationArchive, LookupKey, PaymentConfirmation};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::ConfirmationStore;

// ─── Handles and states ──────────────────────────────────────────────────────

/// Identifies one registered channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
  pub id:             Uuid,
  pub correlation_id: String,
}

/// Lifecycle of a channel as seen by its subscription. `Delivered` and
/// `TimedOut` are final; the channel is closed when the subscription drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
  Open,
  Delivered,
  TimedOut,
  Closed,
}

/// What a subscription resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
  Delivered(PaymentConfirmation),
  TimedOut,
}

struct Slot {
  id:               Uuid,
  created_at:       DateTime<Utc>,
  last_activity_at: Mutex<DateTime<Utc>>,
  deadline:         Instant,
  tx:               oneshot::Sender<PaymentConfirmation>,
}

/// Shared registry. Subscriptions keep an `Arc` to it so they can
/// unregister themselves on drop.
#[derive(Default)]
pub(crate) struct Registry {
  channels: DashMap<String, Vec<Slot>>,
}

impl Registry {
  fn register(
    &self,
    correlation_id: &str,
    deadline: Instant,
  ) -> (Uuid, oneshot::Receiver<PaymentConfirmation>) {
    let (tx, rx) = oneshot::channel();
    let id = Uuid::new_v4();
    let now = Utc::now();
    self
      .channels
      .entry(correlation_id.to_owned())
      .or_default()
      .push(Slot {
        id,
        created_at: now,
        last_activity_at: Mutex::new(now),
        deadline,
        tx,
      });
    (id, rx)
  }

  fn take(&self, handle: &ChannelHandle) -> Option<Slot> {
    let slot = {
      let mut slots = self.channels.get_mut(&handle.correlation_id)?;
      let pos = slots.iter().position(|s| s.id == handle.id)?;
      slots.swap_remove(pos)
    };
    self
      .channels
      .remove_if(&handle.correlation_id, |_, slots| slots.is_empty());
    Some(slot)
  }

  fn publish(&self, record: &PaymentConfirmation) -> usize {
    let Some((_, slots)) = self.channels.remove(&record.correlation_id) else {
      return 0;
    };
    slots
      .into_iter()
      .filter_map(|slot| slot.tx.send(record.clone()).ok())
      .count()
  }

  fn touch(&self, handle: &ChannelHandle) {
    let Some(slots) = self.channels.get(&handle.correlation_id) else {
      return;
    };
    if let Some(mut at) = slots
      .iter()
      .find(|s| s.id == handle.id)
      .and_then(|s| s.last_activity_at.lock().ok())
    {
      *at = Utc::now();
    }
  }

  /// Pull a channel's deadline in to `deadline` if that is sooner.
  fn clamp(&self, handle: &ChannelHandle, deadline: Instant) {
    let Some(mut slots) = self.channels.get_mut(&handle.correlation_id) else {
      return;
    };
    if let Some(slot) = slots.iter_mut().find(|s| s.id == handle.id) {
      slot.deadline = slot.deadline.min(deadline);
    }
  }

  fn sweep(&self, now: Instant) -> usize {
    let mut swept = 0;
    self.channels.retain(|correlation_id, slots| {
      slots.retain(|slot| {
        let live = slot.deadline > now && !slot.tx.is_closed();
        if !live {
          let idle_since = slot
            .last_activity_at
            .lock()
            .map(|at| *at)
            .unwrap_or(slot.created_at);
          debug!(
            correlation_id = %correlation_id,
            channel = %slot.id,
            created_at = %slot.created_at,
            idle_since = %idle_since,
            "sweeping idle channel"
          );
          swept += 1;
        }
        live
      });
      !slots.is_empty()
    });
    swept
  }

  fn len(&self) -> usize { self.channels.iter().map(|r| r.value().len()).sum() }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// The receiving end of a channel. Dropping it unregisters the channel.
pub struct Subscription {
  handle:   ChannelHandle,
  deadline: Instant,
  rx:       oneshot::Receiver<PaymentConfirmation>,
  state:    ChannelState,
  registry: Arc<Registry>,
}

impl Subscription {
  pub fn handle(&self) -> &ChannelHandle { &self.handle }

  pub fn state(&self) -> ChannelState { self.state }

  pub fn deadline(&self) -> Instant { self.deadline }

  /// Wait for the terminal record or the channel's deadline. Returns `None`
  /// once the channel has already resolved.
  ///
  /// Cancel safe: dropping the future before it resolves leaves the channel
  /// open.
  pub async fn recv(&mut self) -> Option<Delivery> {
    if self.state != ChannelState::Open {
      return None;
    }
    let delivery = match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
      Ok(Ok(record)) => {
        self.state = ChannelState::Delivered;
        Delivery::Delivered(record)
      }
      // The sender went away (swept or unsubscribed) or the deadline hit.
      Ok(Err(_)) | Err(_) => {
        self.state = ChannelState::TimedOut;
        Delivery::TimedOut
      }
    };
    Some(delivery)
  }

  /// Unregister now rather than on drop. Any pending delivery is discarded.
  pub fn close(&mut self) {
    self.registry.take(&self.handle);
    self.rx.close();
    self.state = ChannelState::Closed;
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.registry.take(&self.handle);
  }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct Dispatcher<A> {
  store:       Arc<ConfirmationStore<A>>,
  registry:    Arc<Registry>,
  channel_ttl: Duration,
}

impl<A: ConfirmationArchive> Dispatcher<A> {
  pub fn new(store: Arc<ConfirmationStore<A>>, channel_ttl: Duration) -> Self {
    Self { store, registry: Arc::default(), channel_ttl }
  }

  /// Open a channel for `correlation_id`.
  ///
  /// If a terminal record already exists it is delivered straight into the
  /// new channel. The deadline is the channel TTL, shortened to the record's
  /// own expiry when one is known.
  pub async fn subscribe(&self, correlation_id: &str) -> Subscription {
    let mut deadline = Instant::now() + self.channel_ttl;
    let (id, rx) = self.registry.register(correlation_id, deadline);
    let handle = ChannelHandle { id, correlation_id: correlation_id.to_owned() };

    match self
      .store
      .get(&LookupKey::CorrelationId(correlation_id.to_owned()))
      .await
    {
      Ok(Some(record)) if record.is_terminal() => {
        self.deliver_to(&handle, &record);
      }
      Ok(Some(record)) => {
        let remaining = (record.expires_at - Utc::now())
          .to_std()
          .unwrap_or_default();
        deadline = deadline.min(Instant::now() + remaining);
        self.registry.clamp(&handle, deadline);
      }
      Ok(None) => {}
      Err(e) => {
        warn!(correlation_id, error = %e, "store read failed while subscribing");
      }
    }

    Subscription {
      handle,
      deadline,
      rx,
      state: ChannelState::Open,
      registry: self.registry.clone(),
    }
  }

  /// Deliver `record` to every channel open for its correlation id and
  /// close them. Returns how many channels received it.
  pub fn publish(&self, record: &PaymentConfirmation) -> usize {
    let delivered = self.registry.publish(record);
    debug!(
      correlation_id = %record.correlation_id,
      status = %record.canonical_status,
      delivered,
      "published"
    );
    delivered
  }

  /// Deliver to one specific channel.
  pub fn deliver_to(&self, handle: &ChannelHandle, record: &PaymentConfirmation) -> bool {
    self
      .registry
      .take(handle)
      .is_some_and(|slot| slot.tx.send(record.clone()).is_ok())
  }

  /// Close a channel without delivering. Its subscription resolves as timed
  /// out.
  pub fn unsubscribe(&self, handle: &ChannelHandle) -> bool {
    self.registry.take(handle).is_some()
  }

  /// Record client activity (e.g. a heartbeat written to the stream).
  pub fn touch(&self, handle: &ChannelHandle) { self.registry.touch(handle) }

  /// Close every channel past its deadline or whose receiver is gone.
  pub fn sweep_idle(&self) -> usize { self.registry.sweep(Instant::now()) }

  /// Number of open channels.
  pub fn open_channels(&self) -> usize { self.registry.len() }
}
