//! [`FeedBridge`]: tails the durable change feed so that writes made by
//! other instances reach this instance's cache and channels.

use std::time::Duration;

use paywire_core::{ChangeFeed, ConfirmationArchive};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Hub, Result};

pub struct FeedBridge<A> {
  hub:    Hub<A>,
  cursor: i64,
  poll:   Duration,
  batch:  usize,
}

impl<A> FeedBridge<A>
where
  A: ConfirmationArchive + ChangeFeed,
{
  /// Start tailing from the current head of the feed; history is not
  /// replayed.
  pub async fn new(hub: Hub<A>) -> Result<Self> {
    let cursor = hub.store().archive().head().await.map_err(Error::persistence)?;
    let poll = hub.config().feed_poll;
    let batch = hub.config().feed_batch;
    Ok(Self { hub, cursor, poll, batch })
  }

  pub fn cursor(&self) -> i64 { self.cursor }

  /// Process one batch of changes. Returns the number of foreign changes
  /// applied.
  pub async fn tick(&mut self) -> Result<usize> {
    let events = self
      .hub
      .store()
      .archive()
      .changes_since(self.cursor, self.batch)
      .await
      .map_err(Error::persistence)?;

    let mut applied = 0;
    for event in events {
      self.cursor = event.seq;
      if event.origin == self.hub.config().origin {
        continue;
      }
      applied += 1;

      let record = event.record;
      let absorbed = self.hub.store().absorb(record.clone()).await;
      let delivered = if record.is_terminal() {
        self.hub.dispatcher().publish(&record)
      } else {
        0
      };
      debug!(
        seq = self.cursor,
        origin = %event.origin,
        correlation_id = %record.correlation_id,
        absorbed,
        delivered,
        "applied foreign change"
      );
    }
    Ok(applied)
  }

  /// Poll until cancelled.
  pub async fn run(mut self, cancel: CancellationToken) {
    info!(cursor = self.cursor, "change feed bridge started");
    let mut interval = tokio::time::interval(self.poll);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = interval.tick() => {
          // Drain backlogs without waiting a full interval per batch.
          loop {
            match self.tick().await {
              Ok(_) if self.caught_up().await => break,
              Ok(_) => {}
              Err(e) => {
                warn!(error = %e, "change feed poll failed");
                break;
              }
            }
          }
        }
      }
    }
    info!(cursor = self.cursor, "change feed bridge stopped");
  }

  async fn caught_up(&self) -> bool {
    match self.hub.store().archive().head().await {
      Ok(head) => head <= self.cursor,
      Err(_) => true,
    }
  }
}
