//! [`FeedSource`]: resolves payments straight from a durable backend, for
//! monitors co-located with the store. Lookups hit the archive; push streams
//! tail the change feed.

use std::{sync::Arc, time::Duration};

use futures::StreamExt as _;
use paywire_core::{ChangeFeed, ConfirmationArchive, LookupKey, PaymentConfirmation};

use crate::{
  error::SourceError,
  source::{PushEvent, PushSource, PushStream, StatusSource},
};

pub struct FeedSource<A> {
  archive: Arc<A>,
  poll:    Duration,
  batch:   usize,
}

impl<A> Clone for FeedSource<A> {
  fn clone(&self) -> Self {
    Self { archive: self.archive.clone(), poll: self.poll, batch: self.batch }
  }
}

impl<A> FeedSource<A> {
  pub fn new(archive: Arc<A>) -> Self {
    Self { archive, poll: Duration::from_millis(500), batch: 256 }
  }

  /// How often the feed is re-read once caught up.
  pub fn with_poll_interval(mut self, poll: Duration) -> Self {
    self.poll = poll;
    self
  }
}

fn store_error(e: impl std::error::Error + Send + Sync + 'static) -> SourceError {
  SourceError::Store(Box::new(e))
}

impl<A: ConfirmationArchive> StatusSource for FeedSource<A> {
  async fn lookup(&self, correlation_id: &str) -> Result<Option<PaymentConfirmation>, SourceError> {
    let key = LookupKey::CorrelationId(correlation_id.to_owned());
    self.archive.find(&key).await.map_err(store_error)
  }
}

impl<A> PushSource for FeedSource<A>
where
  A: ConfirmationArchive + ChangeFeed,
{
  /// Tails the feed from its current head. Writes that landed before the
  /// stream opened are only visible through [`StatusSource::lookup`].
  async fn open(&self, correlation_id: &str) -> Result<PushStream, SourceError> {
    let mut cursor = self.archive.head().await.map_err(store_error)?;
    let archive = self.archive.clone();
    let id = correlation_id.to_owned();
    let (poll, batch) = (self.poll, self.batch);

    let stream = async_stream::stream! {
      yield Ok(PushEvent::Connected);
      loop {
        let events = match archive.changes_since(cursor, batch).await {
          Ok(events) => events,
          Err(e) => {
            yield Err(store_error(e));
            return;
          }
        };
        let caught_up = events.len() < batch;
        let mut found = None;
        for event in events {
          cursor = event.seq;
          if event.record.correlation_id == id && event.record.is_terminal() {
            found = Some(event.record);
            break;
          }
        }
        if let Some(record) = found {
          yield Ok(PushEvent::Terminal(record.public_view()));
          return;
        }
        if caught_up {
          tokio::time::sleep(poll).await;
        }
      }
    };
    Ok(stream.boxed())
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use futures::StreamExt as _;
  use paywire_core::{CanonicalStatus, Gateway, canonicalize};
  use paywire_store_sqlite::SqliteArchive;

  use super::*;

  fn record(id: &str, code: i64) -> PaymentConfirmation {
    let now = Utc::now();
    PaymentConfirmation {
      correlation_id:     id.into(),
      gateway_invoice_id: None,
      gateway_token:      None,
      gateway:            Gateway::SuperPay,
      status_code:        code,
      canonical_status:   canonicalize(Gateway::SuperPay, code),
      amount:             paywire_core::Amount::from_minor(2797),
      paid_at:            None,
      received_at:        now,
      expires_at:         now + chrono::Duration::minutes(30),
      raw:                serde_json::json!({ "code": code }),
    }
  }

  #[tokio::test]
  async fn lookup_reads_the_archive() {
    let archive = Arc::new(SqliteArchive::open_in_memory().await.unwrap());
    let source = FeedSource::new(archive.clone());
    assert!(source.lookup("F1").await.unwrap().is_none());

    archive.save(&record("F1", 2), "node-a").await.unwrap();
    let found = source.lookup("F1").await.unwrap().unwrap();
    assert_eq!(found.canonical_status, CanonicalStatus::Pending);
  }

  #[tokio::test]
  async fn stream_yields_only_the_matching_terminal_write() {
    let archive = Arc::new(SqliteArchive::open_in_memory().await.unwrap());
    let source = FeedSource::new(archive.clone()).with_poll_interval(Duration::from_millis(10));
    let mut stream = source.open("F2").await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), PushEvent::Connected);

    archive.save(&record("F2", 2), "node-a").await.unwrap();
    archive.save(&record("other", 5), "node-a").await.unwrap();
    archive.save(&record("F2", 6), "node-b").await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
      .await
      .unwrap()
      .unwrap()
      .unwrap();
    match next {
      PushEvent::Terminal(rec) => {
        assert_eq!(rec.correlation_id, "F2");
        assert_eq!(rec.canonical_status, CanonicalStatus::Denied);
        assert!(rec.raw.is_null());
      }
      other => panic!("unexpected {other:?}"),
    }
    assert!(stream.next().await.is_none());
  }
}
