//! Integration tests for `SqliteArchive` against an in-memory database.

use chrono::{Duration, TimeZone as _, Utc};
use paywire_core::{
  Amount, CanonicalStatus, ChangeFeed, ConfirmationArchive, Gateway, LookupKey,
  PaymentConfirmation,
};

use crate::SqliteArchive;

async fn archive() -> SqliteArchive {
  SqliteArchive::open_in_memory()
    .await
    .expect("in-memory archive")
}

fn confirmation(id: &str, code: i64) -> PaymentConfirmation {
  let received_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
  let canonical_status = Gateway::SuperPay.canonicalize(code);
  PaymentConfirmation {
    correlation_id:     id.into(),
    gateway_invoice_id: Some(format!("inv-{id}")),
    gateway_token:      Some(format!("tok-{id}")),
    gateway:            Gateway::SuperPay,
    status_code:        code,
    canonical_status,
    amount:             Amount::from_minor(2797),
    paid_at:            (canonical_status == CanonicalStatus::Paid).then_some(received_at),
    received_at,
    expires_at:         received_at + Duration::minutes(30),
    raw:                serde_json::json!({ "invoices": { "external_id": id } }),
  }
}

// ─── Save / find ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn save_and_find_by_correlation_id() {
  let a = archive().await;
  let record = confirmation("X1", 5);
  a.save(&record, "node-a").await.unwrap();

  let found = a
    .find(&LookupKey::CorrelationId("X1".into()))
    .await
    .unwrap()
    .expect("record");
  assert_eq!(found, record);
}

#[tokio::test]
async fn find_missing_returns_none() {
  let a = archive().await;
  let found = a.find(&LookupKey::CorrelationId("nope".into())).await.unwrap();
  assert!(found.is_none());
}

#[tokio::test]
async fn all_keys_find_the_same_record() {
  let a = archive().await;
  let record = confirmation("K1", 5);
  a.save(&record, "node-a").await.unwrap();

  let keys = [
    LookupKey::CorrelationId("K1".into()),
    LookupKey::InvoiceId("inv-K1".into()),
    LookupKey::Token("tok-K1".into()),
  ];
  for key in &keys {
    let found = a.find(key).await.unwrap();
    assert_eq!(found.as_ref(), Some(&record), "lookup by {key}");
  }
}

#[tokio::test]
async fn save_replaces_but_keeps_one_row() {
  let a = archive().await;
  let pending = confirmation("R1", 1);
  a.save(&pending, "node-a").await.unwrap();

  let mut paid = confirmation("R1", 5);
  paid.received_at = pending.received_at + Duration::seconds(30);
  a.save(&paid, "node-a").await.unwrap();

  let found = a
    .find(&LookupKey::CorrelationId("R1".into()))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found.canonical_status, CanonicalStatus::Paid);
  assert_eq!(found.expires_at, pending.expires_at);
}

#[tokio::test]
async fn expired_records_stay_in_the_archive() {
  let a = archive().await;
  let mut record = confirmation("E1", 9);
  record.expires_at = Utc::now() - Duration::hours(1);
  a.save(&record, "node-a").await.unwrap();

  let found = a.find(&LookupKey::CorrelationId("E1".into())).await.unwrap();
  assert!(found.is_some_and(|r| r.is_expired(Utc::now())));
}

// ─── Change feed ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_save_appends_a_change() {
  let a = archive().await;
  assert_eq!(a.head().await.unwrap(), 0);

  a.save(&confirmation("C1", 1), "node-a").await.unwrap();
  a.save(&confirmation("C1", 5), "node-b").await.unwrap();
  a.save(&confirmation("C2", 6), "node-a").await.unwrap();

  let head = a.head().await.unwrap();
  assert_eq!(head, 3);

  let all = a.changes_since(0, 100).await.unwrap();
  assert_eq!(all.len(), 3);
  assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));
  assert_eq!(all[1].origin, "node-b");
  assert_eq!(all[1].record.canonical_status, CanonicalStatus::Paid);

  let tail = a.changes_since(all[0].seq, 1).await.unwrap();
  assert_eq!(tail.len(), 1);
  assert_eq!(tail[0].seq, all[1].seq);

  assert!(a.changes_since(head, 100).await.unwrap().is_empty());
}

#[tokio::test]
async fn history_is_per_correlation_id() {
  let a = archive().await;
  a.save(&confirmation("H1", 1), "node-a").await.unwrap();
  a.save(&confirmation("H2", 1), "node-a").await.unwrap();
  a.save(&confirmation("H1", 5), "node-a").await.unwrap();

  let history = a.history("H1").await.unwrap();
  let codes: Vec<i64> = history.iter().map(|e| e.record.status_code).collect();
  assert_eq!(codes, [1, 5]);
}

#[tokio::test]
async fn open_on_disk_is_reopenable() {
  let path = std::env::temp_dir().join(format!(
    "paywire-test-{}-{}.db",
    std::process::id(),
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
  ));

  {
    let a = SqliteArchive::open(&path).await.unwrap();
    a.save(&confirmation("D1", 5), "node-a").await.unwrap();
  }

  let reopened = SqliteArchive::open(&path).await.unwrap();
  let found = reopened
    .find(&LookupKey::CorrelationId("D1".into()))
    .await
    .unwrap();
  assert!(found.is_some());
  assert_eq!(reopened.head().await.unwrap(), 1);

  drop(reopened);
  let _ = std::fs::remove_file(&path);
}
