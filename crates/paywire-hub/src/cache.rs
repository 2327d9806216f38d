//! The volatile tier: a concurrent map of confirmations keyed by correlation
//! id, two secondary indices, and one async mutex per correlation id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use paywire_core::{LookupKey, PaymentConfirmation, apply_update};
use tokio::sync::Mutex;

#[derive(Default)]
pub(crate) struct Cache {
  entries:    DashMap<String, PaymentConfirmation>,
  by_invoice: DashMap<String, String>,
  by_token:   DashMap<String, String>,
  locks:      DashMap<String, Arc<Mutex<()>>>,
}

impl Cache {
  /// The mutex serialising writes for `correlation_id`.
  pub fn lock_for(&self, correlation_id: &str) -> Arc<Mutex<()>> {
    self
      .locks
      .entry(correlation_id.to_owned())
      .or_default()
      .clone()
  }

  fn resolve(&self, key: &LookupKey) -> Option<String> {
    match key {
      LookupKey::CorrelationId(id) => Some(id.clone()),
      LookupKey::InvoiceId(v) => self.by_invoice.get(v).map(|r| r.value().clone()),
      LookupKey::Token(v) => self.by_token.get(v).map(|r| r.value().clone()),
    }
  }

  /// The cached record for `key`, expired or not.
  pub fn peek(&self, key: &LookupKey) -> Option<PaymentConfirmation> {
    let id = self.resolve(key)?;
    let record = self.entries.get(&id)?.value().clone();
    let matches = match key {
      LookupKey::CorrelationId(_) => true,
      LookupKey::InvoiceId(v) => record.gateway_invoice_id.as_deref() == Some(v),
      LookupKey::Token(v) => record.gateway_token.as_deref() == Some(v),
    };
    matches.then_some(record)
  }

  fn index(&self, record: &PaymentConfirmation) {
    if let Some(invoice) = &record.gateway_invoice_id {
      self
        .by_invoice
        .insert(invoice.clone(), record.correlation_id.clone());
    }
    if let Some(token) = &record.gateway_token {
      self
        .by_token
        .insert(token.clone(), record.correlation_id.clone());
    }
  }

  /// Insert or overwrite. Callers hold the key's lock.
  pub fn put(&self, record: PaymentConfirmation) {
    self.index(&record);
    self.entries.insert(record.correlation_id.clone(), record);
  }

  /// Insert only if nothing is cached yet; never clobbers a newer write.
  pub fn fill(&self, record: PaymentConfirmation) {
    if let Entry::Vacant(slot) = self.entries.entry(record.correlation_id.clone()) {
      self.index(&record);
      slot.insert(record);
    }
  }

  pub fn remove(&self, correlation_id: &str) -> Option<PaymentConfirmation> {
    let (_, record) = self.entries.remove(correlation_id)?;
    if let Some(invoice) = &record.gateway_invoice_id {
      self
        .by_invoice
        .remove_if(invoice, |_, id| id == correlation_id);
    }
    if let Some(token) = &record.gateway_token {
      self.by_token.remove_if(token, |_, id| id == correlation_id);
    }
    Some(record)
  }

  /// Apply a record written elsewhere on top of the cached one, if any.
  /// Nothing is cached on a miss: the next read goes to the durable tier.
  pub async fn absorb(&self, record: PaymentConfirmation) -> bool {
    let lock = self.lock_for(&record.correlation_id);
    let _guard = lock.lock().await;

    let key = LookupKey::CorrelationId(record.correlation_id.clone());
    let Some(current) = self.peek(&key) else {
      return false;
    };
    let applied = apply_update(Some(&current), record);
    if applied.changed {
      self.put(applied.record);
    }
    applied.changed
  }

  /// Rebase the cached record onto `durable`, the record the durable tier
  /// holds. A cached write that still outranks it survives; anything else is
  /// replaced. On a miss the durable record is cached unless it has expired.
  pub async fn rebase(&self, durable: PaymentConfirmation) {
    let lock = self.lock_for(&durable.correlation_id);
    let _guard = lock.lock().await;

    let key = LookupKey::CorrelationId(durable.correlation_id.clone());
    match self.peek(&key) {
      Some(cached) => self.put(apply_update(Some(&durable), cached).record),
      None if !durable.is_expired(Utc::now()) => self.put(durable),
      None => {}
    }
  }

  /// Drop every record whose `expires_at` has passed, plus idle key locks.
  pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
    let expired: Vec<String> = self
      .entries
      .iter()
      .filter(|r| r.value().is_expired(now))
      .map(|r| r.key().clone())
      .collect();

    let evicted = expired
      .iter()
      .filter(|id| self.remove(id).is_some())
      .count();

    self.locks.retain(|id, lock| {
      Arc::strong_count(lock) > 1 || self.entries.contains_key(id)
    });
    evicted
  }

  pub fn len(&self) -> usize { self.entries.len() }
}
