//! [`SqliteArchive`], the SQLite implementation of [`ConfirmationArchive`]
//! and [`ChangeFeed`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;

use paywire_core::{
  ChangeEvent, ChangeFeed, ConfirmationArchive, LookupKey, PaymentConfirmation,
};

use crate::{
  Result,
  encode::{CONFIRMATION_COLUMNS, RawChange, RawConfirmation, encode_dt},
  schema::SCHEMA,
  Error,
};

// ─── Archive ─────────────────────────────────────────────────────────────────

/// A confirmation archive backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteArchive {
  conn: tokio_rusqlite::Connection,
}

impl SqliteArchive {
  /// Open (or create) an archive at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let archive = Self { conn };
    archive.init_schema().await?;
    Ok(archive)
  }

  /// Open an in-memory archive, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let archive = Self { conn };
    archive.init_schema().await?;
    Ok(archive)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Every change-feed event recorded for one correlation id, oldest first.
  /// The audit trail for a checkout attempt.
  pub async fn history(&self, correlation_id: &str) -> Result<Vec<ChangeEvent>> {
    let id = correlation_id.to_owned();
    let raws: Vec<RawChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT seq, origin, recorded_at, record_json
           FROM confirmation_changes
           WHERE correlation_id = ?1
           ORDER BY seq",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id], raw_change)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawChange::into_event).collect()
  }
}

fn raw_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChange> {
  Ok(RawChange {
    seq:         row.get(0)?,
    origin:      row.get(1)?,
    recorded_at: row.get(2)?,
    record_json: row.get(3)?,
  })
}

// ─── ConfirmationArchive impl ────────────────────────────────────────────────

impl ConfirmationArchive for SqliteArchive {
  type Error = Error;

  async fn save(&self, record: &PaymentConfirmation, origin: &str) -> Result<()> {
    let raw         = RawConfirmation::encode(record)?;
    let record_json = serde_json::to_string(record)?;
    let origin      = origin.to_owned();
    let recorded_at = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          &format!(
            "INSERT INTO confirmations ({CONFIRMATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (correlation_id) DO UPDATE SET
               gateway_invoice_id = excluded.gateway_invoice_id,
               gateway_token      = excluded.gateway_token,
               status_code        = excluded.status_code,
               canonical_status   = excluded.canonical_status,
               amount_minor       = excluded.amount_minor,
               paid_at            = excluded.paid_at,
               received_at        = excluded.received_at,
               raw_json           = excluded.raw_json"
          ),
          rusqlite::params![
            raw.correlation_id,
            raw.gateway,
            raw.gateway_invoice_id,
            raw.gateway_token,
            raw.status_code,
            raw.canonical_status,
            raw.amount_minor,
            raw.paid_at,
            raw.received_at,
            raw.expires_at,
            raw.raw_json,
          ],
        )?;
        tx.execute(
          "INSERT INTO confirmation_changes (correlation_id, origin, recorded_at, record_json)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![raw.correlation_id, origin, recorded_at, record_json],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn find(&self, key: &LookupKey) -> Result<Option<PaymentConfirmation>> {
    let column = match key {
      LookupKey::CorrelationId(_) => "correlation_id",
      LookupKey::InvoiceId(_) => "gateway_invoice_id",
      LookupKey::Token(_) => "gateway_token",
    };
    let value = key.value().to_owned();

    let raw: Option<RawConfirmation> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CONFIRMATION_COLUMNS} FROM confirmations
                 WHERE {column} = ?1
                 ORDER BY received_at DESC
                 LIMIT 1"
              ),
              rusqlite::params![value],
              RawConfirmation::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawConfirmation::into_confirmation).transpose()
  }
}

// ─── ChangeFeed impl ─────────────────────────────────────────────────────────

impl ChangeFeed for SqliteArchive {
  type Error = Error;

  async fn changes_since(&self, after: i64, limit: usize) -> Result<Vec<ChangeEvent>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT seq, origin, recorded_at, record_json
           FROM confirmation_changes
           WHERE seq > ?1
           ORDER BY seq
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![after, limit], raw_change)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawChange::into_event).collect()
  }

  async fn head(&self) -> Result<i64> {
    let head = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT COALESCE(MAX(seq), 0) FROM confirmation_changes",
          [],
          |r| r.get::<_, i64>(0),
        )?)
      })
      .await?;
    Ok(head)
  }
}
