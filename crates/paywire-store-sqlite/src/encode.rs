//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, enums as their snake_case
//! names, amounts as integer minor units, the raw payload as compact JSON.

use std::str::FromStr as _;

use chrono::{DateTime, Utc};
use paywire_core::{
  Amount, CanonicalStatus, ChangeEvent, Gateway, PaymentConfirmation,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_gateway(s: &str) -> Result<Gateway> {
  Gateway::from_str(s).map_err(|_| Error::UnknownValue {
    column: "gateway",
    value:  s.to_owned(),
  })
}

pub fn decode_status(s: &str) -> Result<CanonicalStatus> {
  CanonicalStatus::from_str(s).map_err(|_| Error::UnknownValue {
    column: "canonical_status",
    value:  s.to_owned(),
  })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column values for one `confirmations` row, ready to bind or just read.
pub struct RawConfirmation {
  pub correlation_id:     String,
  pub gateway:            String,
  pub gateway_invoice_id: Option<String>,
  pub gateway_token:      Option<String>,
  pub status_code:        i64,
  pub canonical_status:   String,
  pub amount_minor:       i64,
  pub paid_at:            Option<String>,
  pub received_at:        String,
  pub expires_at:         String,
  pub raw_json:           String,
}

/// The column list matching [`RawConfirmation::from_row`].
pub const CONFIRMATION_COLUMNS: &str = "correlation_id, gateway, gateway_invoice_id, \
   gateway_token, status_code, canonical_status, amount_minor, paid_at, \
   received_at, expires_at, raw_json";

impl RawConfirmation {
  pub fn encode(record: &PaymentConfirmation) -> Result<Self> {
    Ok(Self {
      correlation_id:     record.correlation_id.clone(),
      gateway:            record.gateway.as_ref().to_owned(),
      gateway_invoice_id: record.gateway_invoice_id.clone(),
      gateway_token:      record.gateway_token.clone(),
      status_code:        record.status_code,
      canonical_status:   record.canonical_status.as_ref().to_owned(),
      amount_minor:       record.amount.minor(),
      paid_at:            record.paid_at.map(encode_dt),
      received_at:        encode_dt(record.received_at),
      expires_at:         encode_dt(record.expires_at),
      raw_json:           serde_json::to_string(&record.raw)?,
    })
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      correlation_id:     row.get(0)?,
      gateway:            row.get(1)?,
      gateway_invoice_id: row.get(2)?,
      gateway_token:      row.get(3)?,
      status_code:        row.get(4)?,
      canonical_status:   row.get(5)?,
      amount_minor:       row.get(6)?,
      paid_at:            row.get(7)?,
      received_at:        row.get(8)?,
      expires_at:         row.get(9)?,
      raw_json:           row.get(10)?,
    })
  }

  pub fn into_confirmation(self) -> Result<PaymentConfirmation> {
    Ok(PaymentConfirmation {
      correlation_id:     self.correlation_id,
      gateway_invoice_id: self.gateway_invoice_id,
      gateway_token:      self.gateway_token,
      gateway:            decode_gateway(&self.gateway)?,
      status_code:        self.status_code,
      canonical_status:   decode_status(&self.canonical_status)?,
      amount:             Amount::from_minor(self.amount_minor),
      paid_at:            self.paid_at.as_deref().map(decode_dt).transpose()?,
      received_at:        decode_dt(&self.received_at)?,
      expires_at:         decode_dt(&self.expires_at)?,
      raw:                serde_json::from_str(&self.raw_json)?,
    })
  }
}

/// Raw strings read directly from a `confirmation_changes` row.
pub struct RawChange {
  pub seq:         i64,
  pub origin:      String,
  pub recorded_at: String,
  pub record_json: String,
}

impl RawChange {
  pub fn into_event(self) -> Result<ChangeEvent> {
    Ok(ChangeEvent {
      seq:         self.seq,
      origin:      self.origin,
      recorded_at: decode_dt(&self.recorded_at)?,
      record:      serde_json::from_str(&self.record_json)?,
    })
  }
}
