//! Gateway webhook payloads.
//!
//! Each gateway gets its own variant of [`GatewayWebhook`]; the variant
//! decides which status table applies when the payload is turned into a
//! [`PaymentConfirmation`]. Call sites never branch on payload shape.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::{
  Error, Result,
  confirmation::{Amount, PaymentConfirmation},
  status::{CanonicalStatus, Gateway},
};

// ─── Wire shape ──────────────────────────────────────────────────────────────

/// `{ "event": {...}, "invoices": {...} }`: the envelope every gateway in
/// this domain posts.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceEnvelope {
  #[serde(default)]
  pub event:    Option<serde_json::Value>,
  pub invoices: InvoicePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePayload {
  /// The correlation id supplied when the invoice was created.
  pub external_id: String,
  #[serde(default)]
  pub id:          Option<InvoiceRef>,
  #[serde(default)]
  pub token:       Option<String>,
  pub status:      StatusPayload,
  #[serde(default)]
  pub prices:      Option<PricesPayload>,
}

/// Invoice ids arrive as strings from some gateways and as numbers from
/// others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InvoiceRef {
  Text(String),
  Number(i64),
}

impl InvoiceRef {
  fn into_key(self) -> String {
    match self {
      Self::Text(s) => s,
      Self::Number(n) => n.to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
  pub code:  i64,
  #[serde(default)]
  pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricesPayload {
  pub total: Amount,
}

// ─── Tagged variant ──────────────────────────────────────────────────────────

/// A structurally valid webhook, tagged with the gateway that sent it.
#[derive(Debug, Clone)]
pub enum GatewayWebhook {
  SuperPay(InvoiceEnvelope),
  SuperPayBr(InvoiceEnvelope),
  TryploPay(InvoiceEnvelope),
}

impl GatewayWebhook {
  /// Parse `body` as a webhook from `gateway`.
  ///
  /// Fails with [`Error::Validation`] unless the body is a JSON object with
  /// a non-empty `invoices.external_id` and an integer `invoices.status.code`.
  /// Returns the raw payload alongside for audit storage.
  pub fn parse(gateway: Gateway, body: &[u8]) -> Result<(Self, serde_json::Value)> {
    let raw: serde_json::Value = serde_json::from_slice(body)
      .map_err(|e| Error::Validation(format!("body is not JSON: {e}")))?;
    if !raw.is_object() {
      return Err(Error::Validation("body is not a JSON object".into()));
    }

    let envelope: InvoiceEnvelope = serde_json::from_value(raw.clone())
      .map_err(|e| Error::Validation(e.to_string()))?;
    if envelope.invoices.external_id.trim().is_empty() {
      return Err(Error::Validation("invoices.external_id is empty".into()));
    }

    let webhook = match gateway {
      Gateway::SuperPay => Self::SuperPay(envelope),
      Gateway::SuperPayBr => Self::SuperPayBr(envelope),
      Gateway::TryploPay => Self::TryploPay(envelope),
    };
    Ok((webhook, raw))
  }

  pub fn gateway(&self) -> Gateway {
    match self {
      Self::SuperPay(_) => Gateway::SuperPay,
      Self::SuperPayBr(_) => Gateway::SuperPayBr,
      Self::TryploPay(_) => Gateway::TryploPay,
    }
  }

  pub fn envelope(&self) -> &InvoiceEnvelope {
    match self {
      Self::SuperPay(e) | Self::SuperPayBr(e) | Self::TryploPay(e) => e,
    }
  }

  pub fn correlation_id(&self) -> &str { self.envelope().invoices.external_id.trim() }

  /// The canonical status this webhook maps to under its gateway's table.
  pub fn canonical_status(&self) -> CanonicalStatus {
    self.gateway().canonicalize(self.envelope().invoices.status.code)
  }

  /// Build the canonical record for a webhook that arrived at
  /// `received_at`. `ttl` fixes `expires_at` should this be the first
  /// record for its correlation id.
  pub fn into_confirmation(
    self,
    raw: serde_json::Value,
    received_at: DateTime<Utc>,
    ttl: Duration,
  ) -> PaymentConfirmation {
    let gateway = self.gateway();
    let canonical_status = self.canonical_status();
    let invoices = match self {
      Self::SuperPay(e) | Self::SuperPayBr(e) | Self::TryploPay(e) => e.invoices,
    };

    PaymentConfirmation {
      correlation_id: invoices.external_id.trim().to_owned(),
      gateway_invoice_id: invoices.id.map(InvoiceRef::into_key),
      gateway_token: invoices.token.filter(|t| !t.is_empty()),
      gateway,
      status_code: invoices.status.code,
      canonical_status,
      amount: invoices.prices.map(|p| p.total).unwrap_or_default(),
      paid_at: (canonical_status == CanonicalStatus::Paid).then_some(received_at),
      received_at,
      expires_at: received_at + ttl,
      raw,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn body(external_id: &str, code: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
      "event": { "type": "invoice.update" },
      "invoices": {
        "external_id": external_id,
        "id": 991,
        "token": "tok-1",
        "status": { "code": code, "title": "Pago" },
        "prices": { "total": 27.97 }
      }
    }))
    .unwrap()
  }

  #[test]
  fn parses_into_canonical_record() {
    let (hook, raw) = GatewayWebhook::parse(Gateway::SuperPay, &body("X1", 5)).unwrap();
    assert_eq!(hook.gateway(), Gateway::SuperPay);
    assert_eq!(hook.correlation_id(), "X1");

    let now = Utc::now();
    let record = hook.into_confirmation(raw, now, Duration::minutes(30));
    assert_eq!(record.canonical_status, CanonicalStatus::Paid);
    assert_eq!(record.amount.minor(), 2797);
    assert_eq!(record.gateway_invoice_id.as_deref(), Some("991"));
    assert_eq!(record.gateway_token.as_deref(), Some("tok-1"));
    assert_eq!(record.paid_at, Some(now));
    assert_eq!(record.expires_at, now + Duration::minutes(30));
  }

  #[test]
  fn same_code_differs_per_gateway() {
    let (superpay, _) = GatewayWebhook::parse(Gateway::SuperPay, &body("X", 9)).unwrap();
    let (br, _) = GatewayWebhook::parse(Gateway::SuperPayBr, &body("X", 9)).unwrap();
    assert_eq!(superpay.canonical_status(), CanonicalStatus::Expired);
    assert_eq!(br.canonical_status(), CanonicalStatus::Canceled);
  }

  #[test]
  fn minimum_shape_is_enough() {
    let minimal = br#"{"invoices":{"external_id":"M1","status":{"code":1}}}"#;
    let (hook, raw) = GatewayWebhook::parse(Gateway::TryploPay, minimal).unwrap();
    let record = hook.into_confirmation(raw, Utc::now(), Duration::minutes(5));
    assert_eq!(record.amount, Amount::ZERO);
    assert!(record.gateway_invoice_id.is_none());
    assert_eq!(record.canonical_status, CanonicalStatus::Pending);
  }

  #[test]
  fn malformed_payloads_are_rejected() {
    let cases: [&[u8]; 6] = [
      b"not json",
      b"[]",
      br#"{"event":{}}"#,
      br#"{"invoices":{"status":{"code":5}}}"#,
      br#"{"invoices":{"external_id":"X","status":{"title":"Pago"}}}"#,
      br#"{"invoices":{"external_id":"  ","status":{"code":5}}}"#,
    ];
    for case in cases {
      let err = GatewayWebhook::parse(Gateway::SuperPay, case).unwrap_err();
      assert!(matches!(err, Error::Validation(_)), "{err:?}");
    }
  }
}
