//! The canonical payment-confirmation record and the tie-break rule that
//! decides whether a later webhook may replace a stored one.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
  Error, Result,
  status::{CanonicalStatus, Gateway},
};

// ─── Amount ──────────────────────────────────────────────────────────────────

/// A monetary amount held in minor units (centavos).
///
/// Serialised as a decimal JSON number (`27.97`). Parsing goes through the
/// number's decimal text, so `27.97` becomes exactly `2797`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
  pub const ZERO: Amount = Amount(0);

  pub fn from_minor(minor: i64) -> Self { Self(minor) }

  pub fn minor(self) -> i64 { self.0 }

  /// Parse a decimal string such as `"27.97"`, `"-3"` or `"1e3"`.
  /// Digits past the second decimal place are rounded half away from zero.
  pub fn parse_decimal(text: &str) -> Result<Self> {
    let invalid = || Error::InvalidAmount(text.to_owned());
    let text = text.trim();

    if text.contains(['e', 'E']) {
      let value: f64 = text.parse().map_err(|_| invalid())?;
      if !value.is_finite() {
        return Err(invalid());
      }
      return Ok(Self((value * 100.0).round() as i64));
    }

    let (negative, digits) = match text.strip_prefix('-') {
      Some(rest) => (true, rest),
      None => (false, text),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && frac.is_empty() {
      return Err(invalid());
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
      return Err(invalid());
    }

    let whole: i64 = if whole.is_empty() {
      0
    } else {
      whole.parse().map_err(|_| invalid())?
    };
    let mut cents: i64 = frac
      .chars()
      .chain(std::iter::repeat('0'))
      .take(2)
      .collect::<String>()
      .parse()
      .map_err(|_| invalid())?;
    if frac.as_bytes().get(2).is_some_and(|d| *d >= b'5') {
      cents += 1;
    }

    let minor = whole
      .checked_mul(100)
      .and_then(|w| w.checked_add(cents))
      .ok_or_else(invalid)?;
    Ok(Self(if negative { -minor } else { minor }))
  }
}

impl fmt::Display for Amount {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let sign = if self.0 < 0 { "-" } else { "" };
    let abs = self.0.unsigned_abs();
    write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
  }
}

impl Serialize for Amount {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(self.0 as f64 / 100.0)
  }
}

impl<'de> Deserialize<'de> for Amount {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
      Number(serde_json::Number),
      Text(String),
    }

    let text = match Repr::deserialize(deserializer)? {
      Repr::Number(n) => n.to_string(),
      Repr::Text(s) => s,
    };
    Amount::parse_decimal(&text).map_err(serde::de::Error::custom)
  }
}

// ─── PaymentConfirmation ─────────────────────────────────────────────────────

/// The canonical, gateway-agnostic record of a payment callback.
///
/// `correlation_id`, `gateway` and `expires_at` are fixed when the record is
/// first created; later webhooks never change them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
  /// Caller-supplied `external_id`; the primary key.
  pub correlation_id:     String,
  pub gateway_invoice_id: Option<String>,
  pub gateway_token:      Option<String>,
  pub gateway:            Gateway,
  /// Gateway-native code, kept for audit.
  pub status_code:        i64,
  pub canonical_status:   CanonicalStatus,
  pub amount:             Amount,
  pub paid_at:            Option<DateTime<Utc>>,
  /// When the webhook that produced this state arrived.
  pub received_at:        DateTime<Utc>,
  pub expires_at:         DateTime<Utc>,
  /// The gateway's original payload. Never interpreted downstream, and
  /// left out of client-facing replies.
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub raw:                serde_json::Value,
}

impl PaymentConfirmation {
  pub fn is_terminal(&self) -> bool { self.canonical_status.is_terminal() }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.expires_at <= now }

  /// A copy without the raw payload, for client-facing replies.
  pub fn public_view(&self) -> Self {
    Self { raw: serde_json::Value::Null, ..self.clone() }
  }

  /// Returns a copy with `expires_at` derived from `received_at`.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.expires_at = self.received_at + ttl;
    self
  }

  /// Whether two records would look the same to a client. Timestamps of
  /// arrival and the raw payload are not part of the visible state.
  pub fn same_visible_state(&self, other: &Self) -> bool {
    self.canonical_status == other.canonical_status
      && self.status_code == other.status_code
      && self.amount == other.amount
      && self.gateway_invoice_id == other.gateway_invoice_id
      && self.gateway_token == other.gateway_token
  }

  /// The tie-break rule: may `incoming` replace `self`?
  ///
  /// - a different gateway never replaces the stored record;
  /// - an unrecognised code never replaces a recognised one;
  /// - a non-terminal record is always replaceable;
  /// - a terminal record is only replaced by a strictly newer terminal update
  ///   of at least the same authority.
  pub fn yields_to(&self, incoming: &Self) -> bool {
    if self.gateway != incoming.gateway {
      return false;
    }
    if incoming.canonical_status == CanonicalStatus::Unknown
      && self.canonical_status != CanonicalStatus::Unknown
    {
      return false;
    }
    if !self.is_terminal() {
      return true;
    }
    incoming.is_terminal()
      && incoming.received_at > self.received_at
      && incoming.canonical_status.authority() >= self.canonical_status.authority()
  }

  /// Build the record that results from `incoming` replacing `self`,
  /// keeping the immutable fields of the stored record.
  fn merged_with(&self, incoming: Self) -> Self {
    let keeps_payment = matches!(
      incoming.canonical_status,
      CanonicalStatus::Paid | CanonicalStatus::Refunded
    );
    Self {
      correlation_id:     self.correlation_id.clone(),
      gateway_invoice_id: incoming
        .gateway_invoice_id
        .or_else(|| self.gateway_invoice_id.clone()),
      gateway_token:      incoming.gateway_token.or_else(|| self.gateway_token.clone()),
      gateway:            self.gateway,
      status_code:        incoming.status_code,
      canonical_status:   incoming.canonical_status,
      amount:             incoming.amount,
      paid_at:            if keeps_payment {
        self.paid_at.or(incoming.paid_at)
      } else {
        incoming.paid_at
      },
      received_at:        incoming.received_at,
      expires_at:         self.expires_at,
      raw:                incoming.raw,
    }
  }
}

// ─── Upsert decision ─────────────────────────────────────────────────────────

/// The outcome of applying an update to the (possibly absent) stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
  /// The record that is now stored.
  pub record:  PaymentConfirmation,
  /// Whether the visible state changed; gates fan-out.
  pub changed: bool,
}

/// Apply `incoming` on top of `stored` following the tie-break rule.
///
/// Pure: callers are responsible for serialising calls per correlation id.
pub fn apply_update(
  stored: Option<&PaymentConfirmation>,
  incoming: PaymentConfirmation,
) -> Applied {
  let Some(stored) = stored else {
    return Applied { record: incoming, changed: true };
  };

  if !stored.yields_to(&incoming) {
    return Applied { record: stored.clone(), changed: false };
  }

  let merged = stored.merged_with(incoming);
  if merged.same_visible_state(stored) {
    // Replays keep the first-seen record untouched.
    Applied { record: stored.clone(), changed: false }
  } else {
    Applied { record: merged, changed: true }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use chrono::TimeZone as _;

  use super::*;

  pub(crate) fn record(id: &str, code: i64, at_secs: i64) -> PaymentConfirmation {
    let received_at = Utc.timestamp_opt(1_700_000_000 + at_secs, 0).unwrap();
    let canonical_status = Gateway::SuperPay.canonicalize(code);
    PaymentConfirmation {
      correlation_id: id.into(),
      gateway_invoice_id: Some(format!("inv-{id}")),
      gateway_token: None,
      gateway: Gateway::SuperPay,
      status_code: code,
      canonical_status,
      amount: Amount::from_minor(2797),
      paid_at: (canonical_status == CanonicalStatus::Paid).then_some(received_at),
      received_at,
      expires_at: received_at + Duration::minutes(30),
      raw: serde_json::json!({ "code": code }),
    }
  }

  #[test]
  fn amount_parses_exactly() {
    assert_eq!(Amount::parse_decimal("27.97").unwrap().minor(), 2797);
    assert_eq!(Amount::parse_decimal("27.9").unwrap().minor(), 2790);
    assert_eq!(Amount::parse_decimal("27").unwrap().minor(), 2700);
    assert_eq!(Amount::parse_decimal(".5").unwrap().minor(), 50);
    assert_eq!(Amount::parse_decimal("-1.005").unwrap().minor(), -101);
    assert_eq!(Amount::parse_decimal("1e3").unwrap().minor(), 100_000);
    assert!(Amount::parse_decimal("abc").is_err());
    assert!(Amount::parse_decimal("").is_err());
    assert!(Amount::parse_decimal("1.2.3").is_err());
  }

  #[test]
  fn amount_json_is_decimal() {
    let amount: Amount = serde_json::from_str("27.97").unwrap();
    assert_eq!(amount.minor(), 2797);
    assert_eq!(serde_json::to_string(&amount).unwrap(), "27.97");
    assert_eq!(amount.to_string(), "27.97");
    let from_text: Amount = serde_json::from_str("\"10.50\"").unwrap();
    assert_eq!(from_text.minor(), 1050);
  }

  #[test]
  fn insert_when_absent() {
    let applied = apply_update(None, record("X", 1, 0));
    assert!(applied.changed);
    assert_eq!(applied.record.canonical_status, CanonicalStatus::Pending);
  }

  #[test]
  fn pending_then_paid_replaces() {
    let stored = record("X2", 1, 0);
    let applied = apply_update(Some(&stored), record("X2", 5, 10));
    assert!(applied.changed);
    assert_eq!(applied.record.canonical_status, CanonicalStatus::Paid);
    assert_eq!(applied.record.expires_at, stored.expires_at);
  }

  #[test]
  fn paid_is_not_reverted_by_pending_replay() {
    let stored = record("X3", 5, 10);
    let applied = apply_update(Some(&stored), record("X3", 1, 20));
    assert!(!applied.changed);
    assert_eq!(applied.record, stored);
  }

  #[test]
  fn duplicate_delivery_is_a_no_op() {
    let stored = record("X", 5, 0);
    let applied = apply_update(Some(&stored), record("X", 5, 60));
    assert!(!applied.changed);
    assert_eq!(applied.record.received_at, stored.received_at);
  }

  #[test]
  fn refund_after_payment_keeps_paid_at() {
    let stored = record("X", 5, 0);
    let applied = apply_update(Some(&stored), record("X", 8, 60));
    assert!(applied.changed);
    assert_eq!(applied.record.canonical_status, CanonicalStatus::Refunded);
    assert_eq!(applied.record.paid_at, stored.paid_at);
  }

  #[test]
  fn stale_terminal_update_is_ignored() {
    let stored = record("X", 8, 60);
    let applied = apply_update(Some(&stored), record("X", 8, 0));
    assert!(!applied.changed);

    let later_payment = record("X", 5, 120);
    let applied = apply_update(Some(&stored), later_payment);
    assert!(!applied.changed, "paid must not override refunded");
  }

  #[test]
  fn denial_never_overrides_payment() {
    let stored = record("X", 5, 0);
    let applied = apply_update(Some(&stored), record("X", 6, 60));
    assert!(!applied.changed);
    assert_eq!(applied.record.canonical_status, CanonicalStatus::Paid);
  }

  #[test]
  fn unknown_code_never_overrides_known() {
    let stored = record("X", 1, 0);
    let applied = apply_update(Some(&stored), record("X", 42, 60));
    assert!(!applied.changed);
  }

  #[test]
  fn other_gateway_cannot_overwrite() {
    let stored = record("X", 1, 0);
    let mut incoming = record("X", 5, 60);
    incoming.gateway = Gateway::TryploPay;
    assert!(!apply_update(Some(&stored), incoming).changed);
  }
}
