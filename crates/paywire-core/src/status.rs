//! Status taxonomy: gateway-native status codes mapped onto
//! [`CanonicalStatus`].
//!
//! The gateways share some codes (5 is always "paid") but disagree on the
//! cancel, refund and expiry codes, so every lookup goes through the
//! gateway's own table. There is no global table.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ─── Gateway ─────────────────────────────────────────────────────────────────

/// The payment provider that sent a callback.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
pub enum Gateway {
  #[serde(rename = "superpay")]
  #[strum(serialize = "superpay")]
  SuperPay,
  #[serde(rename = "superpay_br")]
  #[strum(serialize = "superpay_br")]
  SuperPayBr,
  #[serde(rename = "tryplopay")]
  #[strum(serialize = "tryplopay")]
  TryploPay,
}

impl Gateway {
  pub const ALL: [Gateway; 3] =
    [Gateway::SuperPay, Gateway::SuperPayBr, Gateway::TryploPay];

  /// Map a native status code through this gateway's table. Total: codes
  /// the table does not know become [`CanonicalStatus::Unknown`].
  pub fn canonicalize(self, code: i64) -> CanonicalStatus {
    match self {
      Self::SuperPay => superpay_table(code),
      Self::SuperPayBr => superpay_br_table(code),
      Self::TryploPay => tryplopay_table(code),
    }
  }
}

// ─── Canonical status ────────────────────────────────────────────────────────

/// The gateway-agnostic status every native code is mapped into.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CanonicalStatus {
  Pending,
  Paid,
  Denied,
  Canceled,
  Expired,
  Refunded,
  Unknown,
}

impl CanonicalStatus {
  /// Paid, denied, canceled, expired and refunded are final. `Unknown` is
  /// not: an unrecognised code says nothing about the payment.
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Pending | Self::Unknown)
  }

  /// Rank used by the tie-break rule. A later update only replaces a
  /// terminal record if its rank is at least the stored one.
  ///
  /// Refunds follow payments, and a gateway's payment confirmation outranks
  /// an expiry or cancellation it raced with.
  pub fn authority(self) -> u8 {
    match self {
      Self::Unknown => 0,
      Self::Pending => 1,
      Self::Denied | Self::Canceled | Self::Expired => 2,
      Self::Paid => 3,
      Self::Refunded => 4,
    }
  }
}

/// Free-function form of [`Gateway::canonicalize`].
pub fn canonicalize(gateway: Gateway, code: i64) -> CanonicalStatus {
  gateway.canonicalize(code)
}

// ─── Per-gateway tables ──────────────────────────────────────────────────────

fn superpay_table(code: i64) -> CanonicalStatus {
  match code {
    1..=3 => CanonicalStatus::Pending,
    5 => CanonicalStatus::Paid,
    6 => CanonicalStatus::Denied,
    7 => CanonicalStatus::Canceled,
    8 => CanonicalStatus::Refunded,
    9 => CanonicalStatus::Expired,
    _ => CanonicalStatus::Unknown,
  }
}

fn superpay_br_table(code: i64) -> CanonicalStatus {
  match code {
    1..=3 => CanonicalStatus::Pending,
    5 => CanonicalStatus::Paid,
    6 => CanonicalStatus::Denied,
    9 => CanonicalStatus::Canceled,
    10 => CanonicalStatus::Refunded,
    12 => CanonicalStatus::Expired,
    _ => CanonicalStatus::Unknown,
  }
}

fn tryplopay_table(code: i64) -> CanonicalStatus {
  match code {
    1 | 2 => CanonicalStatus::Pending,
    5 => CanonicalStatus::Paid,
    6 => CanonicalStatus::Denied,
    8 => CanonicalStatus::Canceled,
    11 => CanonicalStatus::Refunded,
    15 => CanonicalStatus::Expired,
    _ => CanonicalStatus::Unknown,
  }
}
