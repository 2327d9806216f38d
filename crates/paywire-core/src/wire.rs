//! Client-facing wire contract shared by the HTTP API and the monitor: the
//! status query reply and the push-stream event names.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{PaymentConfirmation, status::CanonicalStatus};

/// Reply body of the status query endpoint.
///
/// `found: false` means no record exists yet. It is not a denial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
  pub success: bool,
  pub found:   bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data:    Option<PaymentConfirmation>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error:   Option<String>,
}

impl StatusReply {
  pub fn found(record: &PaymentConfirmation) -> Self {
    Self {
      success: true,
      found:   true,
      data:    Some(record.public_view()),
      error:   None,
    }
  }

  pub fn not_found() -> Self {
    Self { success: true, found: false, data: None, error: None }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self { success: false, found: false, data: None, error: Some(message.into()) }
  }
}

/// Event names on the push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum StreamEvent {
  Connected,
  Heartbeat,
  PaymentConfirmed,
  PaymentDenied,
  PaymentCanceled,
  PaymentExpired,
  PaymentRefunded,
  /// The server gave up waiting; the stream closes after this.
  Timeout,
}

impl StreamEvent {
  /// The event announcing `status`, if it is terminal.
  pub fn for_status(status: CanonicalStatus) -> Option<Self> {
    match status {
      CanonicalStatus::Paid => Some(Self::PaymentConfirmed),
      CanonicalStatus::Denied => Some(Self::PaymentDenied),
      CanonicalStatus::Canceled => Some(Self::PaymentCanceled),
      CanonicalStatus::Expired => Some(Self::PaymentExpired),
      CanonicalStatus::Refunded => Some(Self::PaymentRefunded),
      CanonicalStatus::Pending | CanonicalStatus::Unknown => None,
    }
  }

  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Connected | Self::Heartbeat | Self::Timeout)
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr as _;

  use super::*;

  #[test]
  fn event_names() {
    assert_eq!(StreamEvent::PaymentConfirmed.as_ref(), "payment_confirmed");
    assert_eq!(StreamEvent::Connected.to_string(), "connected");
    assert_eq!(
      StreamEvent::from_str("payment_expired").unwrap(),
      StreamEvent::PaymentExpired
    );
    assert!(StreamEvent::from_str("message").is_err());
  }

  #[test]
  fn only_terminal_statuses_have_events() {
    assert_eq!(StreamEvent::for_status(CanonicalStatus::Pending), None);
    assert_eq!(StreamEvent::for_status(CanonicalStatus::Unknown), None);
    assert!(
      StreamEvent::for_status(CanonicalStatus::Refunded).is_some_and(StreamEvent::is_terminal)
    );
  }

  #[test]
  fn not_found_reply_shape() {
    let json = serde_json::to_value(StatusReply::not_found()).unwrap();
    assert_eq!(json, serde_json::json!({ "success": true, "found": false }));
  }
}
