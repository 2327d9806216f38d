//! Handler for `GET /payments/status`, the polling fallback.
//!
//! Exactly one of `correlationId`, `invoiceId` or `token` selects the
//! record; if several are given the first in that order wins.

use axum::{
  Json,
  extract::{Query, State},
};
use paywire_core::{ConfirmationArchive, LookupKey, StatusReply};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusParams {
  pub correlation_id: Option<String>,
  pub invoice_id:     Option<String>,
  pub token:          Option<String>,
}

impl StatusParams {
  fn into_key(self) -> Option<LookupKey> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    non_empty(self.correlation_id)
      .map(LookupKey::CorrelationId)
      .or_else(|| non_empty(self.invoice_id).map(LookupKey::InvoiceId))
      .or_else(|| non_empty(self.token).map(LookupKey::Token))
  }
}

/// `GET /payments/status?correlationId=…|invoiceId=…|token=…`
pub async fn handler<A>(
  State(state): State<AppState<A>>,
  Query(params): Query<StatusParams>,
) -> Result<Json<StatusReply>, ApiError>
where
  A: ConfirmationArchive,
{
  let key = params.into_key().ok_or_else(|| {
    ApiError::BadRequest("one of correlationId, invoiceId or token is required".into())
  })?;

  let reply = match state.hub.get(&key).await? {
    Some(record) => StatusReply::found(&record),
    None => StatusReply::not_found(),
  };
  Ok(Json(reply))
}
