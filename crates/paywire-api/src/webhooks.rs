//! `POST /webhooks/{gateway}`: one receiver per gateway, sharing the hub.
//!
//! Any structurally valid payload gets `200 {"success":true}` once the
//! volatile tier holds it, retries and stale replays included: gateways
//! retry on anything else. Only malformed payloads (400) and bad signatures
//! (401) are refused, and neither writes anything.

use std::str::FromStr as _;

use axum::{
  Json,
  extract::{Path, State},
  http::HeaderMap,
};
use bytes::Bytes;
use chrono::Utc;
use paywire_core::{ConfirmationArchive, Gateway, GatewayWebhook};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{AppState, error::ApiError, signature};

pub async fn receive<A>(
  State(state): State<AppState<A>>,
  Path(gateway): Path<String>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Json<Value>, ApiError>
where
  A: ConfirmationArchive,
{
  let gateway = Gateway::from_str(&gateway)
    .map_err(|_| ApiError::NotFound(format!("no receiver for gateway {gateway:?}")))?;

  let (webhook, raw) = GatewayWebhook::parse(gateway, &body).inspect_err(|e| {
    warn!(%gateway, error = %e, "webhook rejected");
  })?;

  if let Some(secret) = state.secrets.get(gateway) {
    signature::verify(secret, &headers, &body).inspect_err(|_| {
      warn!(
        %gateway,
        correlation_id = webhook.correlation_id(),
        "webhook rejected: bad signature"
      );
    })?;
  }

  let ttl = state.hub.config().confirmation_ttl;
  let record = webhook.into_confirmation(raw, Utc::now(), ttl);
  let applied = state.hub.receive(record).await;

  if applied.changed {
    info!(
      %gateway,
      correlation_id = %applied.record.correlation_id,
      status = %applied.record.canonical_status,
      code = applied.record.status_code,
      "webhook accepted"
    );
  } else if applied.record.gateway != gateway {
    warn!(
      %gateway,
      stored_gateway = %applied.record.gateway,
      correlation_id = %applied.record.correlation_id,
      "webhook ignored: payment belongs to another gateway"
    );
  } else {
    debug!(
      %gateway,
      correlation_id = %applied.record.correlation_id,
      "duplicate or stale webhook absorbed"
    );
  }

  Ok(Json(json!({ "success": true })))
}
