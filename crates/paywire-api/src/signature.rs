//! Webhook signature verification: hex HMAC-SHA256 of the raw body in the
//! `x-webhook-signature` header, optionally prefixed `sha256=`.

use std::collections::HashMap;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use paywire_core::Gateway;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Per-gateway shared secrets. Gateways without one accept unsigned
/// webhooks.
#[derive(Debug, Clone, Default)]
pub struct GatewaySecrets(HashMap<Gateway, String>);

impl GatewaySecrets {
  pub fn with(mut self, gateway: Gateway, secret: impl Into<String>) -> Self {
    self.0.insert(gateway, secret.into());
    self
  }

  pub fn get(&self, gateway: Gateway) -> Option<&str> {
    self.0.get(&gateway).map(String::as_str)
  }
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, ApiError> {
  let mut mac =
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ApiError::Auth)?;
  mac.update(body);
  Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check the signature header against `body`.
pub fn verify(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
  let provided = headers
    .get(SIGNATURE_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .ok_or(ApiError::Auth)?;
  let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

  let expected = sign(secret, body)?;
  // Length is not secret: SHA-256 hex is always 64 characters.
  if expected.len() != provided.len() {
    return Err(ApiError::Auth);
  }
  if bool::from(expected.as_bytes().ct_eq(provided.to_ascii_lowercase().as_bytes())) {
    Ok(())
  } else {
    Err(ApiError::Auth)
  }
}
