//! HTTP surface for paywire.
//!
//! Exposes an axum [`Router`] backed by a [`Hub`] over any
//! [`ConfirmationArchive`]. TLS and transport concerns are the caller's
//! responsibility.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/webhooks/{gateway}` | `superpay`, `superpay_br` or `tryplopay` |
//! | `GET`  | `/payments/status` | `?correlationId` \| `?invoiceId` \| `?token` |
//! | `GET`  | `/payments/{correlation_id}/stream` | Server-sent events |
//! | `GET`  | `/health` | Liveness |

pub mod error;
pub mod signature;
pub mod status;
pub mod stream;
pub mod webhooks;

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  routing::{get, post},
};
use paywire_core::ConfirmationArchive;
use paywire_hub::Hub;

pub use error::ApiError;
pub use signature::GatewaySecrets;

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<A> {
  pub hub:       Hub<A>,
  pub secrets:   Arc<GatewaySecrets>,
  /// Interval between push-stream heartbeats.
  pub heartbeat: Duration,
}

impl<A> Clone for AppState<A> {
  fn clone(&self) -> Self {
    Self {
      hub:       self.hub.clone(),
      secrets:   self.secrets.clone(),
      heartbeat: self.heartbeat,
    }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
pub fn router<A>(state: AppState<A>) -> Router
where
  A: ConfirmationArchive,
{
  Router::new()
    .route("/webhooks/{gateway}", post(webhooks::receive::<A>))
    .route("/payments/status", get(status::handler::<A>))
    .route("/payments/{correlation_id}/stream", get(stream::handler::<A>))
    .route("/health", get(|| async { "ok" }))
    .with_state(state)
}

// ─── Integration tests ───────────────────────────────────────────────────────
