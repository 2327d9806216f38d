//! Server assembly for paywire: configuration, hub construction and the
//! HTTP application with request tracing.

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::Router;
use paywire_api::{AppState, GatewaySecrets};
use paywire_core::{ConfirmationArchive, Gateway};
use paywire_hub::{Hub, HubConfig, RetryPolicy};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `PAYWIRE_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                  String,
  pub port:                  u16,
  pub store_path:            PathBuf,
  /// Origin tag for change-feed events. Random per process when unset.
  pub instance_id:           Option<String>,
  pub confirmation_ttl_secs: u64,
  pub channel_ttl_secs:      u64,
  pub heartbeat_secs:        u64,
  pub sweep_interval_secs:   u64,
  pub feed_poll_ms:          u64,
  pub persist_max_attempts:  u32,
  pub persist_backoff_ms:    u64,
  pub gateways:              GatewaysConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewaysConfig {
  pub superpay:    GatewayConfig,
  pub superpay_br: GatewayConfig,
  pub tryplopay:   GatewayConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayConfig {
  /// HMAC secret. When set, unsigned webhooks from this gateway get 401.
  pub secret: Option<String>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                  "0.0.0.0".into(),
      port:                  8080,
      store_path:            PathBuf::from("paywire.db"),
      instance_id:           None,
      confirmation_ttl_secs: 1800,
      channel_ttl_secs:      900,
      heartbeat_secs:        15,
      sweep_interval_secs:   60,
      feed_poll_ms:          500,
      persist_max_attempts:  5,
      persist_backoff_ms:    200,
      gateways:              GatewaysConfig::default(),
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn hub_config(&self) -> HubConfig {
    let ttl_secs = i64::try_from(self.confirmation_ttl_secs).unwrap_or(i64::MAX);
    HubConfig {
      origin:           self
        .instance_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
      confirmation_ttl: chrono::Duration::try_seconds(ttl_secs)
        .unwrap_or(chrono::Duration::MAX),
      channel_ttl:      Duration::from_secs(self.channel_ttl_secs.max(1)),
      persist:          RetryPolicy {
        max_attempts: self.persist_max_attempts.max(1),
        backoff:      Duration::from_millis(self.persist_backoff_ms),
      },
      sweep_interval:   Duration::from_secs(self.sweep_interval_secs.max(1)),
      feed_poll:        Duration::from_millis(self.feed_poll_ms.max(10)),
      ..HubConfig::default()
    }
  }

  pub fn secrets(&self) -> GatewaySecrets {
    let configured = [
      (Gateway::SuperPay, &self.gateways.superpay),
      (Gateway::SuperPayBr, &self.gateways.superpay_br),
      (Gateway::TryploPay, &self.gateways.tryplopay),
    ];
    configured
      .into_iter()
      .filter_map(|(gateway, cfg)| {
        let secret = cfg.secret.as_deref().filter(|s| !s.is_empty())?;
        Some((gateway, secret.to_owned()))
      })
      .fold(GatewaySecrets::default(), |acc, (gateway, secret)| {
        acc.with(gateway, secret)
      })
  }

  pub fn heartbeat(&self) -> Duration { Duration::from_secs(self.heartbeat_secs.max(1)) }
}

// ─── Application ─────────────────────────────────────────────────────────────

/// Build the shared handler state for `hub`.
pub fn app_state<A>(hub: Hub<A>, config: &ServerConfig) -> AppState<A> {
  AppState {
    hub,
    secrets: Arc::new(config.secrets()),
    heartbeat: config.heartbeat(),
  }
}

/// The API router wrapped in request tracing.
pub fn app<A>(state: AppState<A>) -> Router
where
  A: ConfirmationArchive,
{
  paywire_api::router(state).layer(TraceLayer::new_for_http())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use paywire_store_sqlite::SqliteArchive;
  use tower::ServiceExt as _;

  fn parse(toml: &str) -> ServerConfig {
    config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = parse("");
    assert_eq!(cfg.address(), "0.0.0.0:8080");
    assert_eq!(cfg.store_path, PathBuf::from("paywire.db"));

    let hub = cfg.hub_config();
    assert_eq!(hub.confirmation_ttl, chrono::Duration::minutes(30));
    assert_eq!(hub.channel_ttl, Duration::from_secs(900));
    assert_eq!(hub.persist.max_attempts, 5);
    assert!(cfg.secrets().get(Gateway::TryploPay).is_none());
  }

  #[test]
  fn overrides_and_gateway_secrets() {
    let cfg = parse(
      r#"
        port = 9000
        instance_id = "node-a"
        confirmation_ttl_secs = 60

        [gateways.tryplopay]
        secret = "s3cret"

        [gateways.superpay]
        secret = ""
      "#,
    );
    assert_eq!(cfg.port, 9000);

    let hub = cfg.hub_config();
    assert_eq!(hub.origin, "node-a");
    assert_eq!(hub.confirmation_ttl, chrono::Duration::seconds(60));

    let secrets = cfg.secrets();
    assert_eq!(secrets.get(Gateway::TryploPay), Some("s3cret"));
    assert_eq!(secrets.get(Gateway::SuperPay), None);
  }

  #[tokio::test]
  async fn traced_app_serves_webhooks() {
    let cfg = ServerConfig::default();
    let archive = SqliteArchive::open_in_memory().await.unwrap();
    let hub = Hub::start(Arc::new(archive), cfg.hub_config());
    let app = app(app_state(hub.clone(), &cfg));

    let body = serde_json::json!({
      "invoices": {
        "external_id": "srv-1",
        "status": { "code": 5, "title": "Pago" },
        "prices": { "total": 27.97 }
      }
    })
    .to_string();
    let req = Request::builder()
      .method("POST")
      .uri("/webhooks/superpay")
      .header("content-type", "application/json")
      .body(Body::from(body))
      .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    hub.shutdown().await;
    let stored = hub
      .store()
      .archive()
      .history("srv-1")
      .await
      .unwrap();
    assert_eq!(stored.len(), 1);
  }
}
