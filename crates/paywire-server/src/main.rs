//! paywire-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) overlaid with
//! `PAYWIRE_*` environment variables, opens the SQLite archive, and serves
//! the webhook, status and push-stream endpoints over HTTP. Ctrl-C stops the
//! listener, cancels background tasks and flushes pending durable writes.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use paywire_hub::Hub;
use paywire_server::{ServerConfig, app, app_state};
use paywire_store_sqlite::SqliteArchive;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "paywire webhook and notification server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml", env = "PAYWIRE_CONFIG")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("PAYWIRE")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  let archive = SqliteArchive::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let hub_cfg = server_cfg.hub_config();
  tracing::info!(instance = %hub_cfg.origin, store = ?store_path, "starting");
  let hub = Hub::start(Arc::new(archive), hub_cfg);

  let cancel = CancellationToken::new();
  let maintenance = hub.spawn_maintenance(cancel.clone());
  let bridge = hub
    .spawn_bridge(cancel.clone())
    .await
    .context("failed to start change feed bridge")?;

  let router = app(app_state(hub.clone(), &server_cfg));
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  cancel.cancel();
  let _ = tokio::join!(maintenance, bridge);
  hub.shutdown().await;
  tracing::info!("stopped");

  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  tracing::info!("shutdown requested");
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
