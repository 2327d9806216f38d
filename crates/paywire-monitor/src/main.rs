//! `paywire-watch`: follow one payment until it reaches a final state.
//!
//! # Usage
//!
//! ```
//! paywire-watch --url http://localhost:8080 --correlation-id order-1234
//! paywire-watch --correlation-id order-1234 --poll-only --poll-interval-secs 3
//! ```
//!
//! Prints the terminal outcome and exits 0, or prints the monitoring error
//! and exits non-zero. A timeout is never reported as a denial.

use std::{process::ExitCode, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use paywire_core::PaymentConfirmation;
use paywire_monitor::{
  HttpSource, Monitor, MonitorConfig, MonitorError, Strategy, TerminalHandler,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "paywire-watch", about = "Wait for a payment's final status")]
struct Args {
  /// Base URL of the paywire server.
  #[arg(long, env = "PAYWIRE_URL", default_value = "http://localhost:8080")]
  url: String,

  /// The `external_id` the payment was created with.
  #[arg(long)]
  correlation_id: String,

  /// Skip the event stream and only poll the status endpoint.
  #[arg(long)]
  poll_only: bool,

  #[arg(long, default_value_t = 5)]
  poll_interval_secs: u64,

  #[arg(long, default_value_t = 60)]
  max_poll_attempts: u32,
}

// ─── Output ───────────────────────────────────────────────────────────────────

struct Printer;

impl Printer {
  fn print(outcome: &str, record: &PaymentConfirmation) {
    println!(
      "{outcome}: {} via {} (code {}, amount {})",
      record.correlation_id, record.gateway, record.status_code, record.amount
    );
  }
}

impl TerminalHandler for Printer {
  fn on_confirmed(&self, record: &PaymentConfirmation) { Self::print("confirmed", record) }

  fn on_denied(&self, record: &PaymentConfirmation) { Self::print("denied", record) }

  fn on_canceled(&self, record: &PaymentConfirmation) { Self::print("canceled", record) }

  fn on_expired(&self, record: &PaymentConfirmation) { Self::print("expired", record) }

  fn on_refunded(&self, record: &PaymentConfirmation) { Self::print("refunded", record) }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config = MonitorConfig {
    strategy: if args.poll_only { Strategy::PollOnly } else { Strategy::PushFirst },
    poll_interval: Duration::from_secs(args.poll_interval_secs),
    max_poll_attempts: args.max_poll_attempts,
    ..MonitorConfig::default()
  };

  let source = HttpSource::new(&args.url).context("failed to build HTTP client")?;
  let monitor = Monitor::new(source.clone(), Some(source), config)?;

  match monitor.run(&args.correlation_id, &Printer).await {
    Ok(_) => Ok(ExitCode::SUCCESS),
    Err(e @ MonitorError::Timeout { .. }) => {
      eprintln!("monitoring timed out: {e}");
      Ok(ExitCode::from(2))
    }
    Err(e) => {
      eprintln!("monitoring failed: {e}");
      Ok(ExitCode::from(1))
    }
  }
}
