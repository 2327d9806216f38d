//! The client monitor: resolves one correlation id to its terminal record.
//!
//! A run does one immediate lookup, then (push-first) waits on a push stream
//! with an occasional safety lookup, and falls back to bounded polling when
//! the stream cannot be opened, fails, or times out. While polling, the
//! stream is reopened between ticks; a reopened stream goes live again and
//! drops back to polling if it ends too. The first terminal record observed
//! ends the run. Each [`Monitor`] invokes its
//! [`TerminalHandler`] at most once, however many runs or paths observe the
//! terminal state.

use std::{
  fmt,
  sync::atomic::{AtomicBool, Ordering},
  time::Duration,
};

use chrono::Utc;
use futures::StreamExt as _;
use paywire_core::{CanonicalStatus, PaymentConfirmation};
use tokio::{
  sync::watch,
  time::{Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
  error::{MonitorError, Result, SourceError},
  source::{NoPush, PushEvent, PushSource, PushStream, StatusSource},
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Push stream first, polling when it is unavailable.
  PushFirst,
  PollOnly,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
  pub strategy:          Strategy,
  /// Delay between fallback polls.
  pub poll_interval:     Duration,
  /// Upper bound on fallback polls. Must be non-zero.
  pub max_poll_attempts: u32,
  /// First delay after a failed poll; doubles per consecutive failure.
  pub error_backoff:     Duration,
  pub max_error_backoff: Duration,
  /// Lookup cadence while live, covering writes the stream missed.
  pub safety_poll:       Option<Duration>,
  /// How long to stay live before giving up on the stream.
  pub max_live:          Duration,
  /// Try the push stream again between fallback polls.
  pub reopen_push:       bool,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      strategy:          Strategy::PushFirst,
      poll_interval:     Duration::from_secs(5),
      max_poll_attempts: 60,
      error_backoff:     Duration::from_secs(1),
      max_error_backoff: Duration::from_secs(30),
      safety_poll:       Some(Duration::from_secs(15)),
      max_live:          Duration::from_secs(15 * 60),
      reopen_push:       true,
    }
  }
}

impl MonitorConfig {
  pub fn validate(&self) -> Result<()> {
    if self.max_poll_attempts == 0 {
      return Err(MonitorError::InvalidConfig(
        "max_poll_attempts must be at least 1".into(),
      ));
    }
    if self.safety_poll.is_some_and(|d| d.is_zero()) {
      return Err(MonitorError::InvalidConfig(
        "safety_poll must be non-zero when set".into(),
      ));
    }
    Ok(())
  }
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
  /// Not running: before the first run, or after a monitoring error.
  Idle,
  Connecting,
  Live,
  FallbackPolling,
  Terminal,
}

impl fmt::Display for MonitorState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Idle => "idle",
      Self::Connecting => "connecting",
      Self::Live => "live",
      Self::FallbackPolling => "fallback_polling",
      Self::Terminal => "terminal",
    };
    f.write_str(name)
  }
}

// ─── Terminal callbacks ──────────────────────────────────────────────────────

/// Callbacks for the terminal outcome. Every method defaults to a no-op.
pub trait TerminalHandler: Send + Sync {
  fn on_confirmed(&self, _record: &PaymentConfirmation) {}
  fn on_denied(&self, _record: &PaymentConfirmation) {}
  fn on_canceled(&self, _record: &PaymentConfirmation) {}
  fn on_expired(&self, _record: &PaymentConfirmation) {}
  fn on_refunded(&self, _record: &PaymentConfirmation) {}
}

fn dispatch<H: TerminalHandler + ?Sized>(handler: &H, record: &PaymentConfirmation) {
  match record.canonical_status {
    CanonicalStatus::Paid => handler.on_confirmed(record),
    CanonicalStatus::Denied => handler.on_denied(record),
    CanonicalStatus::Canceled => handler.on_canceled(record),
    CanonicalStatus::Expired => handler.on_expired(record),
    CanonicalStatus::Refunded => handler.on_refunded(record),
    CanonicalStatus::Pending | CanonicalStatus::Unknown => {}
  }
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

pub struct Monitor<S, P = NoPush> {
  source: S,
  push:   Option<P>,
  config: MonitorConfig,
  state:  watch::Sender<MonitorState>,
  fired:  AtomicBool,
}

impl<S: StatusSource> Monitor<S, NoPush> {
  /// A monitor that only polls `source`.
  pub fn polling(source: S, config: MonitorConfig) -> Result<Self> {
    Self::new(source, None, MonitorConfig { strategy: Strategy::PollOnly, ..config })
  }
}

impl<S: StatusSource, P: PushSource> Monitor<S, P> {
  pub fn new(source: S, push: Option<P>, config: MonitorConfig) -> Result<Self> {
    config.validate()?;
    let (state, _) = watch::channel(MonitorState::Idle);
    Ok(Self { source, push, config, state, fired: AtomicBool::new(false) })
  }

  pub fn state(&self) -> MonitorState { *self.state.borrow() }

  /// Observe state transitions.
  pub fn watch(&self) -> watch::Receiver<MonitorState> { self.state.subscribe() }

  /// Whether the terminal callback has fired.
  pub fn has_fired(&self) -> bool { self.fired.load(Ordering::Acquire) }

  /// Resolve `correlation_id` to its terminal record.
  ///
  /// Errors describe the monitoring process only; a payment outcome is
  /// always an `Ok` record.
  pub async fn run<H>(&self, correlation_id: &str, handler: &H) -> Result<PaymentConfirmation>
  where
    H: TerminalHandler + ?Sized,
  {
    self.transition(MonitorState::Connecting);

    match self.source.lookup(correlation_id).await {
      Ok(Some(record)) if record.is_terminal() => return Ok(self.finish(record, handler)),
      Ok(_) => {}
      Err(e) => debug!(correlation_id, error = %e, "initial lookup failed"),
    }

    if let (Strategy::PushFirst, Some(push)) = (self.config.strategy, &self.push) {
      match push.open(correlation_id).await {
        Ok(stream) => {
          self.transition(MonitorState::Live);
          if let Some(record) = self.live(correlation_id, stream).await {
            return Ok(self.finish(record, handler));
          }
        }
        Err(e) => {
          info!(correlation_id, error = %e, "push subscription failed, falling back to polling");
        }
      }
    }

    let result = self.poll(correlation_id).await;
    match result {
      Ok(record) => Ok(self.finish(record, handler)),
      Err(e) => {
        self.transition(MonitorState::Idle);
        Err(e)
      }
    }
  }

  /// Wait on `stream`. `None` means fall back to polling.
  async fn live(&self, correlation_id: &str, mut stream: PushStream) -> Option<PaymentConfirmation> {
    let deadline = tokio::time::sleep(self.config.max_live);
    tokio::pin!(deadline);
    let mut safety = self.config.safety_poll.map(|period| {
      let mut interval = tokio::time::interval_at(Instant::now() + period, period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      interval
    });

    loop {
      tokio::select! {
        item = stream.next() => match item {
          Some(Ok(PushEvent::Terminal(record))) if record.is_terminal() => return Some(record),
          Some(Ok(PushEvent::Terminal(record))) => {
            debug!(correlation_id, status = %record.canonical_status, "ignoring non-terminal push");
          }
          Some(Ok(PushEvent::Connected | PushEvent::Heartbeat)) => {}
          Some(Ok(PushEvent::TimedOut)) => {
            info!(correlation_id, "push channel timed out, falling back to polling");
            return None;
          }
          Some(Err(e)) => {
            info!(correlation_id, error = %e, "push stream failed, falling back to polling");
            return None;
          }
          None => {
            info!(correlation_id, "push stream closed, falling back to polling");
            return None;
          }
        },
        () = tick(&mut safety) => match self.source.lookup(correlation_id).await {
          Ok(Some(record)) if record.is_terminal() => {
            debug!(correlation_id, "safety poll observed terminal state");
            return Some(record);
          }
          Ok(_) => {}
          Err(e) => debug!(correlation_id, error = %e, "safety poll failed"),
        },
        () = &mut deadline => {
          info!(correlation_id, "push stream idle too long, falling back to polling");
          return None;
        }
      }
    }
  }

  /// Bounded polling with error backoff.
  async fn poll(&self, correlation_id: &str) -> Result<PaymentConfirmation> {
    self.transition(MonitorState::FallbackPolling);

    let max = self.config.max_poll_attempts;
    let mut backoff = self.config.error_backoff;
    let mut last_error: Option<SourceError> = None;

    for attempt in 1..=max {
      let delay = match self.source.lookup(correlation_id).await {
        Ok(Some(record)) if record.is_terminal() => return Ok(record),
        Ok(Some(record)) if record.is_expired(Utc::now()) => {
          info!(correlation_id, attempt, "record expired without a terminal status");
          return Err(MonitorError::Timeout { attempts: attempt });
        }
        Ok(_) => {
          last_error = None;
          backoff = self.config.error_backoff;
          self.config.poll_interval
        }
        Err(e) => {
          warn!(correlation_id, attempt, error = %e, "status lookup failed");
          last_error = Some(e);
          let delay = backoff;
          backoff = (backoff * 2).min(self.config.max_error_backoff);
          delay
        }
      };
      if attempt < max {
        tokio::time::sleep(delay).await;
        if let Some(record) = self.reopen(correlation_id).await {
          return Ok(record);
        }
      }
    }

    Err(match last_error {
      Some(source) => MonitorError::Unavailable { attempts: max, source },
      None => MonitorError::Timeout { attempts: max },
    })
  }

  /// One attempt to go back live from fallback polling.
  async fn reopen(&self, correlation_id: &str) -> Option<PaymentConfirmation> {
    if !self.config.reopen_push || self.config.strategy != Strategy::PushFirst {
      return None;
    }
    let push = self.push.as_ref()?;
    match push.open(correlation_id).await {
      Ok(stream) => {
        info!(correlation_id, "push stream reopened");
        self.transition(MonitorState::Live);
        let found = self.live(correlation_id, stream).await;
        if found.is_none() {
          self.transition(MonitorState::FallbackPolling);
        }
        found
      }
      Err(e) => {
        debug!(correlation_id, error = %e, "push stream still unavailable");
        None
      }
    }
  }

  fn finish<H>(&self, record: PaymentConfirmation, handler: &H) -> PaymentConfirmation
  where
    H: TerminalHandler + ?Sized,
  {
    self.transition(MonitorState::Terminal);
    if self.fired.swap(true, Ordering::AcqRel) {
      debug!(correlation_id = %record.correlation_id, "terminal callback already fired");
    } else {
      dispatch(handler, &record);
    }
    record
  }

  fn transition(&self, next: MonitorState) {
    let prev = self.state.send_replace(next);
    if prev != next {
      debug!(from = %prev, to = %next, "monitor state");
    }
  }
}

async fn tick(interval: &mut Option<Interval>) {
  match interval {
    Some(interval) => {
      interval.tick().await;
    }
    None => std::future::pending().await,
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
