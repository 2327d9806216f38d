//! [`HttpSource`]: the paywire HTTP API as both a status source (the status
//! endpoint) and a push source (the server-sent event stream).

use std::{str::FromStr as _, time::Duration};

use futures::StreamExt as _;
use paywire_core::{PaymentConfirmation, StatusReply, StreamEvent};
use reqwest::{Client, header};
use tracing::debug;

use crate::{
  error::SourceError,
  source::{PushEvent, PushSource, PushStream, StatusSource},
};

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpSource {
  client:   Client,
  base_url: String,
  timeout:  Duration,
}

impl HttpSource {
  pub fn new(base_url: impl Into<String>) -> Result<Self, SourceError> {
    // No client-wide timeout: the event stream is long-lived.
    let client = Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .build()?;
    Ok(Self {
      client,
      base_url: base_url.into().trim_end_matches('/').to_owned(),
      timeout: Duration::from_secs(30),
    })
  }

  fn url(&self, path: &str) -> String { format!("{}{}", self.base_url, path) }
}

impl StatusSource for HttpSource {
  /// `GET /payments/status?correlationId=<id>`
  async fn lookup(&self, correlation_id: &str) -> Result<Option<PaymentConfirmation>, SourceError> {
    let resp = self
      .client
      .get(self.url("/payments/status"))
      .query(&[("correlationId", correlation_id)])
      .timeout(self.timeout)
      .send()
      .await?;

    if !resp.status().is_success() {
      return Err(SourceError::Status(resp.status().as_u16()));
    }
    let reply: StatusReply = resp
      .json()
      .await
      .map_err(|e| SourceError::Decode(e.to_string()))?;
    if !reply.success {
      return Err(SourceError::Decode(reply.error.unwrap_or_default()));
    }
    Ok(reply.data.filter(|_| reply.found))
  }
}

impl PushSource for HttpSource {
  /// `GET /payments/<id>/stream`
  async fn open(&self, correlation_id: &str) -> Result<PushStream, SourceError> {
    let resp = self
      .client
      .get(self.url(&format!("/payments/{correlation_id}/stream")))
      .header(header::ACCEPT, "text/event-stream")
      .send()
      .await?;

    if !resp.status().is_success() {
      return Err(SourceError::Status(resp.status().as_u16()));
    }

    let mut bytes = resp.bytes_stream();
    let stream = async_stream::stream! {
      let mut parser = SseParser::default();
      while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
          Ok(chunk) => chunk,
          Err(e) => {
            yield Err(SourceError::Transport(e));
            return;
          }
        };
        for frame in parser.push(&chunk) {
          if let Some(event) = frame.into_push_event() {
            yield event;
          }
        }
      }
    };
    Ok(stream.boxed())
  }
}

// ─── Server-sent events ──────────────────────────────────────────────────────

/// One `event:`/`data:` block.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct SseFrame {
  pub event: String,
  pub data:  String,
}

impl SseFrame {
  /// Unknown event names are skipped.
  fn into_push_event(self) -> Option<Result<PushEvent, SourceError>> {
    let Ok(kind) = StreamEvent::from_str(&self.event) else {
      debug!(event = %self.event, "ignoring unknown stream event");
      return None;
    };
    let event = match kind {
      StreamEvent::Connected => Ok(PushEvent::Connected),
      StreamEvent::Heartbeat => Ok(PushEvent::Heartbeat),
      StreamEvent::Timeout => Ok(PushEvent::TimedOut),
      _ => serde_json::from_str::<PaymentConfirmation>(&self.data)
        .map(PushEvent::Terminal)
        .map_err(|e| SourceError::Decode(e.to_string())),
    };
    Some(event)
  }
}

/// Incremental parser: feed it chunks as they arrive, get back complete
/// frames. Bytes are buffered until a frame is complete, so a UTF-8 sequence
/// split across chunks decodes intact.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
  buf: Vec<u8>,
}

impl SseParser {
  pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
    self.buf.extend(chunk.iter().filter(|&&b| b != b'\r'));

    let mut frames = Vec::new();
    while let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
      let block: Vec<u8> = self.buf.drain(..end + 2).collect();
      let block = String::from_utf8_lossy(&block);
      let mut frame = SseFrame::default();
      for line in block.lines() {
        if let Some(v) = line.strip_prefix("event:") {
          frame.event = v.trim().to_owned();
        } else if let Some(v) = line.strip_prefix("data:") {
          if !frame.data.is_empty() {
            frame.data.push('\n');
          }
          frame.data.push_str(v.strip_prefix(' ').unwrap_or(v));
        }
      }
      if !frame.event.is_empty() || !frame.data.is_empty() {
        frames.push(frame);
      }
    }
    frames
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frames_split_across_chunks() {
    let mut parser = SseParser::default();
    assert!(parser.push(b"event: connected\ndata: {\"correlationId\"").is_empty());
    let frames = parser.push(b":\"X1\"}\n\nevent: heartbeat\ndata: \n\n");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].event, "connected");
    assert_eq!(frames[0].data, "{\"correlationId\":\"X1\"}");
    assert_eq!(frames[1].event, "heartbeat");
  }

  #[test]
  fn multibyte_characters_split_across_chunks() {
    let mut parser = SseParser::default();
    assert!(parser.push(b"event: connected\ndata: {\"id\":\"pedido-\xc3").is_empty());
    let frames = parser.push(b"\xa7\"}\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, "{\"id\":\"pedido-ç\"}");
  }

  #[test]
  fn comments_and_crlf_are_tolerated() {
    let mut parser = SseParser::default();
    let frames = parser.push(b": keep-alive\r\n\r\nevent: timeout\r\ndata: \r\n\r\n");
    assert_eq!(frames, vec![SseFrame { event: "timeout".into(), data: String::new() }]);
  }

  #[test]
  fn terminal_frames_decode_the_record() {
    let data = r#"{"correlationId":"X1","gatewayInvoiceId":null,"gatewayToken":null,
      "gateway":"superpay","statusCode":5,"canonicalStatus":"paid","amount":27.97,
      "paidAt":"2024-01-01T00:00:00Z","receivedAt":"2024-01-01T00:00:00Z",
      "expiresAt":"2024-01-01T00:30:00Z"}"#
      .replace('\n', "");
    let frame = SseFrame { event: "payment_confirmed".into(), data };
    match frame.into_push_event() {
      Some(Ok(PushEvent::Terminal(record))) => {
        assert_eq!(record.correlation_id, "X1");
        assert_eq!(record.amount.to_string(), "27.97");
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn unknown_events_are_skipped() {
    let frame = SseFrame { event: "message".into(), data: "{}".into() };
    assert!(frame.into_push_event().is_none());
  }

  // ── Against a running server ─────────────────────────────────────────────

  mod served {
    use std::sync::{Arc, Mutex};

    use paywire_api::{AppState, GatewaySecrets, router};
    use paywire_core::CanonicalStatus;
    use paywire_hub::{Hub, HubConfig};
    use paywire_store_sqlite::SqliteArchive;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;
    use crate::{Monitor, MonitorConfig, MonitorState, TerminalHandler};

    /// Serve the paywire router on an ephemeral port; returns its base URL.
    async fn serve() -> String {
      let archive = SqliteArchive::open_in_memory().await.unwrap();
      let state = AppState {
        hub:       Hub::start(Arc::new(archive), HubConfig {
          origin: "test".into(),
          ..HubConfig::default()
        }),
        secrets:   Arc::new(GatewaySecrets::default()),
        heartbeat: Duration::from_secs(30),
      };
      let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
      let addr = listener.local_addr().unwrap();
      tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });
      format!("http://{addr}")
    }

    async fn post_webhook(base: &str, id: &str, code: i64) {
      let body = json!({
        "invoices": {
          "external_id": id,
          "id": format!("inv-{id}"),
          "token": format!("tok-{id}"),
          "status": { "code": code, "title": "status" },
          "prices": { "total": 27.97 }
        }
      });
      let resp = Client::new()
        .post(format!("{base}/webhooks/superpay"))
        .json(&body)
        .send()
        .await
        .unwrap();
      assert!(resp.status().is_success());
    }

    #[derive(Default)]
    struct Outcomes(Mutex<Vec<CanonicalStatus>>);

    impl TerminalHandler for Outcomes {
      fn on_confirmed(&self, r: &PaymentConfirmation) {
        self.0.lock().unwrap().push(r.canonical_status);
      }

      fn on_denied(&self, r: &PaymentConfirmation) {
        self.0.lock().unwrap().push(r.canonical_status);
      }
    }

    #[tokio::test]
    async fn lookup_reads_the_status_endpoint() {
      let base = serve().await;
      let source = HttpSource::new(&base).unwrap();

      assert!(source.lookup("H1").await.unwrap().is_none());

      post_webhook(&base, "H1", 5).await;
      let found = source.lookup("H1").await.unwrap().expect("found after webhook");
      assert_eq!(found.canonical_status, CanonicalStatus::Paid);
      assert_eq!(found.amount.to_string(), "27.97");
      assert!(found.raw.is_null());
    }

    #[tokio::test]
    async fn non_success_replies_are_status_errors() {
      let base = serve().await;
      let source = HttpSource::new(format!("{base}/missing")).unwrap();

      let err = source.lookup("H2").await.unwrap_err();
      assert!(matches!(err, SourceError::Status(404)), "got {err:?}");
      let err = source.open("H2").await.err().expect("open should fail");
      assert!(matches!(err, SourceError::Status(404)), "got {err:?}");
    }

    #[tokio::test]
    async fn monitor_resolves_through_the_event_stream() {
      let base = serve().await;
      let source = HttpSource::new(&base).unwrap();
      let config = MonitorConfig {
        safety_poll: None,
        poll_interval: Duration::from_millis(50),
        max_poll_attempts: 3,
        ..MonitorConfig::default()
      };
      let monitor = Monitor::new(source.clone(), Some(source), config).unwrap();
      let mut states = monitor.watch();
      let handler = Outcomes::default();

      let webhook = async {
        states.wait_for(|s| *s == MonitorState::Live).await.unwrap();
        post_webhook(&base, "H3", 6).await;
      };
      let (record, ()) = tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(monitor.run("H3", &handler), webhook) },
      )
      .await
      .expect("monitor should resolve");

      let record = record.unwrap();
      assert_eq!(record.correlation_id, "H3");
      assert_eq!(record.canonical_status, CanonicalStatus::Denied);
      assert_eq!(*handler.0.lock().unwrap(), [CanonicalStatus::Denied]);
      assert_eq!(monitor.state(), MonitorState::Terminal);
    }
  }
}
