//! `GET /payments/{correlation_id}/stream`: the push stream.
//!
//! Emits `connected`, then heartbeats until the channel resolves: either one
//! terminal `payment_*` event or a `timeout` event, after which the stream
//! ends. A client disconnect drops the subscription and closes its channel.

use std::{convert::Infallible, time::Duration};

use axum::{
  extract::{Path, State},
  response::sse::{Event, Sse},
};
use futures::Stream;
use paywire_core::{ConfirmationArchive, PaymentConfirmation, StreamEvent};
use paywire_hub::Delivery;
use serde_json::json;
use tracing::debug;

use crate::AppState;

enum Step {
  Resolved(Option<Delivery>),
  Beat,
}

fn event(kind: StreamEvent, data: String) -> Event {
  Event::default().event(kind.as_ref()).data(data)
}

fn terminal_event(record: &PaymentConfirmation) -> Option<Event> {
  let kind = StreamEvent::for_status(record.canonical_status)?;
  let data = serde_json::to_string(&record.public_view()).unwrap_or_default();
  Some(event(kind, data))
}

pub async fn handler<A>(
  State(state): State<AppState<A>>,
  Path(correlation_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
  A: ConfirmationArchive,
{
  let mut subscription = state.hub.subscribe(&correlation_id).await;
  let hub = state.hub.clone();
  let heartbeat = state.heartbeat.max(Duration::from_millis(10));

  let stream = async_stream::stream! {
    let hello = json!({ "correlationId": correlation_id }).to_string();
    yield Ok(event(StreamEvent::Connected, hello));

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
      let step = tokio::select! {
        delivery = subscription.recv() => Step::Resolved(delivery),
        _ = ticker.tick() => Step::Beat,
      };

      match step {
        Step::Beat => {
          hub.dispatcher().touch(subscription.handle());
          yield Ok(event(StreamEvent::Heartbeat, String::new()));
        }
        Step::Resolved(Some(Delivery::Delivered(record))) => {
          debug!(
            correlation_id = %correlation_id,
            status = %record.canonical_status,
            "delivered over push stream"
          );
          if let Some(ev) = terminal_event(&record) {
            yield Ok(ev);
          }
          break;
        }
        Step::Resolved(Some(Delivery::TimedOut)) => {
          debug!(correlation_id = %correlation_id, "push stream timed out");
          yield Ok(event(StreamEvent::Timeout, String::new()));
          break;
        }
        Step::Resolved(None) => break,
      }
    }
  };

  Sse::new(stream)
}
