//! Chat answers over server-sent events.
//!
//! The turn is prepared inside the request (errors map to normal HTTP error
//! responses). Delivery runs on its own task, registered with the stream
//! registry, and feeds the response body through a bounded channel. When the
//! client goes away the receiver is dropped and delivery stops at the next write.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
  extract::{Query, State},
  response::{
    sse::{Event, KeepAlive, Sse},
    IntoResponse,
  },
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, instrument};

use crate::error::TrainerError;
use crate::protocol::{ChatEvent, StreamQuery};
use crate::routes::CurrentUser;
use crate::state::AppState;
use crate::streaming::{deliver, prepare_turn, DeliveryOutcome};

const EVENT_BUFFER: usize = 32;

fn to_sse(event: &ChatEvent) -> Event {
  let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
  Event::default().event(event.name()).data(data)
}

#[instrument(level = "info", skip(state, user, q), fields(user = %user.id, session = ?q.session_id, message_len = q.message.len()))]
pub async fn sse_chat_stream(
  State(state): State<Arc<AppState>>,
  CurrentUser(user): CurrentUser,
  Query(q): Query<StreamQuery>,
) -> Result<impl IntoResponse, TrainerError> {
  let turn = prepare_turn(&state, &user, &q).await?;
  let session_id = turn.session_id;

  let (tx, rx) = mpsc::channel::<ChatEvent>(EVENT_BUFFER);
  let guard = state.streams.register();
  let delay = Duration::from_millis(state.tuning.token_delay_ms);
  tokio::spawn(async move {
    let outcome = deliver(turn, tx, delay, guard.token()).await;
    drop(guard);
    match outcome {
      DeliveryOutcome::Completed => info!(target: "chat", session = %session_id, "Chat turn delivered"),
      DeliveryOutcome::Disconnected => info!(target: "chat", session = %session_id, "Client disconnected mid-stream"),
      DeliveryOutcome::Shutdown => info!(target: "chat", session = %session_id, "Stream closed by shutdown"),
    }
  });

  let stream = ReceiverStream::new(rx).map(|ev| Ok::<Event, Infallible>(to_sse(&ev)));
  Ok(([("x-accel-buffering", "no")], Sse::new(stream).keep_alive(KeepAlive::default())))
}
