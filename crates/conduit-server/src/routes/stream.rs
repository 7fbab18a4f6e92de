//! `/runs/{id}/stream` — Server-Sent Events over the run's append-only
//! event log.
//!
//! Grounded in the teacher's `routes::chat` SSE handler shape
//! (`Sse<impl Stream<Item = Result<Event, Infallible>>>`,
//! `KeepAlive::default()`), but polling the Run Store's event log at a
//! fixed 500ms interval rather than draining an in-process channel, since
//! here the event log — not an in-memory bus — is the cross-process source
//! of truth.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub last_event_id: Option<i64>,
}

pub async fn stream_run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(q): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel(32);
    let store = state.container.store.clone();

    tokio::spawn(async move {
        let mut after_id = q.last_event_id;
        loop {
            let events = match store.get_events(&run_id, after_id, 100) {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(run_id, error = %e, "failed to poll run events for SSE");
                    break;
                }
            };

            for event in events {
                after_id = Some(event.event_id);
                let sse_event = Event::default()
                    .id(event.event_id.to_string())
                    .event(event.event_type.clone())
                    .json_data(&event.payload)
                    .unwrap_or_else(|_| Event::default().event("error"));

                if tx.send(Ok(sse_event)).await.is_err() {
                    return;
                }
            }

            // Re-read the run directly rather than inferring termination
            // from the just-polled event batch: a subscriber reconnecting
            // with `last_event_id` already past the terminal event would
            // otherwise poll forever without ever seeing `end`.
            match store.require_run(&run_id) {
                Ok(run) if run.status.is_terminal() => {
                    let _ = tx
                        .send(Ok(Event::default()
                            .event("end")
                            .json_data(serde_json::json!({ "status": run.status.as_str() }))
                            .unwrap_or_else(|_| Event::default().event("error"))))
                        .await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(run_id, error = %e, "failed to re-read run status for SSE");
                    break;
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}
