//! Studio event streaming via Server-Sent Events.
//!
//! Clients subscribe to `GET /api/events` and receive project and generation
//! changes as they happen:
//!
//! ```text
//! event: project_updated
//! data: {"event":"project_updated","data":{"project_id":"p1","element_count":4,"last_modified":1700000000000}}
//!
//! event: generation_updated
//! data: {"event":"generation_updated","data":{"generation":{...}}}
//!
//! event: heartbeat
//! data: {"event":"heartbeat","data":{"timestamp":1700000000000}}
//! ```

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use kanvas_core::store::current_timestamp_ms;
use kanvas_core::ActiveGeneration;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::metrics;
use crate::AppState;

/// Buffered events per subscriber before slow clients start lagging.
const EVENT_CAPACITY: usize = 256;

/// Events sent to studio clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StudioEvent {
    /// A project's canvas changed.
    ProjectUpdated {
        /// Project identifier.
        project_id: String,
        /// Number of elements on the canvas.
        element_count: usize,
        /// Modification time (ms since epoch).
        last_modified: u64,
    },
    /// A generation changed status.
    GenerationUpdated {
        /// The generation after the change.
        generation: ActiveGeneration,
    },
    /// Sent in place of events a lagging client missed.
    Heartbeat {
        /// Time of the heartbeat (ms since epoch).
        timestamp: u64,
    },
}

impl StudioEvent {
    /// SSE event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProjectUpdated { .. } => "project_updated",
            Self::GenerationUpdated { .. } => "generation_updated",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Broadcast channel shared by everything that emits studio events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StudioEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Send an event to every subscriber.
    pub fn publish(&self, event: StudioEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StudioEvent> {
        self.tx.subscribe()
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Decrements the SSE client gauge when the stream is dropped.
struct ClientGuard;

impl ClientGuard {
    fn new() -> Self {
        metrics::inc_sse_clients();
        Self
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        metrics::dec_sse_clients();
    }
}

fn to_sse(event: &StudioEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.name()).data(data)
}

/// SSE stream handler for studio events.
///
/// ```text
/// curl -N http://localhost:9474/api/events
/// ```
pub async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let guard = ClientGuard::new();
    tracing::debug!(
        subscribers = state.events.subscriber_count() + 1,
        "SSE client connected"
    );
    let stream = BroadcastStream::new(state.events.subscribe());

    let event_stream = stream.map(move |result| {
        let _guard = &guard;
        let event = result.unwrap_or_else(|_| StudioEvent::Heartbeat {
            timestamp: current_timestamp_ms(),
        });
        Ok(to_sse(&event))
    });

    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("heartbeat"),
    )
}
