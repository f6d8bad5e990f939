//! Server-sent event stream of live call updates for dashboard viewers.

use crate::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use triage_core::{LiveCallEvent, LiveCallRegistry, SubscriberId};

/// Removes the viewer from the broadcaster when its stream is dropped.
struct ViewerGuard {
    registry: LiveCallRegistry,
    id: SubscriberId,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
        tracing::debug!(viewer = self.id, "viewer disconnected");
    }
}

fn to_sse(event: &LiveCallEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        tracing::error!(kind = event.kind(), error = %e, "failed to encode live event");
        Event::default().comment("unencodable event")
    })
}

#[utoipa::path(
    get,
    path = "/calls/stream",
    responses(
        (status = 200, description = "Live call events; the first is always `full-state`", content_type = "text/event-stream")
    )
)]
/// Live-update stream. Each SSE `data` field is one JSON event tagged by `type`.
///
/// The stream ends when the viewer falls too far behind; reconnecting yields a fresh snapshot.
pub async fn stream_calls(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.registry.subscribe();
    let guard = ViewerGuard {
        registry: state.registry.clone(),
        id: subscription.id(),
    };
    tracing::info!(
        viewer = guard.id,
        viewers = state.registry.subscriber_count(),
        "viewer connected"
    );

    let events = stream::unfold(
        (subscription, guard),
        |(mut subscription, guard)| async move {
            let event = subscription.recv().await?;
            Some((Ok(to_sse(&event)), (subscription, guard)))
        },
    );
    Sse::new(events).keep_alive(KeepAlive::default())
}
