//! Live Events API Handler
//!
//! Server-sent events carrying every pipeline's log lines and status changes.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;

use crate::api::AppState;
use crate::service::Subscription;

/// GET /events
/// One `ping` event on connect, then a `message` event per hub event
///
/// The hub subscription lives as long as the response stream, so a client
/// disconnect unregisters it. The stream ends when the server shuts down.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.deploy.subscribe();
    tracing::debug!("Event stream opened ({:?})", subscription.id());

    let connected = stream::once(async {
        Ok::<_, Infallible>(Event::default().event("ping").data("connected"))
    });

    let events = connected
        .chain(stream::unfold(subscription, next_event))
        .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn next_event(
    mut subscription: Subscription,
) -> Option<(Result<Event, Infallible>, Subscription)> {
    loop {
        let event = subscription.recv().await?;

        match serde_json::to_string(&event) {
            Ok(data) => {
                return Some((Ok(Event::default().event("message").data(data)), subscription));
            }
            Err(e) => tracing::warn!("Failed to encode event: {}", e),
        }
    }
}
