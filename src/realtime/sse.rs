use crate::realtime::events::PollEvent;
use crate::realtime::subscriptions::ConnectionGuard;
use crate::startup::AppState;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::{convert::Infallible, time::Duration};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(30))
        .text("keep-alive")
}

fn to_sse(event: &PollEvent) -> Event {
    event
        .payload()
        .ok()
        .and_then(|data| Event::default().event(event.name()).json_data(data).ok())
        .unwrap_or_else(|| Event::default().event("error").data("encoding failed"))
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

/// Every event for every poll, preceded by a snapshot of all polls.
pub async fn all_polls_sse(
    Extension(app_state): Extension<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = app_state.broadcaster.subscribe_global();

    let stream = async_stream::stream! {
        match app_state.store.list_polls().await {
            Ok(polls) => {
                yield Ok::<_, Infallible>(Event::default()
                    .event("init")
                    .data(json!({ "polls": polls }).to_string()));
            }
            Err(e) => {
                error!("failed to load polls for stream: {}", e);
                yield Ok(error_event("Failed to load polls"));
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => yield Ok(to_sse(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "poll stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}

/// Events for one poll, delivered through its subscription group.
pub async fn poll_updates_sse(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscriptions = app_state.broadcaster.subscriptions().clone();
    let (connection_id, mut outbox) = subscriptions.connect();
    subscriptions.join(connection_id, poll_id);
    let guard = ConnectionGuard::new(connection_id, subscriptions);

    debug!(poll_id = %poll_id, connection_id = %connection_id, "poll stream opened");

    let stream = async_stream::stream! {
        // unregisters the connection once the client goes away
        let _guard = guard;

        match app_state.store.get_poll(poll_id).await {
            Ok(Some(poll)) => {
                yield Ok::<_, Infallible>(Event::default()
                    .event("init")
                    .data(json!({
                        "poll": poll,
                        "totalVotes": poll.total_votes(),
                    }).to_string()));
            }
            Ok(None) => {
                yield Ok(error_event("Poll not found"));
            }
            Err(e) => {
                error!(poll_id = %poll_id, "failed to load poll for stream: {}", e);
                yield Ok(error_event("Database error"));
            }
        }

        while let Some(event) = outbox.recv().await {
            yield Ok(to_sse(&event));
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}
