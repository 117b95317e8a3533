use crate::sse::models::AppEvent;
use crate::startup::AppState;
use crate::store::PollsState;
use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::{convert::Infallible, time::Duration};
use tokio::sync::broadcast::error::RecvError;

/// Pushes session changes, poll refreshes and notices to the page. The page
/// re-reads `/api/polls` on `polls_updated`.
pub async fn events_sse(
    Extension(app_state): Extension<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = app_state.events.subscribe();

    let stream = async_stream::stream! {
        let session = app_state.session.snapshot().await;
        let polls = match app_state.polls.state().await {
            PollsState::Loading => json!({"status": "loading"}),
            PollsState::Ready(polls) => json!({"status": "ready", "polls": polls.len()}),
            PollsState::Failed(error) => json!({"status": "failed", "error": error}),
        };
        yield Ok(Event::default()
            .event("init")
            .data(json!({"session": session, "polls": polls}).to_string()));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(sse_event) = to_sse(&event) {
                        yield Ok(sse_event);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("SSE client lagged by {} events", missed);
                    yield Ok(Event::default()
                        .event("polls_updated")
                        .data(json!({"resync": true}).to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

fn to_sse(event: &AppEvent) -> Option<Event> {
    let data = match event {
        AppEvent::PollsUpdated { polls } => json!({"polls": polls}),
        AppEvent::PollsFailed { error } => json!({"error": error, "retryable": true}),
        AppEvent::Session(view) => serde_json::to_value(view).ok()?,
        AppEvent::Notice(notice) => serde_json::to_value(notice).ok()?,
    };

    Some(Event::default().event(event.name()).data(data.to_string()))
}
