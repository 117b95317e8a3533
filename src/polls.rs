use crate::error::{BackendError, PollError};
use crate::projection::{self, PollView, Viewer};
use crate::session::SessionView;
use crate::startup::AppState;
use crate::store::PollsState;
use crate::vote::VoteOutcome;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub option_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub success: bool,
    pub message: String,
    pub poll: Option<PollView>,
}

#[derive(Debug, Serialize)]
pub struct PollListResponse {
    pub session: SessionView,
    pub polls: Vec<PollView>,
}

fn viewer(session: &SessionView) -> Viewer {
    Viewer {
        user_id: session.user.as_ref().map(|u| u.id),
        is_admin: session.is_admin,
    }
}

async fn project_all(app_state: &AppState) -> Response {
    let session = app_state.session.snapshot().await;
    let viewer = viewer(&session);
    let now = Utc::now();

    match app_state.polls.state().await {
        PollsState::Loading => (
            StatusCode::OK,
            Json(json!({
                "status": "loading",
                "session": session
            })),
        )
            .into_response(),
        PollsState::Failed(details) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "Failed to load polls",
                "details": details,
                "retryable": true
            })),
        )
            .into_response(),
        PollsState::Ready(polls) => {
            let polls = polls
                .iter()
                .map(|poll| {
                    let in_flight = app_state.votes.is_in_flight(poll.id);
                    PollView::project(poll, &viewer, now, in_flight)
                })
                .collect();

            (StatusCode::OK, Json(PollListResponse { session, polls })).into_response()
        }
    }
}

/// Current poll list as this viewer should see it
pub async fn list_polls(Extension(app_state): Extension<AppState>) -> Response {
    project_all(&app_state).await
}

/// Retry after a failed load
pub async fn refresh_polls(Extension(app_state): Extension<AppState>) -> Response {
    // On failure the store is in its error state, which project_all renders.
    let _ = app_state.polls.fetch_all().await;
    project_all(&app_state).await
}

/// Cast a vote on a poll option (signed-in users only)
pub async fn vote_on_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<Uuid>,
    Json(payload): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, PollError> {
    let session = app_state.session.snapshot().await;
    let Some(user) = session.user.clone() else {
        // Fails fast with SignInRequired, without touching the backend.
        app_state
            .votes
            .submit(None, poll_id, payload.option_id)
            .await?;
        return Err(PollError::Unauthorized);
    };

    let poll = match app_state.polls.state().await {
        PollsState::Ready(_) => app_state
            .polls
            .poll(poll_id)
            .await
            .ok_or(PollError::PollNotFound)?,
        PollsState::Loading => return Err(PollError::Loading),
        PollsState::Failed(details) => {
            return Err(BackendError::Unavailable(details).into());
        }
    };

    if poll.option(payload.option_id).is_none() {
        return Err(PollError::OptionNotFound);
    }

    if !projection::is_open(&poll, Utc::now()) {
        return Err(PollError::PollClosed);
    }

    let outcome = app_state
        .votes
        .submit(Some(&user), poll_id, payload.option_id)
        .await?;

    let refreshed = app_state.polls.poll(poll_id).await.map(|p| {
        let in_flight = app_state.votes.is_in_flight(poll_id);
        PollView::project(&p, &viewer(&session), Utc::now(), in_flight)
    });

    let (status, message) = match outcome {
        VoteOutcome::Recorded => (StatusCode::OK, "Vote recorded successfully"),
        VoteOutcome::AlreadyVoted => (StatusCode::CONFLICT, "You have already voted on this poll"),
    };

    Ok((
        status,
        Json(VoteResponse {
            success: outcome == VoteOutcome::Recorded,
            message: message.to_string(),
            poll: refreshed,
        }),
    ))
}
