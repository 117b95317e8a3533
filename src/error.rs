use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures reported by the storage/auth/realtime collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Unique constraint violated: {0}")]
    Conflict(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum VoteError {
    #[error("Sign in required")]
    SignInRequired,
    #[error("A vote on this poll is already being submitted")]
    InFlight,
    #[error("Vote failed: {0}")]
    Failed(#[source] BackendError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable {0} must be set")]
    Missing(&'static str),
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Poll not found")]
    PollNotFound,
    #[error("Poll option not found")]
    OptionNotFound,
    #[error("Poll is closed")]
    PollClosed,
    #[error("A vote on this poll is already in progress")]
    VoteInFlight,
    #[error("Polls are still loading")]
    Loading,
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            PollError::Unauthorized => (StatusCode::UNAUTHORIZED, "Sign in required"),
            PollError::InvalidRequest => (StatusCode::BAD_REQUEST, "Invalid request"),
            PollError::PollNotFound => (StatusCode::NOT_FOUND, "Poll not found"),
            PollError::OptionNotFound => (StatusCode::NOT_FOUND, "Poll option not found"),
            PollError::PollClosed => (StatusCode::BAD_REQUEST, "Poll is closed"),
            PollError::VoteInFlight => (StatusCode::CONFLICT, "Vote already in progress"),
            PollError::Loading => (StatusCode::SERVICE_UNAVAILABLE, "Polls are loading"),
            PollError::Backend(BackendError::InvalidToken) => {
                (StatusCode::UNAUTHORIZED, "Invalid token")
            }
            PollError::Backend(_) => (StatusCode::BAD_GATEWAY, "Backend request failed, retry"),
        };

        let body = Json(json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<VoteError> for PollError {
    fn from(error: VoteError) -> Self {
        match error {
            VoteError::SignInRequired => PollError::Unauthorized,
            VoteError::InFlight => PollError::VoteInFlight,
            VoteError::Failed(e) => PollError::Backend(e),
        }
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                BackendError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                BackendError::Unavailable(error.to_string())
            }
            _ => BackendError::Database(error.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for BackendError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        BackendError::InvalidToken
    }
}
