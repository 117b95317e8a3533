use crate::db::models::User;
use crate::error::{BackendError, PollError};
use crate::startup::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Claims carried by access tokens the auth service issues.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// `Ok(None)` when the token is well formed but expired.
    pub fn verify(&self, token: &str) -> Result<Option<User>, BackendError> {
        match decode::<AccessClaims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(Some(User {
                id: data.claims.sub,
                email: data.claims.email,
            })),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetSessionRequest {
    pub access_token: String,
}

/// Hands a token from the auth service to the backend. The session context
/// picks the change up through its auth-event subscription.
pub async fn set_session(
    Extension(app_state): Extension<AppState>,
    Json(payload): Json<SetSessionRequest>,
) -> Result<impl IntoResponse, PollError> {
    if payload.access_token.trim().is_empty() {
        return Err(PollError::InvalidRequest);
    }

    let user = app_state
        .backend
        .set_session(payload.access_token.trim())
        .await
        .map_err(|e| {
            warn!("Rejected access token: {}", e);
            e
        })?;

    info!(user_id = %user.id, "Session accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "user": user
        })),
    ))
}

pub async fn sign_out(
    Extension(app_state): Extension<AppState>,
) -> Result<impl IntoResponse, PollError> {
    app_state.backend.sign_out().await?;
    info!("Signed out");

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "signed_out" }))))
}

pub async fn get_session(Extension(app_state): Extension<AppState>) -> impl IntoResponse {
    Json(app_state.session.snapshot().await)
}

#[cfg(test)]
pub mod test_tokens {
    use super::AccessClaims;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    pub fn mint(secret: &[u8], user_id: Uuid, exp: usize) -> String {
        let claims = AccessClaims {
            sub: user_id,
            exp,
            email: Some("voter@example.com".to_string()),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    pub fn in_one_hour() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }
}
