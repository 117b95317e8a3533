use crate::backend::PgBackend;
use crate::config::Config;
use crate::startup::AppState;
use axum::{
    Router,
    extract::Extension,
    http::{
        StatusCode,
        header::{ACCEPT, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::{get, post},
};
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[macro_use]
extern crate tracing;

mod auth;
mod backend;
mod config;
mod db;
mod error;
mod polls;
mod projection;
mod session;
mod sse;
mod startup;
mod store;
mod vote;

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/session", get(auth::get_session))
        .route("/api/auth/session", post(auth::set_session))
        .route("/api/auth/sign_out", post(auth::sign_out))
        .route("/api/polls", get(polls::list_polls))
        .route("/api/polls/refresh", post(polls::refresh_polls))
        .route("/api/polls/:poll_id/vote", post(polls::vote_on_poll))
        .route("/api/events", get(sse::events_sse))
        .layer(Extension(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_credentials(true)
                .allow_methods([
                    axum::http::Method::POST,
                    axum::http::Method::GET,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([CONTENT_TYPE, ACCEPT]),
        )
        .layer(TraceLayer::new_for_http())
        .fallback(handler_404)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;

    let pool = db::connection::init_db(&config.database_url, config.db_max_connections).await?;
    info!("Database ready");
    startup::spawn_pool_health_check(pool.clone());

    let verifier = auth::TokenVerifier::new(config.jwt_secret.as_bytes());
    let backend = PgBackend::new(pool, verifier, config.session_token.clone());

    let app_state = AppState::new(backend);
    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
