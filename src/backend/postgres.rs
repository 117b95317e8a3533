use super::{AuthEvent, Backend, BackendResult, ChangeEvent, ChangeKind, Table};
use crate::auth::TokenVerifier;
use crate::db::connection::{DbPool, POLLS_CHANNEL, VOTES_CHANNEL};
use crate::db::models::{NewVote, Poll, Profile, User, Vote};
use crate::db::repositories::{poll_repository, profile_repository, vote_repository};
use crate::error::BackendError;
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 100;

/// PostgreSQL-backed service of record. Change notifications come from the
/// `pg_notify` triggers installed by [`crate::db::connection::init_db`].
pub struct PgBackend {
    pool: DbPool,
    verifier: TokenVerifier,
    access_token: RwLock<Option<String>>,
    auth_tx: broadcast::Sender<AuthEvent>,
    polls_tx: broadcast::Sender<ChangeEvent>,
    votes_tx: broadcast::Sender<ChangeEvent>,
}

impl PgBackend {
    pub fn new(pool: DbPool, verifier: TokenVerifier, access_token: Option<String>) -> Arc<Self> {
        let backend = Arc::new(Self {
            pool,
            verifier,
            access_token: RwLock::new(access_token),
            auth_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            polls_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            votes_tx: broadcast::channel(CHANNEL_CAPACITY).0,
        });

        tokio::spawn(relay_notifications(
            backend.pool.clone(),
            backend.polls_tx.clone(),
            backend.votes_tx.clone(),
        ));

        backend
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn get_session(&self) -> BackendResult<Option<User>> {
        let token = self.access_token.read().await.clone();
        let Some(token) = token else {
            return Ok(None);
        };

        let user = self.verifier.verify(&token)?;
        if user.is_none() {
            debug!("Stored access token has expired");
            *self.access_token.write().await = None;
        }
        Ok(user)
    }

    async fn set_session(&self, access_token: &str) -> BackendResult<User> {
        let user = self
            .verifier
            .verify(access_token)?
            .ok_or(BackendError::InvalidToken)?;

        let previous = self
            .access_token
            .write()
            .await
            .replace(access_token.to_string());

        let event = match previous.and_then(|t| self.verifier.verify(&t).ok().flatten()) {
            Some(prev) if prev.id == user.id => AuthEvent::TokenRefreshed(user.clone()),
            _ => AuthEvent::SignedIn(user.clone()),
        };
        let _ = self.auth_tx.send(event);

        Ok(user)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        *self.access_token.write().await = None;
        let _ = self.auth_tx.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    async fn fetch_profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>> {
        Ok(profile_repository::get_profile(&self.pool, user_id).await?)
    }

    async fn fetch_polls(&self) -> BackendResult<Vec<Poll>> {
        Ok(poll_repository::get_polls_with_votes(&self.pool).await?)
    }

    async fn find_vote(&self, poll_id: Uuid, user_id: Uuid) -> BackendResult<Option<Vote>> {
        Ok(vote_repository::find_vote(&self.pool, poll_id, user_id).await?)
    }

    async fn insert_vote(&self, vote: NewVote) -> BackendResult<Vote> {
        Ok(vote_repository::insert_vote(&self.pool, vote).await?)
    }

    fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        match table {
            Table::Polls => self.polls_tx.subscribe(),
            Table::Votes => self.votes_tx.subscribe(),
        }
    }
}

fn resync(polls_tx: &broadcast::Sender<ChangeEvent>, votes_tx: &broadcast::Sender<ChangeEvent>) {
    let _ = polls_tx.send(ChangeEvent {
        table: Table::Polls,
        kind: ChangeKind::Resync,
    });
    let _ = votes_tx.send(ChangeEvent {
        table: Table::Votes,
        kind: ChangeKind::Resync,
    });
}

async fn relay_notifications(
    pool: DbPool,
    polls_tx: broadcast::Sender<ChangeEvent>,
    votes_tx: broadcast::Sender<ChangeEvent>,
) {
    loop {
        let mut listener = match PgListener::connect_with(&pool).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to open notification listener: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if let Err(e) = listener.listen_all([POLLS_CHANNEL, VOTES_CHANNEL]).await {
            error!("Failed to LISTEN on change channels: {}", e);
            tokio::time::sleep(Duration::from_secs(5)).await;
            continue;
        }

        info!("Listening for poll and vote changes");

        loop {
            match listener.try_recv().await {
                Ok(Some(notification)) => {
                    let kind = ChangeKind::from_operation(notification.payload());
                    let sent = match notification.channel() {
                        POLLS_CHANNEL => polls_tx.send(ChangeEvent {
                            table: Table::Polls,
                            kind,
                        }),
                        VOTES_CHANNEL => votes_tx.send(ChangeEvent {
                            table: Table::Votes,
                            kind,
                        }),
                        other => {
                            warn!("Notification on unexpected channel {}", other);
                            continue;
                        }
                    };
                    if sent.is_err() {
                        debug!("No subscribers for change notification");
                    }
                }
                Ok(None) => {
                    warn!("Notification connection lost; forcing resync");
                    resync(&polls_tx, &votes_tx);
                }
                Err(e) => {
                    error!("Notification listener failed: {}", e);
                    resync(&polls_tx, &votes_tx);
                    break;
                }
            }
        }
    }
}
