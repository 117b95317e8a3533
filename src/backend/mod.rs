//! The hosted service of record: storage, authentication and change
//! notification. Everything in the application reaches it through [`Backend`].

use crate::db::models::{NewVote, Poll, Profile, User, Vote};
use crate::error::BackendError;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgBackend;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(User),
    TokenRefreshed(User),
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Polls,
    Votes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Notifications may have been missed; treat everything as changed.
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

impl ChangeKind {
    pub fn from_operation(op: &str) -> Self {
        match op {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => ChangeKind::Resync,
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// The session currently held by the client SDK, if any.
    async fn get_session(&self) -> BackendResult<Option<User>>;

    /// Adopt an access token issued by the auth service.
    async fn set_session(&self, access_token: &str) -> BackendResult<User>;

    async fn sign_out(&self) -> BackendResult<()>;

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    async fn fetch_profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>>;

    /// Every poll with nested options and votes, newest first.
    async fn fetch_polls(&self) -> BackendResult<Vec<Poll>>;

    async fn find_vote(&self, poll_id: Uuid, user_id: Uuid) -> BackendResult<Option<Vote>>;

    /// Fails with [`BackendError::Conflict`] if the user already voted on the poll.
    async fn insert_vote(&self, vote: NewVote) -> BackendResult<Vote>;

    fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent>;
}

/// A standing listener task. Dropping the handle releases the subscription.
#[derive(Debug)]
pub struct Subscription(JoinHandle<()>);

impl Subscription {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.0.abort();
    }
}
