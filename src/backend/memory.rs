//! In-memory backend for tests: rows live in a `Vec`, failures can be
//! injected, calls are counted and session, fetch and vote lookups can be
//! held open.

use super::{AuthEvent, Backend, BackendResult, ChangeEvent, ChangeKind, Table};
use crate::db::models::{NewVote, Poll, PollOption, Profile, User, Vote};
use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

#[derive(Default)]
pub struct Failures {
    pub session: AtomicBool,
    pub profile: AtomicBool,
    pub fetch: AtomicBool,
    pub find: AtomicBool,
    pub insert: AtomicBool,
}

#[derive(Default)]
pub struct Calls {
    pub fetch: AtomicUsize,
    pub find: AtomicUsize,
    pub insert: AtomicUsize,
    pub profile: AtomicUsize,
}

pub struct MemoryBackend {
    polls: Mutex<Vec<Poll>>,
    profiles: Mutex<HashMap<Uuid, Profile>>,
    session: Mutex<Option<User>>,
    /// Enforce one vote per (poll, user) on insert, like the real table.
    pub unique_constraint: AtomicBool,
    pub fail: Failures,
    pub calls: Calls,
    pub hold_find: AtomicBool,
    /// `fetch_polls` never answers while set.
    pub hold_fetch: AtomicBool,
    pub hold_session: AtomicBool,
    pub session_entered: Notify,
    pub session_release: Notify,
    pub find_entered: Notify,
    pub find_release: Notify,
    auth_tx: broadcast::Sender<AuthEvent>,
    polls_tx: broadcast::Sender<ChangeEvent>,
    votes_tx: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            polls: Mutex::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            unique_constraint: AtomicBool::new(true),
            fail: Failures::default(),
            calls: Calls::default(),
            hold_find: AtomicBool::new(false),
            hold_fetch: AtomicBool::new(false),
            hold_session: AtomicBool::new(false),
            session_entered: Notify::new(),
            session_release: Notify::new(),
            find_entered: Notify::new(),
            find_release: Notify::new(),
            auth_tx: broadcast::channel(16).0,
            polls_tx: broadcast::channel(16).0,
            votes_tx: broadcast::channel(16).0,
        }
    }

    /// Each call creates a poll newer than the previous one.
    pub fn add_poll(
        &self,
        title: &str,
        options: &[&str],
        ends_at: DateTime<Utc>,
        is_active: bool,
    ) -> Poll {
        let id = Uuid::new_v4();
        let mut polls = self.polls.lock().unwrap();
        let created_at = Utc::now() + Duration::milliseconds(polls.len() as i64);
        let poll = Poll {
            id,
            title: title.to_string(),
            description: None,
            ends_at,
            is_active,
            created_at,
            options: options
                .iter()
                .map(|text| PollOption {
                    id: Uuid::new_v4(),
                    poll_id: id,
                    text: text.to_string(),
                    votes: Vec::new(),
                })
                .collect(),
        };
        polls.push(poll.clone());
        drop(polls);
        self.emit(Table::Polls, ChangeKind::Insert);
        poll
    }

    pub fn set_admin(&self, user_id: Uuid, is_admin: bool) {
        self.profiles.lock().unwrap().insert(
            user_id,
            Profile {
                id: user_id,
                is_admin,
            },
        );
    }

    pub fn set_user(&self, user: Option<User>) {
        *self.session.lock().unwrap() = user;
    }

    pub fn push_auth(&self, event: AuthEvent) {
        let _ = self.auth_tx.send(event);
    }

    pub fn emit(&self, table: Table, kind: ChangeKind) {
        let tx = match table {
            Table::Polls => &self.polls_tx,
            Table::Votes => &self.votes_tx,
        };
        let _ = tx.send(ChangeEvent { table, kind });
    }

    /// Adds a vote without going through `insert_vote`, as another client would.
    pub fn add_foreign_vote(&self, poll_id: Uuid, option_id: Uuid, user_id: Uuid) {
        self.push_vote(NewVote {
            poll_id,
            option_id,
            user_id,
        });
        self.emit(Table::Votes, ChangeKind::Insert);
    }

    fn push_vote(&self, vote: NewVote) -> Option<Vote> {
        let mut polls = self.polls.lock().unwrap();
        let option = polls
            .iter_mut()
            .find(|p| p.id == vote.poll_id)?
            .options
            .iter_mut()
            .find(|o| o.id == vote.option_id)?;
        let row = Vote {
            id: Uuid::new_v4(),
            poll_id: vote.poll_id,
            option_id: vote.option_id,
            user_id: vote.user_id,
            created_at: Utc::now(),
        };
        option.votes.push(row.clone());
        Some(row)
    }

    fn existing_vote(&self, poll_id: Uuid, user_id: Uuid) -> Option<Vote> {
        let polls = self.polls.lock().unwrap();
        polls
            .iter()
            .filter(|p| p.id == poll_id)
            .flat_map(|p| p.options.iter())
            .flat_map(|o| o.votes.iter())
            .find(|v| v.user_id == user_id)
            .cloned()
    }

    fn check(flag: &AtomicBool) -> BackendResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_session(&self) -> BackendResult<Option<User>> {
        let found = self.session.lock().unwrap().clone();
        if self.hold_session.load(Ordering::SeqCst) {
            self.session_entered.notify_one();
            self.session_release.notified().await;
        }
        Self::check(&self.fail.session)?;
        Ok(found)
    }

    async fn set_session(&self, access_token: &str) -> BackendResult<User> {
        let id = Uuid::parse_str(access_token).map_err(|_| BackendError::InvalidToken)?;
        let user = User { id, email: None };
        *self.session.lock().unwrap() = Some(user.clone());
        let _ = self.auth_tx.send(AuthEvent::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        *self.session.lock().unwrap() = None;
        let _ = self.auth_tx.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    async fn fetch_profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>> {
        self.calls.profile.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail.profile)?;
        Ok(self.profiles.lock().unwrap().get(&user_id).cloned())
    }

    async fn fetch_polls(&self) -> BackendResult<Vec<Poll>> {
        self.calls.fetch.fetch_add(1, Ordering::SeqCst);
        if self.hold_fetch.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Self::check(&self.fail.fetch)?;
        let mut polls = self.polls.lock().unwrap().clone();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(polls)
    }

    async fn find_vote(&self, poll_id: Uuid, user_id: Uuid) -> BackendResult<Option<Vote>> {
        self.calls.find.fetch_add(1, Ordering::SeqCst);
        let found = self.existing_vote(poll_id, user_id);
        // Held after the read, like a response still on the wire.
        if self.hold_find.load(Ordering::SeqCst) {
            self.find_entered.notify_one();
            self.find_release.notified().await;
        }
        Self::check(&self.fail.find)?;
        Ok(found)
    }

    async fn insert_vote(&self, vote: NewVote) -> BackendResult<Vote> {
        self.calls.insert.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail.insert)?;
        if self.unique_constraint.load(Ordering::SeqCst)
            && self.existing_vote(vote.poll_id, vote.user_id).is_some()
        {
            return Err(BackendError::Conflict(
                "duplicate key value violates unique constraint \"votes_poll_id_user_id_key\""
                    .to_string(),
            ));
        }
        let row = self
            .push_vote(vote)
            .ok_or_else(|| BackendError::Database("foreign key violation".to_string()))?;
        self.emit(Table::Votes, ChangeKind::Insert);
        Ok(row)
    }

    fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        match table {
            Table::Polls => self.polls_tx.subscribe(),
            Table::Votes => self.votes_tx.subscribe(),
        }
    }
}
