use crate::backend::{AuthEvent, Backend, Subscription};
use crate::db::models::User;
use crate::sse::models::{AppEvent, EventSender, NoticeLevel, notify};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub user: Option<User>,
    pub is_admin: bool,
    /// True until the start-up session recovery has finished.
    pub loading: bool,
}

impl SessionView {
    fn signed_out() -> Self {
        Self {
            user: None,
            is_admin: false,
            loading: false,
        }
    }
}

/// Current identity and administrator flag for this client instance.
///
/// Mutated only by its own lifecycle (`init`, `on_auth_event`, `reset`) in
/// response to the backend; everything else reads snapshots.
pub struct SessionContext {
    backend: Arc<dyn Backend>,
    state: RwLock<SessionView>,
    /// Bumped by every auth event; a session read that started before the
    /// bump is stale.
    auth_generation: AtomicU64,
    events: EventSender,
}

impl SessionContext {
    pub fn new(backend: Arc<dyn Backend>, events: EventSender) -> Self {
        Self {
            backend,
            state: RwLock::new(SessionView {
                user: None,
                is_admin: false,
                loading: true,
            }),
            auth_generation: AtomicU64::new(0),
            events,
        }
    }

    pub async fn snapshot(&self) -> SessionView {
        self.state.read().await.clone()
    }

    pub async fn user(&self) -> Option<User> {
        self.state.read().await.user.clone()
    }

    pub async fn set_user(&self, user: Option<User>) {
        let mut state = self.state.write().await;
        Self::replace_user(&mut state, user);
        self.publish(&state);
    }

    fn replace_user(state: &mut SessionView, user: Option<User>) {
        if state.user.as_ref().map(|u| u.id) != user.as_ref().map(|u| u.id) {
            state.is_admin = false;
        }
        state.user = user;
    }

    pub async fn set_is_admin(&self, is_admin: bool) {
        let mut state = self.state.write().await;
        state.is_admin = is_admin;
        self.publish(&state);
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = SessionView::signed_out();
        self.publish(&state);
    }

    /// Recovers an existing backend session, if there is one. An auth event
    /// that arrives while the session is being read wins over the read.
    pub async fn init(&self) {
        let generation = self.auth_generation.load(Ordering::SeqCst);
        let result = self.backend.get_session().await;

        let mut state = self.state.write().await;
        state.loading = false;
        if self.auth_generation.load(Ordering::SeqCst) != generation {
            debug!("Auth state changed during session recovery, keeping it");
            self.publish(&state);
            return;
        }

        match result {
            Ok(Some(user)) => {
                info!(user_id = %user.id, "Recovered session");
                Self::replace_user(&mut state, Some(user.clone()));
                self.publish(&state);
                drop(state);
                self.load_profile(&user).await;
            }
            Ok(None) => {
                debug!("No session to recover");
                *state = SessionView::signed_out();
                self.publish(&state);
            }
            Err(e) => {
                error!("Session initialization failed: {}", e);
                *state = SessionView::signed_out();
                self.publish(&state);
                drop(state);
                notify(
                    &self.events,
                    NoticeLevel::Warning,
                    "Could not restore your session, please sign in again",
                );
            }
        }
    }

    pub async fn on_auth_event(&self, event: AuthEvent) {
        self.auth_generation.fetch_add(1, Ordering::SeqCst);
        match event {
            AuthEvent::SignedOut => {
                info!("Auth state changed: signed out");
                self.reset().await;
            }
            AuthEvent::SignedIn(user) | AuthEvent::TokenRefreshed(user) => {
                info!(user_id = %user.id, "Auth state changed: signed in");
                self.set_user(Some(user.clone())).await;
                self.load_profile(&user).await;
            }
        }
    }

    /// Subscribes to auth-state changes for as long as the returned handle lives.
    pub fn listen(self: &Arc<Self>) -> Subscription {
        let mut rx = self.backend.auth_events();
        let ctx = Arc::clone(self);

        Subscription::new(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => ctx.on_auth_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} auth events, re-reading session", missed);
                        ctx.init().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn load_profile(&self, user: &User) {
        match self.backend.fetch_profile(user.id).await {
            Ok(profile) => {
                let is_admin = profile.is_some_and(|p| p.is_admin);
                let mut state = self.state.write().await;
                // The user may have signed out while the profile was loading.
                if state.user.as_ref().map(|u| u.id) == Some(user.id) {
                    state.is_admin = is_admin;
                    self.publish(&state);
                }
            }
            Err(e) => {
                error!(user_id = %user.id, "Failed to load profile: {}", e);
                self.reset().await;
                notify(
                    &self.events,
                    NoticeLevel::Warning,
                    "Could not load your profile, please sign in again",
                );
            }
        }
    }

    fn publish(&self, state: &SessionView) {
        let _ = self.events.send(AppEvent::Session(state.clone()));
    }
}
