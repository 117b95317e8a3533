use crate::backend::{Backend, Subscription};
use crate::db::connection::{DbPool, pool_stats};
use crate::session::SessionContext;
use crate::sse::models::{EventSender, event_channel};
use crate::store::PollStore;
use crate::vote::VoteWorkflow;
use std::sync::Arc;
use tokio::time::{Duration, interval};

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub session: Arc<SessionContext>,
    pub polls: Arc<PollStore>,
    pub votes: Arc<VoteWorkflow>,
    pub events: EventSender,
    _subscriptions: Arc<Vec<Subscription>>,
}

impl AppState {
    /// Wires the components together and starts their backend subscriptions.
    /// Session recovery and the first poll load run in the background; the
    /// views report `loading` until they finish.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let events = event_channel();
        let session = Arc::new(SessionContext::new(backend.clone(), events.clone()));
        let polls = Arc::new(PollStore::new(backend.clone(), events.clone()));
        let votes = Arc::new(VoteWorkflow::new(
            backend.clone(),
            polls.clone(),
            events.clone(),
        ));

        let subscriptions = vec![session.listen(), polls.watch()];

        {
            let session = session.clone();
            let polls = polls.clone();
            tokio::spawn(async move {
                session.init().await;
                if polls.fetch_all().await.is_err() {
                    warn!("Initial poll load failed; waiting for retry");
                }
            });
        }

        AppState {
            backend,
            session,
            polls,
            votes,
            events,
            _subscriptions: Arc::new(subscriptions),
        }
    }
}

pub fn spawn_pool_health_check(pool: DbPool) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match pool.acquire().await {
                Ok(conn) => {
                    drop(conn);
                    debug!("{}", pool_stats(&pool));
                }
                Err(e) => {
                    error!("Database connection health check failed: {}", e);
                }
            }
        }
    });
}
