use crate::backend::{Backend, Subscription, Table};
use crate::db::models::Poll;
use crate::error::BackendError;
use crate::sse::models::{AppEvent, EventSender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone)]
pub enum PollsState {
    Loading,
    Ready(Arc<Vec<Poll>>),
    /// Retryable; previous data is not kept alongside the error.
    Failed(String),
}

struct Applied {
    state: PollsState,
    ticket: u64,
}

/// In-memory copy of every poll, replaced wholesale on each fetch.
pub struct PollStore {
    backend: Arc<dyn Backend>,
    inner: RwLock<Applied>,
    next_ticket: AtomicU64,
    events: EventSender,
}

impl PollStore {
    pub fn new(backend: Arc<dyn Backend>, events: EventSender) -> Self {
        Self {
            backend,
            inner: RwLock::new(Applied {
                state: PollsState::Loading,
                ticket: 0,
            }),
            next_ticket: AtomicU64::new(1),
            events,
        }
    }

    pub async fn state(&self) -> PollsState {
        self.inner.read().await.state.clone()
    }

    pub async fn poll(&self, poll_id: uuid::Uuid) -> Option<Poll> {
        match &self.inner.read().await.state {
            PollsState::Ready(polls) => polls.iter().find(|p| p.id == poll_id).cloned(),
            _ => None,
        }
    }

    /// Composite read of polls, options and votes, replacing the whole
    /// collection. A response older than one already applied is discarded.
    pub async fn fetch_all(&self) -> Result<Arc<Vec<Poll>>, BackendError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);

        // State changes only once a result is in hand; a dropped fetch leaves
        // the current state as it was.
        let result = self.backend.fetch_polls().await;

        let mut inner = self.inner.write().await;
        if ticket < inner.ticket {
            debug!(ticket, applied = inner.ticket, "Discarding stale poll fetch");
            return match (&inner.state, result) {
                (PollsState::Ready(polls), _) => Ok(polls.clone()),
                (_, Err(e)) => Err(e),
                (_, Ok(polls)) => Ok(Arc::new(polls)),
            };
        }
        inner.ticket = ticket;

        match result {
            Ok(polls) => {
                let polls = Arc::new(polls);
                debug!(count = polls.len(), "Polls refreshed");
                inner.state = PollsState::Ready(polls.clone());
                let _ = self.events.send(AppEvent::PollsUpdated { polls: polls.len() });
                Ok(polls)
            }
            Err(e) => {
                error!("Failed to fetch polls: {}", e);
                inner.state = PollsState::Failed(e.to_string());
                let _ = self.events.send(AppEvent::PollsFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Re-fetches everything whenever either change stream fires.
    pub fn watch(self: &Arc<Self>) -> Subscription {
        let mut polls_rx = self.backend.subscribe(Table::Polls);
        let mut votes_rx = self.backend.subscribe(Table::Votes);
        let store = Arc::clone(self);

        Subscription::new(tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    r = polls_rx.recv() => r,
                    r = votes_rx.recv() => r,
                };

                match received {
                    Ok(change) => {
                        debug!(table = ?change.table, kind = ?change.kind, "Change notification");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} change notifications", missed);
                    }
                    Err(RecvError::Closed) => break,
                }

                // Errors are already logged and reflected in the store state.
                let _ = store.fetch_all().await;
            }
        }))
    }
}
