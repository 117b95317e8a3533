use crate::backend::Backend;
use crate::db::models::{NewVote, User};
use crate::error::{BackendError, VoteError};
use crate::sse::models::{EventSender, NoticeLevel, notify};
use crate::store::PollStore;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    /// Not an error: the user already has a vote on this poll.
    AlreadyVoted,
}

/// Check-then-insert vote submission with one outstanding submission per poll.
///
/// The existence check only narrows the duplicate-vote window for this
/// client. Two clients can still both pass the check; only the backend's
/// unique (poll, user) constraint closes that race, and a conflict it
/// reports is treated as [`VoteOutcome::AlreadyVoted`].
pub struct VoteWorkflow {
    backend: Arc<dyn Backend>,
    polls: Arc<PollStore>,
    in_flight: Mutex<HashSet<Uuid>>,
    events: EventSender,
}

/// Clears the poll's in-flight marker when the submission ends, however it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    poll_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.poll_id);
    }
}

fn lock(set: &Mutex<HashSet<Uuid>>) -> MutexGuard<'_, HashSet<Uuid>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl VoteWorkflow {
    pub fn new(backend: Arc<dyn Backend>, polls: Arc<PollStore>, events: EventSender) -> Self {
        Self {
            backend,
            polls,
            in_flight: Mutex::new(HashSet::new()),
            events,
        }
    }

    pub fn is_in_flight(&self, poll_id: Uuid) -> bool {
        lock(&self.in_flight).contains(&poll_id)
    }

    pub async fn submit(
        &self,
        user: Option<&User>,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> Result<VoteOutcome, VoteError> {
        let Some(user) = user else {
            notify(&self.events, NoticeLevel::Info, "Sign in to vote");
            return Err(VoteError::SignInRequired);
        };

        let _guard = {
            let mut set = lock(&self.in_flight);
            if !set.insert(poll_id) {
                debug!(%poll_id, "Vote already in flight, rejecting");
                return Err(VoteError::InFlight);
            }
            InFlight {
                set: &self.in_flight,
                poll_id,
            }
        };

        let result = self.check_and_insert(user, poll_id, option_id).await;

        match &result {
            Ok(VoteOutcome::Recorded) => {
                info!(%poll_id, %option_id, user_id = %user.id, "Vote recorded");
                // The vote stands even if this refresh fails; the store shows
                // the fetch error on its own.
                let _ = self.polls.fetch_all().await;
                notify(&self.events, NoticeLevel::Success, "Vote recorded");
            }
            Ok(VoteOutcome::AlreadyVoted) => {
                info!(%poll_id, user_id = %user.id, "User already voted");
                notify(
                    &self.events,
                    NoticeLevel::Info,
                    "You have already voted on this poll",
                );
            }
            Err(e) => {
                error!(%poll_id, user_id = %user.id, "Vote failed: {}", e);
                notify(&self.events, NoticeLevel::Error, "Vote failed, please retry");
            }
        }

        result
    }

    async fn check_and_insert(
        &self,
        user: &User,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> Result<VoteOutcome, VoteError> {
        let existing = self
            .backend
            .find_vote(poll_id, user.id)
            .await
            .map_err(VoteError::Failed)?;
        if existing.is_some() {
            return Ok(VoteOutcome::AlreadyVoted);
        }

        let vote = NewVote {
            poll_id,
            option_id,
            user_id: user.id,
        };
        match self.backend.insert_vote(vote).await {
            Ok(_) => Ok(VoteOutcome::Recorded),
            Err(BackendError::Conflict(detail)) => {
                warn!(%poll_id, "Duplicate vote rejected by backend: {}", detail);
                Ok(VoteOutcome::AlreadyVoted)
            }
            Err(e) => Err(VoteError::Failed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::db::models::Poll;
    use crate::sse::models::event_channel;
    use chrono::{Duration, Utc};
    use std::sync::atomic::Ordering;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        store: Arc<PollStore>,
        workflow: Arc<VoteWorkflow>,
        poll: Poll,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let poll = backend.add_poll(
            "Favorite color",
            &["Red", "Blue"],
            Utc::now() + Duration::days(1),
            true,
        );
        let events = event_channel();
        let store = Arc::new(PollStore::new(backend.clone(), events.clone()));
        store.fetch_all().await.unwrap();
        let workflow = Arc::new(VoteWorkflow::new(backend.clone(), store.clone(), events));
        Fixture {
            backend,
            store,
            workflow,
            poll,
        }
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: None,
        }
    }

    #[tokio::test]
    async fn signed_out_fails_fast() {
        let f = fixture().await;

        let result = f.workflow.submit(None, f.poll.id, f.poll.options[0].id).await;

        assert!(matches!(result, Err(VoteError::SignInRequired)));
        assert_eq!(f.backend.calls.find.load(Ordering::SeqCst), 0);
        assert_eq!(f.backend.calls.insert.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recorded_vote_shows_up_after_refetch() {
        let f = fixture().await;
        let voter = user();
        let red = f.poll.options[0].id;
        let blue = f.poll.options[1].id;

        let outcome = f.workflow.submit(Some(&voter), f.poll.id, blue).await.unwrap();

        assert_eq!(outcome, VoteOutcome::Recorded);
        let poll = f.store.poll(f.poll.id).await.unwrap();
        assert_eq!(poll.option(red).unwrap().votes.len(), 0);
        assert_eq!(poll.option(blue).unwrap().votes.len(), 1);
        assert!(!f.workflow.is_in_flight(f.poll.id));
    }

    #[tokio::test]
    async fn existing_vote_is_never_reinserted() {
        let f = fixture().await;
        let voter = user();
        f.workflow
            .submit(Some(&voter), f.poll.id, f.poll.options[0].id)
            .await
            .unwrap();

        for option in &f.poll.options {
            let outcome = f
                .workflow
                .submit(Some(&voter), f.poll.id, option.id)
                .await
                .unwrap();
            assert_eq!(outcome, VoteOutcome::AlreadyVoted);
        }
        assert_eq!(f.backend.calls.insert.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_conflict_reads_as_already_voted() {
        let f = fixture().await;
        let voter = user();
        // Another session of the same user slipped a vote in after our check.
        f.backend.hold_find.store(true, Ordering::SeqCst);
        let task = {
            let workflow = f.workflow.clone();
            let voter = voter.clone();
            let (poll_id, option_id) = (f.poll.id, f.poll.options[0].id);
            tokio::spawn(async move { workflow.submit(Some(&voter), poll_id, option_id).await })
        };
        f.backend.find_entered.notified().await;
        f.backend
            .add_foreign_vote(f.poll.id, f.poll.options[1].id, voter.id);
        f.backend.find_release.notify_one();

        let outcome = task.await.unwrap().unwrap();

        assert_eq!(outcome, VoteOutcome::AlreadyVoted);
        assert_eq!(f.backend.calls.insert.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_submission_while_in_flight_is_rejected_locally() {
        let f = fixture().await;
        let voter = user();
        f.backend.hold_find.store(true, Ordering::SeqCst);

        let first = {
            let workflow = f.workflow.clone();
            let voter = voter.clone();
            let (poll_id, option_id) = (f.poll.id, f.poll.options[0].id);
            tokio::spawn(async move { workflow.submit(Some(&voter), poll_id, option_id).await })
        };
        f.backend.find_entered.notified().await;
        assert!(f.workflow.is_in_flight(f.poll.id));

        let second = f
            .workflow
            .submit(Some(&voter), f.poll.id, f.poll.options[1].id)
            .await;

        assert!(matches!(second, Err(VoteError::InFlight)));
        assert_eq!(f.backend.calls.find.load(Ordering::SeqCst), 1);

        f.backend.hold_find.store(false, Ordering::SeqCst);
        f.backend.find_release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), VoteOutcome::Recorded);
        assert!(!f.workflow.is_in_flight(f.poll.id));
    }

    #[tokio::test]
    async fn other_polls_are_not_blocked() {
        let f = fixture().await;
        let other = f
            .backend
            .add_poll("Pets", &["Cat", "Dog"], Utc::now() + Duration::days(1), true);
        let voter = user();
        f.backend.hold_find.store(true, Ordering::SeqCst);

        let first = {
            let workflow = f.workflow.clone();
            let voter = voter.clone();
            let (poll_id, option_id) = (f.poll.id, f.poll.options[0].id);
            tokio::spawn(async move { workflow.submit(Some(&voter), poll_id, option_id).await })
        };
        f.backend.find_entered.notified().await;
        f.backend.hold_find.store(false, Ordering::SeqCst);

        let outcome = f
            .workflow
            .submit(Some(&voter), other.id, other.options[1].id)
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Recorded);

        f.backend.find_release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), VoteOutcome::Recorded);
    }

    #[tokio::test]
    async fn failures_clear_marker_and_allow_retry() {
        let f = fixture().await;
        let voter = user();
        let option = f.poll.options[0].id;

        f.backend.fail.find.store(true, Ordering::SeqCst);
        let result = f.workflow.submit(Some(&voter), f.poll.id, option).await;
        assert!(matches!(result, Err(VoteError::Failed(_))));
        assert!(!f.workflow.is_in_flight(f.poll.id));
        assert_eq!(f.backend.calls.insert.load(Ordering::SeqCst), 0);

        f.backend.fail.find.store(false, Ordering::SeqCst);
        f.backend.fail.insert.store(true, Ordering::SeqCst);
        let result = f.workflow.submit(Some(&voter), f.poll.id, option).await;
        assert!(matches!(result, Err(VoteError::Failed(_))));
        assert!(!f.workflow.is_in_flight(f.poll.id));

        f.backend.fail.insert.store(false, Ordering::SeqCst);
        let outcome = f.workflow.submit(Some(&voter), f.poll.id, option).await.unwrap();
        assert_eq!(outcome, VoteOutcome::Recorded);
    }

    #[tokio::test]
    async fn failed_refresh_does_not_undo_a_recorded_vote() {
        let f = fixture().await;
        f.backend.fail.fetch.store(true, Ordering::SeqCst);

        let outcome = f
            .workflow
            .submit(Some(&user()), f.poll.id, f.poll.options[0].id)
            .await
            .unwrap();

        assert_eq!(outcome, VoteOutcome::Recorded);
        assert!(matches!(
            f.store.state().await,
            crate::store::PollsState::Failed(_)
        ));
    }
}
