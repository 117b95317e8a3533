//! View state derived from the current poll snapshot and session. Pure
//! functions; recomputed on every read.

use crate::db::models::Poll;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Who is looking at the polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: Option<Uuid>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionCount {
    pub option_id: Uuid,
    pub text: String,
    pub votes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionView {
    pub id: Uuid,
    pub text: String,
    pub selected: bool,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Results {
    pub counts: Vec<OptionCount>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollView {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_open: bool,
    pub has_voted: bool,
    pub can_vote: bool,
    pub options: Vec<OptionView>,
    /// Hidden unless the viewer is an admin or has already voted.
    pub results: Option<Results>,
}

pub fn has_voted(poll: &Poll, user_id: Uuid) -> bool {
    selected_option(poll, user_id).is_some()
}

pub fn selected_option(poll: &Poll, user_id: Uuid) -> Option<Uuid> {
    poll.options
        .iter()
        .find(|o| o.votes.iter().any(|v| v.user_id == user_id))
        .map(|o| o.id)
}

/// Open means the end time is still ahead and the poll has not been
/// deactivated; deactivation wins over a future end time.
pub fn is_open(poll: &Poll, now: DateTime<Utc>) -> bool {
    poll.is_active && poll.ends_at > now
}

pub fn vote_counts(poll: &Poll) -> Vec<OptionCount> {
    poll.options
        .iter()
        .map(|o| OptionCount {
            option_id: o.id,
            text: o.text.clone(),
            votes: o.votes.len(),
        })
        .collect()
}

pub fn results_visible(poll: &Poll, viewer: &Viewer) -> bool {
    viewer.is_admin || viewer.user_id.is_some_and(|id| has_voted(poll, id))
}

pub fn can_vote(poll: &Poll, viewer: &Viewer, now: DateTime<Utc>, in_flight: bool) -> bool {
    match viewer.user_id {
        Some(id) => !in_flight && is_open(poll, now) && !has_voted(poll, id),
        None => false,
    }
}

impl PollView {
    pub fn project(poll: &Poll, viewer: &Viewer, now: DateTime<Utc>, in_flight: bool) -> Self {
        let selected = viewer.user_id.and_then(|id| selected_option(poll, id));
        let can_vote = can_vote(poll, viewer, now, in_flight);

        let results = results_visible(poll, viewer).then(|| {
            let counts = vote_counts(poll);
            let total = counts.iter().map(|c| c.votes).sum();
            Results { counts, total }
        });

        Self {
            id: poll.id,
            title: poll.title.clone(),
            description: poll.description.clone(),
            ends_at: poll.ends_at,
            created_at: poll.created_at,
            is_open: is_open(poll, now),
            has_voted: selected.is_some(),
            can_vote,
            options: poll
                .options
                .iter()
                .map(|o| OptionView {
                    id: o.id,
                    text: o.text.clone(),
                    selected: selected == Some(o.id),
                    disabled: !can_vote,
                })
                .collect(),
            results,
        }
    }
}
