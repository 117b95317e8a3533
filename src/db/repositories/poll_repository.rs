use crate::db::connection::DbPool;
use crate::db::models::{Poll, PollOption, PollOptionRow, PollRow, Vote};
use sqlx::Error;
use std::collections::HashMap;
use uuid::Uuid;

/// Reads every poll with its options and votes from a single snapshot,
/// newest poll first.
pub async fn get_polls_with_votes(pool: &DbPool) -> Result<Vec<Poll>, Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut *tx)
        .await?;

    let polls = sqlx::query_as::<_, PollRow>(
        "SELECT id, title, description, ends_at, is_active, created_at FROM polls ORDER BY created_at DESC",
    )
    .fetch_all(&mut *tx)
    .await?;

    let options = sqlx::query_as::<_, PollOptionRow>(
        "SELECT id, poll_id, option_text FROM poll_options ORDER BY position, id",
    )
    .fetch_all(&mut *tx)
    .await?;

    let votes = sqlx::query_as::<_, Vote>(
        "SELECT id, poll_id, option_id, user_id, created_at FROM votes ORDER BY created_at",
    )
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(assemble(polls, options, votes))
}

/// Nests option rows under their poll and vote rows under their option,
/// keeping the order each row list arrived in.
pub fn assemble(polls: Vec<PollRow>, options: Vec<PollOptionRow>, votes: Vec<Vote>) -> Vec<Poll> {
    let mut votes_by_option: HashMap<Uuid, Vec<Vote>> = HashMap::new();
    for vote in votes {
        votes_by_option.entry(vote.option_id).or_default().push(vote);
    }

    let mut options_by_poll: HashMap<Uuid, Vec<PollOption>> = HashMap::new();
    for row in options {
        let votes = votes_by_option.remove(&row.id).unwrap_or_default();
        options_by_poll
            .entry(row.poll_id)
            .or_default()
            .push(PollOption {
                id: row.id,
                poll_id: row.poll_id,
                text: row.option_text,
                votes,
            });
    }

    polls
        .into_iter()
        .map(|row| Poll {
            options: options_by_poll.remove(&row.id).unwrap_or_default(),
            id: row.id,
            title: row.title,
            description: row.description,
            ends_at: row.ends_at,
            is_active: row.is_active,
            created_at: row.created_at,
        })
        .collect()
}
