use crate::db::connection::DbPool;
use crate::db::models::{NewVote, Vote};
use sqlx::Error;
use uuid::Uuid;

pub async fn find_vote(pool: &DbPool, poll_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, Error> {
    sqlx::query_as::<_, Vote>(
        "SELECT id, poll_id, option_id, user_id, created_at FROM votes WHERE poll_id = $1 AND user_id = $2",
    )
    .bind(poll_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Single-row insert; fails with a unique violation when the user already
/// has a vote on the poll.
pub async fn insert_vote(pool: &DbPool, vote: NewVote) -> Result<Vote, Error> {
    sqlx::query_as::<_, Vote>(
        r#"
        INSERT INTO votes (id, poll_id, option_id, user_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id, poll_id, option_id, user_id, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(vote.poll_id)
    .bind(vote.option_id)
    .bind(vote.user_id)
    .fetch_one(pool)
    .await
}
