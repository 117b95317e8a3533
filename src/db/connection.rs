use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

pub type DbPool = Pool<Postgres>;

/// Channel names used by the change-notification triggers.
pub const POLLS_CHANNEL: &str = "polls_changed";
pub const VOTES_CHANNEL: &str = "votes_changed";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        id UUID PRIMARY KEY,
        is_admin BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS polls (
        id UUID PRIMARY KEY,
        title VARCHAR(255) NOT NULL,
        description TEXT,
        ends_at TIMESTAMP WITH TIME ZONE NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS poll_options (
        id UUID PRIMARY KEY,
        poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
        option_text VARCHAR(255) NOT NULL,
        position INT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        id UUID PRIMARY KEY,
        poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
        option_id UUID NOT NULL REFERENCES poll_options(id) ON DELETE CASCADE,
        user_id UUID NOT NULL,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(poll_id, user_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_polls_created_at ON polls(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_poll_options_poll_id ON poll_options(poll_id)",
    "CREATE INDEX IF NOT EXISTS idx_votes_option_id ON votes(option_id)",
    r#"
    CREATE OR REPLACE FUNCTION notify_table_change() RETURNS trigger AS $$
    BEGIN
        PERFORM pg_notify(TG_TABLE_NAME || '_changed', TG_OP);
        RETURN NULL;
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS polls_notify ON polls",
    r#"
    CREATE TRIGGER polls_notify
    AFTER INSERT OR UPDATE OR DELETE ON polls
    FOR EACH STATEMENT EXECUTE FUNCTION notify_table_change()
    "#,
    "DROP TRIGGER IF EXISTS votes_notify ON votes",
    r#"
    CREATE TRIGGER votes_notify
    AFTER INSERT OR UPDATE OR DELETE ON votes
    FOR EACH STATEMENT EXECUTE FUNCTION notify_table_change()
    "#,
];

pub async fn init_db(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .max_lifetime(Duration::from_secs(30 * 60))
        .idle_timeout(Duration::from_secs(10 * 60))
        .connect(database_url)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}

pub fn pool_stats(pool: &DbPool) -> String {
    let size = pool.size() as usize;
    let num_idle = pool.num_idle();
    format!(
        "Pool stats: size={}, idle={}, in_use={}",
        size,
        num_idle,
        size.saturating_sub(num_idle)
    )
}
