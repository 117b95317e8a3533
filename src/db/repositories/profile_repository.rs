use crate::db::connection::DbPool;
use crate::db::models::Profile;
use sqlx::Error;
use uuid::Uuid;

pub async fn get_profile(pool: &DbPool, user_id: Uuid) -> Result<Option<Profile>, Error> {
    sqlx::query_as::<_, Profile>("SELECT id, is_admin FROM profiles WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}
