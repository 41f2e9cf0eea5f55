use crate::db::connection::DbPool;
use crate::db::models::User;
use sqlx::{Error, Row};
use uuid::Uuid;

pub async fn get_user(pool: &DbPool, user_id: Uuid) -> Result<Option<User>, Error> {
    let row = sqlx::query("SELECT id, username, email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| User {
        id: r.get("id"),
        username: r.get("username"),
        email: r.get("email"),
    }))
}

/// Profiles belong to the auth service; this only mirrors them for display.
pub async fn upsert_user(pool: &DbPool, user: &User) -> Result<(), Error> {
    sqlx::query(
        r#"
        INSERT INTO users (id, username, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET username = EXCLUDED.username, email = EXCLUDED.email
        "#,
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(&user.email)
    .execute(pool)
    .await?;

    Ok(())
}
