use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Error, PgConnection};
use uuid::Uuid;

use crate::db::connection::DbPool;
use crate::db::models::{Category, Comment, NewPoll, Poll, PollOption, User};
use crate::db::repositories::comment_repository;

#[derive(sqlx::FromRow)]
struct PollRow {
    id: Uuid,
    creator_id: Uuid,
    question: String,
    category: String,
    voted_users: Vec<Uuid>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    revision: i64,
    creator_username: Option<String>,
    creator_email: Option<String>,
}

#[derive(sqlx::FromRow)]
struct OptionRow {
    id: Uuid,
    poll_id: Uuid,
    option_text: String,
    votes: i32,
}

const POLL_COLUMNS: &str = r#"
    SELECT p.id, p.creator_id, p.question, p.category, p.voted_users, p.expires_at,
           p.created_at, p.revision,
           u.username AS creator_username, u.email AS creator_email
    FROM polls p
    LEFT JOIN users u ON u.id = p.creator_id
"#;

impl PollRow {
    fn into_poll(self, options: Vec<PollOption>, comments: Vec<Comment>) -> Poll {
        let created_by = match (self.creator_username, self.creator_email) {
            (Some(username), Some(email)) => Some(User {
                id: self.creator_id,
                username,
                email,
            }),
            _ => None,
        };

        Poll {
            id: self.id,
            question: self.question,
            category: Category::parse(&self.category).unwrap_or_default(),
            creator_id: self.creator_id,
            created_by,
            options,
            voted_users: self.voted_users,
            comments,
            expires_at: self.expires_at,
            created_at: self.created_at,
            revision: self.revision,
        }
    }
}

pub async fn create_poll(pool: &DbPool, new_poll: &NewPoll) -> Result<Uuid, Error> {
    let poll_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO polls (id, creator_id, question, category, expires_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(poll_id)
    .bind(new_poll.creator_id)
    .bind(&new_poll.question)
    .bind(new_poll.category.as_str())
    .bind(new_poll.expires_at)
    .execute(&mut *tx)
    .await?;

    for (position, text) in new_poll.options.iter().enumerate() {
        sqlx::query(
            "INSERT INTO poll_options (id, poll_id, position, option_text) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(poll_id)
        .bind(position as i32)
        .bind(text)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(poll_id)
}

async fn get_options(
    conn: &mut PgConnection,
    poll_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<PollOption>>, Error> {
    let rows = sqlx::query_as::<_, OptionRow>(
        "SELECT id, poll_id, option_text, votes FROM poll_options WHERE poll_id = ANY($1) ORDER BY poll_id, position",
    )
    .bind(poll_ids)
    .fetch_all(conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<PollOption>> = HashMap::new();
    for row in rows {
        grouped.entry(row.poll_id).or_default().push(PollOption {
            id: row.id,
            text: row.option_text,
            votes: i64::from(row.votes),
        });
    }
    Ok(grouped)
}

async fn assemble(conn: &mut PgConnection, rows: Vec<PollRow>) -> Result<Vec<Poll>, Error> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut options = get_options(&mut *conn, &ids).await?;
    let mut comments = comment_repository::get_comments_for_polls(&mut *conn, &ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let poll_options = options.remove(&row.id).unwrap_or_default();
            let poll_comments = comments.remove(&row.id).unwrap_or_default();
            row.into_poll(poll_options, poll_comments)
        })
        .collect())
}

pub async fn get_poll(pool: &DbPool, poll_id: Uuid) -> Result<Option<Poll>, Error> {
    let mut conn = pool.acquire().await?;
    fetch_poll(&mut conn, poll_id).await
}

/// Reads a poll on the given connection, so a caller holding a transaction
/// sees its own uncommitted writes.
pub async fn fetch_poll(conn: &mut PgConnection, poll_id: Uuid) -> Result<Option<Poll>, Error> {
    let row = sqlx::query_as::<_, PollRow>(&format!("{POLL_COLUMNS} WHERE p.id = $1"))
        .bind(poll_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(assemble(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

pub async fn poll_exists(pool: &DbPool, poll_id: Uuid) -> Result<bool, Error> {
    let row = sqlx::query("SELECT 1 FROM polls WHERE id = $1")
        .bind(poll_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.is_some())
}

pub async fn get_all_polls(pool: &DbPool) -> Result<Vec<Poll>, Error> {
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query_as::<_, PollRow>(&format!("{POLL_COLUMNS} ORDER BY p.created_at DESC"))
        .fetch_all(&mut *conn)
        .await?;

    assemble(&mut conn, rows).await
}

pub async fn get_polls_by_creator(pool: &DbPool, creator_id: Uuid) -> Result<Vec<Poll>, Error> {
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query_as::<_, PollRow>(&format!(
        "{POLL_COLUMNS} WHERE p.creator_id = $1 ORDER BY p.created_at DESC"
    ))
    .bind(creator_id)
    .fetch_all(&mut *conn)
    .await?;

    assemble(&mut conn, rows).await
}

pub async fn delete_poll(pool: &DbPool, poll_id: Uuid) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM polls WHERE id = $1")
        .bind(poll_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
