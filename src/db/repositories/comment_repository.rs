use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Error, PgConnection, Row};
use uuid::Uuid;

use crate::db::connection::DbPool;
use crate::db::models::{Comment, User};

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    poll_id: Uuid,
    author_id: Uuid,
    text: String,
    hearts: i32,
    hearted_by: Vec<Uuid>,
    created_at: DateTime<Utc>,
    revision: i64,
    author_username: Option<String>,
    author_email: Option<String>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        let commented_by = match (row.author_username, row.author_email) {
            (Some(username), Some(email)) => Some(User {
                id: row.author_id,
                username,
                email,
            }),
            _ => None,
        };

        Comment {
            id: row.id,
            poll_id: row.poll_id,
            text: row.text,
            author_id: row.author_id,
            commented_by,
            hearts: i64::from(row.hearts),
            hearted_by: row.hearted_by,
            created_at: row.created_at,
            revision: row.revision,
        }
    }
}

const COMMENT_COLUMNS: &str = r#"
    c.id, c.poll_id, c.author_id, c.text, c.hearts, c.hearted_by, c.created_at, c.revision,
    u.username AS author_username, u.email AS author_email
"#;

pub async fn insert_comment(
    pool: &DbPool,
    poll_id: Uuid,
    author_id: Uuid,
    text: &str,
) -> Result<Option<Uuid>, Error> {
    let comment_id = Uuid::new_v4();

    let result = sqlx::query(
        r#"
        INSERT INTO comments (id, poll_id, author_id, text)
        SELECT $1, $2, $3, $4
        WHERE EXISTS (SELECT 1 FROM polls WHERE id = $2)
        "#,
    )
    .bind(comment_id)
    .bind(poll_id)
    .bind(author_id)
    .bind(text)
    .execute(pool)
    .await?;

    Ok((result.rows_affected() == 1).then_some(comment_id))
}

pub async fn get_comment(
    pool: &DbPool,
    poll_id: Uuid,
    comment_id: Uuid,
) -> Result<Option<Comment>, Error> {
    let row = sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments c LEFT JOIN users u ON u.id = c.author_id \
         WHERE c.id = $1 AND c.poll_id = $2"
    ))
    .bind(comment_id)
    .bind(poll_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Comment::from))
}

pub async fn get_poll_comments(pool: &DbPool, poll_id: Uuid) -> Result<Vec<Comment>, Error> {
    let mut conn = pool.acquire().await?;
    let mut grouped = get_comments_for_polls(&mut conn, &[poll_id]).await?;
    Ok(grouped.remove(&poll_id).unwrap_or_default())
}

pub async fn get_comments_for_polls(
    conn: &mut PgConnection,
    poll_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Comment>>, Error> {
    let rows = sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments c LEFT JOIN users u ON u.id = c.author_id \
         WHERE c.poll_id = ANY($1) ORDER BY c.created_at"
    ))
    .bind(poll_ids)
    .fetch_all(conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<Comment>> = HashMap::new();
    for row in rows {
        grouped.entry(row.poll_id).or_default().push(row.into());
    }
    Ok(grouped)
}

pub async fn count_comments(pool: &DbPool, poll_id: Uuid) -> Result<i64, Error> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM comments WHERE poll_id = $1")
        .bind(poll_id)
        .fetch_one(pool)
        .await?;

    row.try_get("total")
}

/// Moves the comment's hearter set to the requested state in one statement.
/// `hearts` is a generated column over `hearted_by`, so the counter cannot
/// drift from the set.
pub async fn set_heart(
    pool: &DbPool,
    poll_id: Uuid,
    comment_id: Uuid,
    user_id: Uuid,
    hearted: bool,
) -> Result<Option<Comment>, Error> {
    let row = sqlx::query_as::<_, CommentRow>(&format!(
        r#"
        WITH c AS (
            UPDATE comments
            SET hearted_by = CASE
                    WHEN $4 AND NOT ($3 = ANY(hearted_by)) THEN array_append(hearted_by, $3)
                    WHEN $4 THEN hearted_by
                    ELSE array_remove(hearted_by, $3)
                END
            WHERE id = $1 AND poll_id = $2
            RETURNING *
        )
        SELECT {COMMENT_COLUMNS} FROM c LEFT JOIN users u ON u.id = c.author_id
        "#
    ))
    .bind(comment_id)
    .bind(poll_id)
    .bind(user_id)
    .bind(hearted)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Comment::from))
}
