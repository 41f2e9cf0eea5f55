use sqlx::{Error, PgConnection};
use uuid::Uuid;

/// Applies a vote as one statement. The `voter` CTE only matches while the
/// user is absent from `voted_users`; a concurrent duplicate waits on the
/// row lock, re-evaluates the predicate against the committed row and
/// matches nothing. Returns whether the vote was applied; `revision` is
/// bumped by the row triggers.
pub async fn cast_vote(
    conn: &mut PgConnection,
    poll_id: Uuid,
    option_id: Uuid,
    user_id: Uuid,
) -> Result<bool, Error> {
    let result = sqlx::query(
        r#"
        WITH voter AS (
            UPDATE polls
            SET voted_users = array_append(voted_users, $3)
            WHERE id = $1
              AND NOT ($3 = ANY(voted_users))
              AND (expires_at IS NULL OR expires_at >= now())
              AND EXISTS (SELECT 1 FROM poll_options WHERE id = $2 AND poll_id = $1)
            RETURNING id
        )
        UPDATE poll_options
        SET votes = votes + 1
        WHERE id = $2 AND poll_id IN (SELECT id FROM voter)
        "#,
    )
    .bind(poll_id)
    .bind(option_id)
    .bind(user_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
