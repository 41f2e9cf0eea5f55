use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

pub type DbPool = Pool<Postgres>;

pub async fn init_db(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .max_lifetime(Duration::from_secs(30 * 60))
        .idle_timeout(Duration::from_secs(10 * 60))
        .connect(database_url)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            username VARCHAR(255) NOT NULL,
            email VARCHAR(255) NOT NULL UNIQUE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS polls (
            id UUID PRIMARY KEY,
            creator_id UUID NOT NULL,
            question TEXT NOT NULL,
            category VARCHAR(32) NOT NULL DEFAULT 'General',
            voted_users UUID[] NOT NULL DEFAULT '{}',
            expires_at TIMESTAMP WITH TIME ZONE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
            revision BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS poll_options (
            id UUID PRIMARY KEY,
            poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            position INT NOT NULL,
            option_text VARCHAR(255) NOT NULL,
            votes INT NOT NULL DEFAULT 0 CHECK (votes >= 0),
            UNIQUE(poll_id, position)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // hearts is derived from hearted_by, never written directly
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            id UUID PRIMARY KEY,
            poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            author_id UUID NOT NULL,
            text VARCHAR(500) NOT NULL,
            hearted_by UUID[] NOT NULL DEFAULT '{}',
            hearts INT GENERATED ALWAYS AS (cardinality(hearted_by)) STORED,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
            revision BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_polls_created_at ON polls(created_at DESC)
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_polls_creator_id ON polls(creator_id)
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_poll_options_poll_id ON poll_options(poll_id)
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_comments_poll_id ON comments(poll_id)
        "#,
    )
    .execute(&pool)
    .await?;

    install_change_triggers(&pool).await?;

    Ok(pool)
}

/// Keeps `revision` moving on every write to a poll, its options or a
/// comment, whichever client issued it, and publishes every mutation on the
/// `poll_changes` channel. Option writes touch the parent poll row, so they
/// surface as poll updates; identical payloads raised within one
/// transaction are collapsed by Postgres.
async fn install_change_triggers(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION bump_revision() RETURNS trigger AS $$
        BEGIN
            NEW.revision := OLD.revision + 1;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION touch_parent_poll() RETURNS trigger AS $$
        BEGIN
            UPDATE polls SET revision = revision + 1 WHERE id = NEW.poll_id;
            RETURN NULL;
        END;
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION notify_poll_change() RETURNS trigger AS $$
        DECLARE
            rec RECORD;
            payload JSON;
        BEGIN
            IF TG_OP = 'DELETE' THEN
                rec := OLD;
            ELSE
                rec := NEW;
            END IF;

            IF TG_TABLE_NAME = 'polls' THEN
                payload := json_build_object('table', 'polls', 'op', lower(TG_OP), 'pollId', rec.id);
            ELSE
                payload := json_build_object(
                    'table', 'comments', 'op', lower(TG_OP),
                    'pollId', rec.poll_id, 'commentId', rec.id
                );
            END IF;

            PERFORM pg_notify('poll_changes', payload::text);
            RETURN NULL;
        END;
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(pool)
    .await?;

    // older schemas notified straight from poll_options
    sqlx::query("DROP TRIGGER IF EXISTS poll_options_notify ON poll_options")
        .execute(pool)
        .await?;

    let triggers = [
        ("polls_revision", "polls", "BEFORE UPDATE", "bump_revision"),
        ("comments_revision", "comments", "BEFORE UPDATE", "bump_revision"),
        ("poll_options_touch", "poll_options", "AFTER UPDATE", "touch_parent_poll"),
        ("polls_notify", "polls", "AFTER INSERT OR UPDATE OR DELETE", "notify_poll_change"),
        ("comments_notify", "comments", "AFTER INSERT OR UPDATE", "notify_poll_change"),
    ];

    for (name, table, timing, function) in triggers {
        sqlx::query(&format!("DROP TRIGGER IF EXISTS {name} ON {table}"))
            .execute(pool)
            .await?;
        sqlx::query(&format!(
            "CREATE TRIGGER {name} {timing} ON {table} \
             FOR EACH ROW EXECUTE FUNCTION {function}()"
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn get_pool_stats(pool: &DbPool) -> String {
    let size = pool.size() as usize;
    let num_idle = pool.num_idle();
    format!(
        "Pool stats: size={}, idle={}, available={}",
        size,
        num_idle,
        size.saturating_sub(num_idle)
    )
}
