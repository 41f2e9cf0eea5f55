//! Revision bookkeeping in Postgres. Needs `DATABASE_URL`; skipped otherwise.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use pollx_backend::db::{Category, DbPool, NewPoll, PgPollStore, PollStore, VoteOutcome, init_db};
use uuid::Uuid;

async fn connect() -> Option<DbPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(init_db(&url, 2).await.unwrap())
}

fn new_poll() -> NewPoll {
    NewPoll {
        question: "Favourite colour?".to_string(),
        options: vec!["Red".to_string(), "Blue".to_string()],
        category: Category::General,
        creator_id: Uuid::new_v4(),
        expires_at: None,
    }
}

#[tokio::test]
async fn test_writes_from_any_client_bump_revisions() {
    let Some(pool) = connect().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let store = PgPollStore::new(pool.clone());
    let poll = store.insert_poll(new_poll()).await.unwrap();

    sqlx::query("UPDATE polls SET question = 'Edited?' WHERE id = $1")
        .bind(poll.id)
        .execute(&pool)
        .await
        .unwrap();
    let edited = store.get_poll(poll.id).await.unwrap().unwrap();
    assert_eq!(edited.question, "Edited?");
    assert!(edited.revision > poll.revision);

    sqlx::query("UPDATE poll_options SET votes = votes + 3 WHERE id = $1")
        .bind(poll.options[0].id)
        .execute(&pool)
        .await
        .unwrap();
    let recounted = store.get_poll(poll.id).await.unwrap().unwrap();
    assert_eq!(recounted.options[0].votes, 3);
    assert!(recounted.revision > edited.revision);

    let VoteOutcome::Applied(voted) = store
        .record_vote(poll.id, poll.options[1].id, Uuid::new_v4())
        .await
        .unwrap()
    else {
        panic!("vote was rejected");
    };
    assert!(voted.revision > recounted.revision);

    let comment = store
        .insert_comment(poll.id, Uuid::new_v4(), "first")
        .await
        .unwrap()
        .unwrap();
    sqlx::query("UPDATE comments SET text = 'rewritten' WHERE id = $1")
        .bind(comment.id)
        .execute(&pool)
        .await
        .unwrap();
    let rewritten = store.get_comment(poll.id, comment.id).await.unwrap().unwrap();
    assert!(rewritten.revision > comment.revision);

    let hearted = store
        .set_heart(poll.id, comment.id, Uuid::new_v4(), true)
        .await
        .unwrap()
        .unwrap();
    assert!(hearted.revision > rewritten.revision);
    assert_eq!(hearted.hearts, 1);

    store.delete_poll(poll.id).await.unwrap();
}
