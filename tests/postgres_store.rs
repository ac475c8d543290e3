use murmur::application::repos::{PostStore, RepoError};
use murmur::domain::posts::{MonotonicClock, NewPost};
use murmur::domain::types::UserId;
use murmur::infra::db::PostgresRepositories;
use sqlx::PgPool;

fn user(name: &str) -> UserId {
    UserId::parse(name).expect("valid user id")
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
async fn timeline_round_trip_is_ordered_bounded_and_idempotent(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let clock = MonotonicClock::new();
    let alice = user("alice");
    let bob = user("bob");

    let mut written = Vec::new();
    for i in 0..3 {
        let draft = NewPost::new(alice.clone(), format!("post {i}"), clock.now())
            .expect("valid post");
        let id = repos.save_global(&draft).await.expect("save post");
        let post = draft.into_post(id);
        repos
            .write_timeline_entry(&bob, &post)
            .await
            .expect("write entry");
        written.push(post);
    }

    repos
        .write_timeline_entry(&bob, &written[0])
        .await
        .expect("duplicate write is a no-op");

    let timeline = repos.query_timeline(&bob, 2).await.expect("query");
    assert_eq!(timeline, vec![written[2].clone(), written[1].clone()]);

    let all = repos.query_timeline(&bob, 50).await.expect("query");
    assert_eq!(all.len(), 3);

    assert!(repos.query_timeline(&alice, 50).await.expect("query").is_empty());
    assert!(matches!(
        repos.query_timeline(&bob, 0).await,
        Err(RepoError::InvalidInput { .. })
    ));
}
