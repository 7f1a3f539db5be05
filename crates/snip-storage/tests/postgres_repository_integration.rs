use std::time::Duration;

use snip_core::{CreateOutcome, NewUrl, ShortCode};
use snip_storage::{PostgresRepository, ReadRepository, Repository, StorageError};
use snip_test_infra::postgres::{PostgresConfig, PostgresServer};
use sqlx::postgres::PgPoolOptions;

struct Fixture {
    _postgres: PostgresServer,
    repo: PostgresRepository,
}

impl Fixture {
    async fn start() -> Self {
        let postgres = PostgresServer::new(PostgresConfig::builder().build())
            .await
            .expect("start postgres");
        let url = postgres.database_url().await.expect("postgres url");
        let pool = connect_with_retry(&url).await;

        let repo = PostgresRepository::new(pool);
        repo.migrate().await.expect("create schema");

        Self {
            _postgres: postgres,
            repo,
        }
    }
}

async fn connect_with_retry(url: &str) -> sqlx::PgPool {
    let mut last_error = None;

    for _ in 0..20 {
        match PgPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

fn code(value: &str) -> ShortCode {
    ShortCode::new_unchecked(value)
}

fn entry(correlation_id: &str, url: &str, short_code: &str) -> NewUrl {
    NewUrl {
        correlation_id: correlation_id.to_string(),
        original_url: url.to_string(),
        short_code: code(short_code),
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn insert_and_get_round_trip() {
    let fixture = Fixture::start().await;

    let outcome = fixture
        .repo
        .insert("https://example.com", &code("abc123"), "user-1")
        .await
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Created(code("abc123")));

    let got = fixture.repo.get(&code("abc123")).await.unwrap().unwrap();
    assert_eq!(got.original_url, "https://example.com");
    assert_eq!(got.owner_id, "user-1");
    assert!(got.active);
    assert!(got.id > 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn duplicate_url_reports_existing_code() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .insert("https://example.com", &code("first"), "user-1")
        .await
        .unwrap();
    let outcome = fixture
        .repo
        .insert("https://example.com", &code("second"), "user-2")
        .await
        .unwrap();

    assert_eq!(outcome, CreateOutcome::Existing(code("first")));
    assert!(fixture.repo.get(&code("second")).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn taken_code_is_reported() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .insert("https://one.example", &code("abc123"), "user-1")
        .await
        .unwrap();
    let err = fixture
        .repo
        .insert("https://two.example", &code("abc123"), "user-1")
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::CodeTaken(_)));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn batch_reuses_existing_codes() {
    let fixture = Fixture::start().await;
    fixture
        .repo
        .insert("https://known.example", &code("known"), "user-1")
        .await
        .unwrap();

    let results = fixture
        .repo
        .insert_batch(
            vec![
                entry("1", "https://a.example", "aaaa"),
                entry("2", "https://known.example", "bbbb"),
            ],
            "user-1",
        )
        .await
        .unwrap();

    assert_eq!(results[0].short_code, code("aaaa"));
    assert_eq!(results[1].short_code, code("known"));
    assert!(fixture.repo.get(&code("bbbb")).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn batch_with_taken_code_rolls_back() {
    let fixture = Fixture::start().await;
    fixture
        .repo
        .insert("https://known.example", &code("known"), "user-1")
        .await
        .unwrap();

    let err = fixture
        .repo
        .insert_batch(
            vec![
                entry("1", "https://a.example", "aaaa"),
                entry("2", "https://b.example", "known"),
            ],
            "user-1",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::CodeTaken(_)));
    assert!(fixture.repo.get(&code("aaaa")).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn deactivate_only_touches_owned_records() {
    let fixture = Fixture::start().await;
    fixture
        .repo
        .insert("https://a.example", &code("aaaa"), "user-1")
        .await
        .unwrap();
    fixture
        .repo
        .insert("https://b.example", &code("bbbb"), "user-2")
        .await
        .unwrap();

    let deactivated = fixture
        .repo
        .deactivate_batch(&[code("aaaa"), code("bbbb")], "user-1")
        .await
        .unwrap();
    assert_eq!(deactivated, 1);

    let listed = fixture.repo.list_by_owner("user-1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].active);
    assert!(fixture.repo.get(&code("bbbb")).await.unwrap().unwrap().active);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn healthcheck_succeeds_against_live_server() {
    let fixture = Fixture::start().await;
    fixture.repo.healthcheck().await.unwrap();
}
