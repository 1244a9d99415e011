//! Postgres-backed tests for the bookmarklet token store.
//!
//! These drive the real conditional-UPDATE claim, not a model of it:
//! generation through exhaustion, concurrent single-use claims, ownership
//! checks, and token survival across project deletion.
//!
//! **Requirements:**
//! - PostgreSQL running at DATABASE_URL (migrations are applied on connect)
//! - Or run via `docker-compose up -d postgres` then `cargo test --test token_store`
//!
//! Without DATABASE_URL each test logs a skip and passes.

use chrono::{Duration, Utc};
use rankpilot::models::bookmarklet::{BookmarkletTokenRow, TokenStatus};
use rankpilot::store::postgres::{NewBookmarkletToken, NewProject, PgStore};
use serde_json::json;
use uuid::Uuid;

async fn test_store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let db = PgStore::connect(&url).await.ok()?;
    db.migrate().await.ok()?;
    Some(db)
}

macro_rules! require_db {
    () => {
        match test_store().await {
            Some(db) => db,
            None => {
                eprintln!("skipping: DATABASE_URL not set or unreachable");
                return;
            }
        }
    };
}

async fn seed_user(db: &PgStore, plan: &str) -> Uuid {
    let email = format!("owner-{}@store-tests.example", Uuid::new_v4().simple());
    db.create_user(&email, plan).await.unwrap()
}

async fn seed_project(db: &PgStore, user_id: Uuid) -> Uuid {
    let project = db
        .create_project(&NewProject {
            user_id,
            name: "Acme Plumbing".into(),
            website_url: "https://acmeplumbing.example".into(),
            email: Some("info@acmeplumbing.example".into()),
            company: None,
            phone: None,
            address: None,
            description: None,
            category: Some("home-services".into()),
        })
        .await
        .unwrap();
    project.id
}

async fn seed_token(
    db: &PgStore,
    project_id: Uuid,
    user_id: Uuid,
    max_usage: i32,
    expires_in: Duration,
) -> BookmarkletTokenRow {
    db.insert_bookmarklet_token(&NewBookmarkletToken {
        token: format!("rp_bm_{}", Uuid::new_v4().simple()),
        project_id,
        user_id,
        project_snapshot: json!({
            "name": "Acme Plumbing",
            "websiteUrl": "https://acmeplumbing.example"
        }),
        max_usage,
        expires_at: Utc::now() + expires_in,
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn fresh_token_claims_until_exhausted() {
    let db = require_db!();
    let user = seed_user(&db, "starter").await;
    let project = seed_project(&db, user).await;
    let token = seed_token(&db, project, user, 3, Duration::hours(24)).await;

    // First claim right after generation lands on usage_count 1
    let first = db.claim_token_use(&token.token).await.unwrap().unwrap();
    assert_eq!(first.usage_count, 1);
    assert_eq!(first.remaining_uses(), 2);
    assert_eq!(first.project_snapshot["name"], "Acme Plumbing");

    let second = db.claim_token_use(&token.token).await.unwrap().unwrap();
    assert_eq!(second.usage_count, 2);
    let third = db.claim_token_use(&token.token).await.unwrap().unwrap();
    assert_eq!(third.usage_count, 3);
    assert_eq!(third.remaining_uses(), 0);

    // Claim max_usage + 1 misses and does not increment
    assert!(db.claim_token_use(&token.token).await.unwrap().is_none());
    let row = db
        .get_bookmarklet_token(&token.token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.usage_count, 3);
    assert_eq!(row.status(Utc::now()), TokenStatus::Exhausted);
}

#[tokio::test]
async fn expired_token_never_claims_and_never_mutates() {
    let db = require_db!();
    let user = seed_user(&db, "starter").await;
    let project = seed_project(&db, user).await;
    let token = seed_token(&db, project, user, 10, Duration::hours(-1)).await;

    assert!(db.claim_token_use(&token.token).await.unwrap().is_none());

    let row = db
        .get_bookmarklet_token(&token.token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.usage_count, 0, "missed claim must not increment");
    assert_eq!(row.status(Utc::now()), TokenStatus::Expired);
}

#[tokio::test]
async fn unknown_token_claim_is_a_miss() {
    let db = require_db!();
    let bogus = format!("rp_bm_{}", Uuid::new_v4().simple());
    assert!(db.claim_token_use(&bogus).await.unwrap().is_none());
    assert!(db.get_bookmarklet_token(&bogus).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_single_use_claims_have_one_winner() {
    let db = require_db!();
    let user = seed_user(&db, "starter").await;
    let project = seed_project(&db, user).await;
    let token = seed_token(&db, project, user, 1, Duration::hours(24)).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let db = db.clone();
        let token = token.token.clone();
        handles.push(tokio::spawn(async move {
            db.claim_token_use(&token).await.unwrap().is_some()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent claim may succeed");

    let row = db
        .get_bookmarklet_token(&token.token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.usage_count, 1, "usage never exceeds the budget");
}

#[tokio::test]
async fn foreign_project_is_invisible_to_other_users() {
    let db = require_db!();
    let owner = seed_user(&db, "pro").await;
    let stranger = seed_user(&db, "pro").await;
    let project = seed_project(&db, owner).await;

    // The generate handler gates on this lookup; a foreign project id
    // behaves exactly like a missing one.
    assert!(db.get_owned_project(project, owner).await.unwrap().is_some());
    assert!(db
        .get_owned_project(project, stranger)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn tokens_outlive_project_deletion() {
    let db = require_db!();
    let user = seed_user(&db, "starter").await;
    let project = seed_project(&db, user).await;
    let token = seed_token(&db, project, user, 10, Duration::hours(24)).await;

    assert!(db.delete_project(project, user).await.unwrap());

    // The token row survives and keeps serving its snapshot
    let claimed = db.claim_token_use(&token.token).await.unwrap().unwrap();
    assert_eq!(claimed.usage_count, 1);
    assert_eq!(claimed.project_snapshot["name"], "Acme Plumbing");
    assert_eq!(
        claimed.project_snapshot["websiteUrl"],
        "https://acmeplumbing.example"
    );
}
