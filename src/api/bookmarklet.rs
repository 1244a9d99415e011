use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::AuthedUser;
use crate::errors::AppError;
use crate::middleware::rate_limit;
use crate::models::bookmarklet::{BookmarkletTokenRow, TokenStatus};
use crate::models::project::ProjectSnapshot;
use crate::notification::webhook::WebhookEvent;
use crate::store::postgres::NewBookmarkletToken;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub project_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct ListTokensParams {
    pub project_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMeta {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub max_usage: i32,
    pub usage_count: i32,
}

impl TokenMeta {
    fn from_row(row: &BookmarkletTokenRow) -> Self {
        Self {
            token: row.token.clone(),
            expires_at: row.expires_at,
            max_usage: row.max_usage,
            usage_count: row.usage_count,
        }
    }
}

/// Generate a fresh bookmarklet token string: `rp_bm_` + 32 hex chars.
pub fn mint_token() -> String {
    let mut random_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut random_bytes);
    format!("rp_bm_{}", hex::encode(random_bytes))
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/bookmarklet/generate — issue a token for one of the caller's
/// projects. The project's fields are snapshotted onto the token row so
/// validation never needs the live project.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let project_id = payload
        .project_id
        .ok_or_else(|| AppError::BadRequest("projectId".into()))?;

    // Plan gate first: no point leaking project existence to a plan that
    // cannot generate at all.
    let max_usage = user
        .plan
        .bookmarklet_max_usage()
        .ok_or(AppError::Forbidden)?;

    let project = state
        .db
        .get_owned_project(project_id, user.user_id)
        .await?
        .ok_or(AppError::NotFound("project"))?;

    let snapshot = ProjectSnapshot::capture(&project);
    let expires_at = Utc::now() + Duration::hours(state.config.bookmarklet_ttl_hours);

    let new_token = NewBookmarkletToken {
        token: mint_token(),
        project_id,
        user_id: user.user_id,
        project_snapshot: serde_json::to_value(&snapshot)
            .map_err(|e| AppError::Internal(e.into()))?,
        max_usage,
        expires_at,
    };

    let row = state.db.insert_bookmarklet_token(&new_token).await?;

    tracing::info!(
        project_id = %project_id,
        user_id = %user.user_id,
        max_usage,
        "bookmarklet token generated"
    );

    state
        .webhook
        .dispatch(
            &state.config.webhook_urls,
            WebhookEvent::token_generated(&row.token, project_id, row.max_usage),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": TokenMeta::from_row(&row),
        })),
    ))
}

/// POST /api/bookmarklet/validate — consume one use of a token.
///
/// Unauthenticated: the bookmarklet runs inside arbitrary third-party pages.
/// Contract: a missing `token` field is a 400; every *validation* failure
/// (unknown, expired, exhausted) is HTTP 200 with `success: false` so the
/// bookmarklet script only has to branch on the body.
///
/// The usage increment happens inside a single conditional UPDATE in the
/// store (`claim_token_use`) — never as a read followed by a write — so
/// concurrent calls cannot push `usage_count` past `max_usage`.
pub async fn validate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ValidateRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let token = match payload.token.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => return Err(AppError::BadRequest("token".into())),
    };

    let source_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    rate_limit::check_validate_rate_limit(
        &rate_limit::client_key(source_ip, &token),
        state.config.validate_rate_limit,
        state.config.validate_rate_limit_window,
        &state.cache,
    )
    .await?;

    if let Some(row) = state.db.claim_token_use(&token).await? {
        let response = claim_success(&state.webhook, &state.config.webhook_urls, &row).await;
        return Ok(response);
    }

    // Claim missed — re-read (no mutation) purely to name the failure.
    let failure = match claim_miss_reason(
        state.db.get_bookmarklet_token(&token).await?.as_ref(),
        Utc::now(),
    ) {
        Some(err) => err,
        // The row read as valid between the claim and the re-read (e.g. the
        // expiry boundary fell between the two clocks). One more claim
        // settles it.
        None => match state.db.claim_token_use(&token).await? {
            Some(row) => {
                let response =
                    claim_success(&state.webhook, &state.config.webhook_urls, &row).await;
                return Ok(response);
            }
            // Second miss straight after a valid read: the row was consumed
            // or deleted in between. Name the failure from a fresh read so a
            // token revoked mid-flight reports as invalid, not expired.
            None => claim_miss_reason(
                state.db.get_bookmarklet_token(&token).await?.as_ref(),
                Utc::now(),
            )
            .unwrap_or(AppError::Expired),
        },
    };

    tracing::debug!(error = %failure, "bookmarklet validation failed");

    Err(failure)
}

/// Build the success response for a won claim, dispatching the
/// `token_exhausted` webhook when this claim consumed the last use. Every
/// claim site goes through here so no exhausting claim skips the event.
async fn claim_success(
    webhook: &crate::notification::webhook::WebhookNotifier,
    webhook_urls: &[String],
    row: &BookmarkletTokenRow,
) -> (StatusCode, Json<serde_json::Value>) {
    if row.remaining_uses() == 0 {
        webhook
            .dispatch(
                webhook_urls,
                WebhookEvent::token_exhausted(&row.token, row.project_id, row.max_usage),
            )
            .await;
    }
    (StatusCode::OK, Json(success_body(row)))
}

/// Name the failure for a token whose conditional claim just missed.
/// `None` input means the row does not exist (never issued, or revoked);
/// `None` output means the row read as still valid — the claim raced.
fn claim_miss_reason(
    row: Option<&BookmarkletTokenRow>,
    now: chrono::DateTime<Utc>,
) -> Option<AppError> {
    match row {
        None => Some(AppError::InvalidToken),
        Some(row) => match row.status(now) {
            TokenStatus::Expired => Some(AppError::Expired),
            TokenStatus::Exhausted => Some(AppError::UsageExceeded),
            TokenStatus::Valid => None,
        },
    }
}

fn success_body(row: &BookmarkletTokenRow) -> serde_json::Value {
    json!({
        "success": true,
        "data": {
            "projectData": row.project_snapshot,
            "usageCount": row.usage_count,
            "maxUsage": row.max_usage,
            "remainingUses": row.remaining_uses(),
        }
    })
}

/// GET /api/bookmarklet/tokens?project_id= — management view of a project's
/// tokens with their usage figures.
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Query(params): Query<ListTokensParams>,
) -> Result<Json<Vec<TokenMeta>>, AppError> {
    // Ownership check: a foreign project id behaves like a missing one.
    state
        .db
        .get_owned_project(params.project_id, user.user_id)
        .await?
        .ok_or(AppError::NotFound("project"))?;

    let rows = state
        .db
        .list_bookmarklet_tokens(params.project_id, user.user_id)
        .await?;

    Ok(Json(rows.iter().map(TokenMeta::from_row).collect()))
}

/// DELETE /api/bookmarklet/tokens/:token — revoke a token early by deleting
/// its row; subsequent validations fail as `Invalid token`.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let revoked = state
        .db
        .delete_bookmarklet_token(&token, user.user_id)
        .await?;

    if !revoked {
        return Err(AppError::NotFound("token"));
    }

    Ok(Json(json!({ "revoked": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn minted_tokens_have_prefix_and_entropy() {
        let t1 = mint_token();
        let t2 = mint_token();
        assert!(t1.starts_with("rp_bm_"));
        assert_eq!(t1.len(), "rp_bm_".len() + 32);
        assert_ne!(t1, t2);
    }

    #[test]
    fn success_body_shape() {
        let now = Utc::now();
        let row = BookmarkletTokenRow {
            token: mint_token(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_snapshot: json!({"name": "Acme", "websiteUrl": "https://acme.example"}),
            max_usage: 10,
            usage_count: 3,
            created_at: now,
            expires_at: now + Duration::hours(24),
        };

        let body = success_body(&row);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["usageCount"], 3);
        assert_eq!(body["data"]["maxUsage"], 10);
        assert_eq!(body["data"]["remainingUses"], 7);
        assert_eq!(body["data"]["projectData"]["name"], "Acme");
    }

    fn test_row(usage_count: i32, max_usage: i32, expires_in: Duration) -> BookmarkletTokenRow {
        let now = Utc::now();
        BookmarkletTokenRow {
            token: mint_token(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_snapshot: json!({"name": "Acme"}),
            max_usage,
            usage_count,
            created_at: now,
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn claim_miss_reason_names_each_failure() {
        let now = Utc::now();

        // Missing row: never issued, or revoked mid-flight
        assert!(matches!(
            claim_miss_reason(None, now),
            Some(AppError::InvalidToken)
        ));

        let expired = test_row(0, 10, Duration::hours(-1));
        assert!(matches!(
            claim_miss_reason(Some(&expired), now),
            Some(AppError::Expired)
        ));

        let exhausted = test_row(10, 10, Duration::hours(1));
        assert!(matches!(
            claim_miss_reason(Some(&exhausted), now),
            Some(AppError::UsageExceeded)
        ));

        // Still valid: the claim raced, caller retries
        let valid = test_row(0, 10, Duration::hours(1));
        assert!(claim_miss_reason(Some(&valid), now).is_none());
    }

    #[tokio::test]
    async fn exhausting_claim_dispatches_webhook() {
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "event_type": "token_exhausted" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = crate::notification::webhook::WebhookNotifier::new(None);
        let row = test_row(10, 10, Duration::hours(1)); // last use just claimed

        let (status, body) = claim_success(&notifier, &[server.uri()], &row).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0["data"]["remainingUses"], 0);

        // dispatch is fire-and-forget; let the task deliver
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn non_exhausting_claim_sends_no_webhook() {
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = crate::notification::webhook::WebhookNotifier::new(None);
        let row = test_row(3, 10, Duration::hours(1));

        let (status, body) = claim_success(&notifier, &[server.uri()], &row).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0["data"]["remainingUses"], 7);

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    }

    #[test]
    fn token_meta_serializes_camel_case() {
        let now = Utc::now();
        let row = BookmarkletTokenRow {
            token: "rp_bm_00".into(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_snapshot: json!({}),
            max_usage: 5,
            usage_count: 0,
            created_at: now,
            expires_at: now,
        };
        let value = serde_json::to_value(TokenMeta::from_row(&row)).unwrap();
        assert!(value.get("expiresAt").is_some());
        assert!(value.get("maxUsage").is_some());
        assert!(value.get("usage_count").is_none());
    }
}
