use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::models::plan::Plan;
use crate::AppState;

pub mod bookmarklet;
pub mod handlers;

/// The user resolved from a bearer API key, attached to the request as an
/// extension. Cached for a short TTL so the auth middleware does not hit
/// Postgres on every management call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthedUser {
    pub user_id: Uuid,
    pub plan: Plan,
    pub api_key_id: Uuid,
}

/// Build the authenticated management API router.
/// All routes are relative — the caller mounts this under `/api`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/:id",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route("/bookmarklet/generate", post(bookmarklet::generate))
        .route("/bookmarklet/tokens", get(bookmarklet::list_tokens))
        .route(
            "/bookmarklet/tokens/:token",
            delete(bookmarklet::revoke_token),
        )
        .route(
            "/keys",
            get(handlers::list_api_keys).post(handlers::create_api_key),
        )
        .route("/keys/:id", delete(handlers::revoke_api_key))
        .layer(middleware::from_fn_with_state(state, require_api_key))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

/// Operator endpoints (user provisioning, plan changes). Guarded by the
/// configured admin key, not a per-user API key.
pub fn admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route("/users/:id/plan", put(handlers::set_user_plan))
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .fallback(fallback_404)
}

/// Unauthenticated surface: token validation, callable from any origin since
/// the bookmarklet runs in third-party page contexts.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new().route("/bookmarklet/validate", post(bookmarklet::validate))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Hex SHA-256 of an API key. Only the hash is ever stored or used for
/// lookup; the plaintext key exists once, in the creation response.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Middleware: resolves `Authorization: Bearer rp_live_...` to an `AuthedUser`.
/// Returns 401 if the key is missing, unknown, or revoked.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    let Some(key) = provided else {
        tracing::warn!("management API: missing bearer key");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let key_hash = hash_api_key(&key);
    let cache_key = format!("auth:{}", key_hash);

    if let Some(user) = state.cache.get::<AuthedUser>(&cache_key).await {
        req.extensions_mut().insert(user);
        return Ok(next.run(req).await);
    }

    let row = state
        .db
        .get_api_key_by_hash(&key_hash)
        .await
        .map_err(|e| {
            tracing::error!("api key lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            tracing::warn!(prefix = %mask_key(&key), "management API: unknown or revoked key");
            StatusCode::UNAUTHORIZED
        })?;

    let user = state
        .db
        .get_user(row.user_id)
        .await
        .map_err(|e| {
            tracing::error!("user lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let authed = AuthedUser {
        user_id: user.id,
        plan: Plan::from_db(&user.plan),
        api_key_id: row.id,
    };

    // Cache miss is also our write-rate bound on last_used_at: at most one
    // touch per key per cache TTL.
    if let Err(e) = state.db.touch_api_key_usage(row.id).await {
        tracing::warn!("failed to touch api key usage: {}", e);
    }
    if let Err(e) = state.cache.set(&cache_key, &authed, 30).await {
        tracing::warn!("failed to cache api key resolution: {}", e);
    }

    req.extensions_mut().insert(authed);
    Ok(next.run(req).await)
}

/// Middleware: validates `X-Admin-Key` against the configured admin key in
/// constant time. Returns 401 if missing/invalid.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(k) if bool::from(k.as_bytes().ct_eq(state.config.admin_key.as_bytes())) => {
            Ok(next.run(req).await)
        }
        Some(k) => {
            // Never log the expected key or the full provided key
            tracing::warn!("admin API: invalid key (provided: '{}')", mask_key(k));
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn mask_key(k: &str) -> String {
    if k.len() > 8 {
        format!("{}…{}", &k[..4], &k[k.len() - 4..])
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hash_is_stable_hex() {
        let h1 = hash_api_key("rp_live_abc");
        let h2 = hash_api_key("rp_live_abc");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_hash_differs_per_key() {
        assert_ne!(hash_api_key("rp_live_a"), hash_api_key("rp_live_b"));
    }

    #[test]
    fn mask_key_hides_middle() {
        let masked = mask_key("rp_live_0123456789abcdef");
        assert!(masked.starts_with("rp_l"));
        assert!(masked.ends_with("cdef"));
        assert!(!masked.contains("0123456789"));
        assert_eq!(mask_key("short"), "****");
    }
}
