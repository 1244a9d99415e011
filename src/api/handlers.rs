use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::AuthedUser;
use crate::models::plan::Plan;
use crate::models::project::Project;
use crate::store::postgres::{ApiKeyRow, NewProject, ProjectUpdate, UserRow};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub website_url: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub website_url: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct CreateApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    /// The plaintext key. Shown exactly once — only the hash is stored.
    pub key: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub plan: Option<String>,
}

#[derive(Deserialize)]
pub struct SetPlanRequest {
    pub plan: String,
}

// ── Project Handlers ─────────────────────────────────────────

/// GET /api/projects — list the caller's projects
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
) -> Result<Json<Vec<Project>>, StatusCode> {
    let projects = state.db.list_projects(user.user_id).await.map_err(|e| {
        tracing::error!("list_projects failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(projects))
}

/// POST /api/projects — create a project owned by the caller
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), StatusCode> {
    if payload.name.trim().is_empty() || payload.website_url.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let new_project = NewProject {
        user_id: user.user_id,
        name: payload.name,
        website_url: payload.website_url,
        email: payload.email,
        company: payload.company,
        phone: payload.phone,
        address: payload.address,
        description: payload.description,
        category: payload.category,
    };

    let created = state.db.create_project(&new_project).await.map_err(|e| {
        tracing::error!("create_project failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/projects/:id — fetch one of the caller's projects
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id_str): Path<String>,
) -> Result<Json<Project>, StatusCode> {
    let id = Uuid::parse_str(&id_str).map_err(|_| StatusCode::BAD_REQUEST)?;

    let project = state
        .db
        .get_owned_project(id, user.user_id)
        .await
        .map_err(|e| {
            tracing::error!("get_project failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(project))
}

/// PUT /api/projects/:id — partial update of the caller's project
pub async fn update_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id_str): Path<String>,
    Json(payload): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, StatusCode> {
    let id = Uuid::parse_str(&id_str).map_err(|_| StatusCode::BAD_REQUEST)?;

    let update = ProjectUpdate {
        name: payload.name,
        website_url: payload.website_url,
        email: payload.email,
        company: payload.company,
        phone: payload.phone,
        address: payload.address,
        description: payload.description,
        category: payload.category,
    };

    let updated = state
        .db
        .update_project(id, user.user_id, &update)
        .await
        .map_err(|e| {
            tracing::error!("update_project failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(updated))
}

/// DELETE /api/projects/:id — delete the caller's project.
/// Outstanding bookmarklet tokens keep serving their snapshot until expiry.
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id_str): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let id = Uuid::parse_str(&id_str).map_err(|_| StatusCode::BAD_REQUEST)?;

    let deleted = state
        .db
        .delete_project(id, user.user_id)
        .await
        .map_err(|e| {
            tracing::error!("delete_project failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(json!({ "deleted": true })))
}

// ── API Key Handlers ─────────────────────────────────────────

/// GET /api/keys — list the caller's API keys (hashes never leave the store)
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
) -> Result<Json<Vec<ApiKeyRow>>, StatusCode> {
    let keys = state.db.list_api_keys(user.user_id).await.map_err(|e| {
        tracing::error!("list_api_keys failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(keys))
}

/// POST /api/keys — mint a new API key for the caller
pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), StatusCode> {
    if payload.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let key = mint_api_key();
    let key_hash = super::hash_api_key(&key);
    let key_prefix: String = key.chars().take(12).collect();

    let id = state
        .db
        .create_api_key(user.user_id, &payload.name, &key_hash, &key_prefix)
        .await
        .map_err(|e| {
            tracing::error!("create_api_key failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            id,
            name: payload.name,
            key: key.clone(),
            message: format!("Use: Authorization: Bearer {}", key),
        }),
    ))
}

/// DELETE /api/keys/:id — revoke one of the caller's API keys
pub async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id_str): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let id = Uuid::parse_str(&id_str).map_err(|_| StatusCode::BAD_REQUEST)?;

    let revoked = state
        .db
        .revoke_api_key(id, user.user_id)
        .await
        .map_err(|e| {
            tracing::error!("revoke_api_key failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    // Drop the cached auth entry so the key stops working now, not when
    // the cache TTL runs out.
    if let Some(hash) = &revoked {
        state.cache.invalidate(&format!("auth:{}", hash)).await;
    }

    Ok(Json(json!({ "id": id, "revoked": revoked.is_some() })))
}

/// Generate a fresh API key: `rp_live_` + 32 hex chars of OS randomness.
pub fn mint_api_key() -> String {
    let mut random_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut random_bytes);
    format!("rp_live_{}", hex::encode(random_bytes))
}

// ── Admin Handlers (user provisioning) ───────────────────────

/// GET /api/admin/users — list all users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserRow>>, StatusCode> {
    let users = state.db.list_users().await.map_err(|e| {
        tracing::error!("list_users failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(users))
}

/// POST /api/admin/users — provision a user
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    if payload.email.trim().is_empty() || !payload.email.contains('@') {
        return Err(StatusCode::BAD_REQUEST);
    }

    let plan = payload.plan.as_deref().unwrap_or("free");
    // Normalize through the enum so an unknown plan string lands on "free"
    // instead of poisoning the column.
    let plan = Plan::from_db(plan).as_str();

    let id = state
        .db
        .create_user(&payload.email, plan)
        .await
        .map_err(|e| {
            tracing::error!("create_user failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "email": payload.email, "plan": plan })),
    ))
}

/// PUT /api/admin/users/:id/plan — change a user's plan
pub async fn set_user_plan(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    Json(payload): Json<SetPlanRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let id = Uuid::parse_str(&id_str).map_err(|_| StatusCode::BAD_REQUEST)?;

    let plan = match payload.plan.as_str() {
        "free" | "starter" | "pro" => payload.plan.as_str(),
        other => {
            tracing::warn!("set_user_plan: invalid plan: {}", other);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let updated = state.db.set_user_plan(id, plan).await.map_err(|e| {
        tracing::error!("set_user_plan failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(json!({ "id": id, "plan": plan })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_keys_have_prefix_and_entropy() {
        let k1 = mint_api_key();
        let k2 = mint_api_key();
        assert!(k1.starts_with("rp_live_"));
        assert_eq!(k1.len(), "rp_live_".len() + 32);
        assert_ne!(k1, k2);
    }

    #[test]
    fn create_project_request_accepts_camel_case() {
        let req: CreateProjectRequest = serde_json::from_value(json!({
            "name": "Acme",
            "websiteUrl": "https://acme.example",
            "email": "a@acme.example"
        }))
        .unwrap();
        assert_eq!(req.website_url, "https://acme.example");
        assert!(req.company.is_none());
    }
}
