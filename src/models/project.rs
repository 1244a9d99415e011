use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user-owned record describing a business/website being optimized.
/// Its fields are what the bookmarklet injects into directory submission
/// forms, so the full contact block lives here.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub website_url: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Denormalized copy of project fields captured when a bookmarklet token is
/// generated. Stored as JSONB on the token row and served verbatim on every
/// validation — validation never joins back to the live project, so edits or
/// deletions after issuance do not change what the bookmarklet sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub name: String,
    pub website_url: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

impl ProjectSnapshot {
    pub fn capture(project: &Project) -> Self {
        Self {
            name: project.name.clone(),
            website_url: project.website_url.clone(),
            email: project.email.clone(),
            company: project.company.clone(),
            phone: project.phone.clone(),
            address: project.address.clone(),
            description: project.description.clone(),
            category: project.category.clone(),
        }
    }
}
