use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::bookmarklet::BookmarkletTokenRow;
use crate::models::project::Project;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- User Operations --

    pub async fn create_user(&self, email: &str, plan: &str) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO users (email, plan) VALUES ($1, $2) RETURNING id",
        )
        .bind(email)
        .bind(plan)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, plan, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn set_user_plan(&self, id: Uuid, plan: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE users SET plan = $1 WHERE id = $2")
            .bind(plan)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_users(&self) -> anyhow::Result<Vec<UserRow>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, plan, created_at FROM users ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- API Key Operations --

    pub async fn create_api_key(
        &self,
        user_id: Uuid,
        name: &str,
        key_hash: &str,
        key_prefix: &str,
    ) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO api_keys (user_id, name, key_hash, key_prefix)
               VALUES ($1, $2, $3, $4)
               RETURNING id"#,
        )
        .bind(user_id)
        .bind(name)
        .bind(key_hash)
        .bind(key_prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_api_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKeyRow>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            r#"SELECT id, user_id, name, key_hash, key_prefix, is_active, last_used_at, created_at
               FROM api_keys WHERE key_hash = $1 AND is_active = true"#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_api_keys(&self, user_id: Uuid) -> anyhow::Result<Vec<ApiKeyRow>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(
            r#"SELECT id, user_id, name, key_hash, key_prefix, is_active, last_used_at, created_at
               FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Deactivate a key, returning its hash so callers can drop the cached
    /// auth entry. `None` if the key does not exist or isn't the caller's.
    pub async fn revoke_api_key(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<String>> {
        let hash = sqlx::query_scalar::<_, String>(
            r#"UPDATE api_keys SET is_active = false
               WHERE id = $1 AND user_id = $2 RETURNING key_hash"#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    pub async fn touch_api_key_usage(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Project Operations --

    pub async fn create_project(&self, project: &NewProject) -> anyhow::Result<Project> {
        let row = sqlx::query_as::<_, Project>(
            r#"INSERT INTO projects (user_id, name, website_url, email, company, phone, address, description, category)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING id, user_id, name, website_url, email, company, phone, address, description, category, created_at, updated_at"#,
        )
        .bind(project.user_id)
        .bind(&project.name)
        .bind(&project.website_url)
        .bind(&project.email)
        .bind(&project.company)
        .bind(&project.phone)
        .bind(&project.address)
        .bind(&project.description)
        .bind(&project.category)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_projects(&self, user_id: Uuid) -> anyhow::Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, Project>(
            r#"SELECT id, user_id, name, website_url, email, company, phone, address, description, category, created_at, updated_at
               FROM projects WHERE user_id = $1 ORDER BY created_at ASC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Fetch a project only if it belongs to the given user. Ownership checks
    /// in the API go through this so a foreign project id behaves exactly
    /// like a missing one.
    pub async fn get_owned_project(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<Option<Project>> {
        let row = sqlx::query_as::<_, Project>(
            r#"SELECT id, user_id, name, website_url, email, company, phone, address, description, category, created_at, updated_at
               FROM projects WHERE id = $1 AND user_id = $2"#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_project(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        update: &ProjectUpdate,
    ) -> anyhow::Result<Option<Project>> {
        let row = sqlx::query_as::<_, Project>(
            r#"UPDATE projects
               SET name = COALESCE($1, name),
                   website_url = COALESCE($2, website_url),
                   email = COALESCE($3, email),
                   company = COALESCE($4, company),
                   phone = COALESCE($5, phone),
                   address = COALESCE($6, address),
                   description = COALESCE($7, description),
                   category = COALESCE($8, category),
                   updated_at = NOW()
               WHERE id = $9 AND user_id = $10
               RETURNING id, user_id, name, website_url, email, company, phone, address, description, category, created_at, updated_at"#,
        )
        .bind(&update.name)
        .bind(&update.website_url)
        .bind(&update.email)
        .bind(&update.company)
        .bind(&update.phone)
        .bind(&update.address)
        .bind(&update.description)
        .bind(&update.category)
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_project(&self, project_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND user_id = $2")
            .bind(project_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Bookmarklet Token Operations --

    pub async fn insert_bookmarklet_token(
        &self,
        token: &NewBookmarkletToken,
    ) -> anyhow::Result<BookmarkletTokenRow> {
        let row = sqlx::query_as::<_, BookmarkletTokenRow>(
            r#"INSERT INTO bookmarklet_tokens (token, project_id, user_id, project_snapshot, max_usage, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING token, project_id, user_id, project_snapshot, max_usage, usage_count, created_at, expires_at"#,
        )
        .bind(&token.token)
        .bind(token.project_id)
        .bind(token.user_id)
        .bind(&token.project_snapshot)
        .bind(token.max_usage)
        .bind(token.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Atomically consume one use of a token.
    ///
    /// The validity check and the increment are a single conditional UPDATE,
    /// so two concurrent calls on a token with one remaining use can never
    /// both succeed — the second one sees `usage_count < max_usage` fail at
    /// the row lock and gets `None`. Callers must not re-implement this as a
    /// read followed by a write.
    pub async fn claim_token_use(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<BookmarkletTokenRow>> {
        let row = sqlx::query_as::<_, BookmarkletTokenRow>(
            r#"UPDATE bookmarklet_tokens
               SET usage_count = usage_count + 1
               WHERE token = $1 AND expires_at > NOW() AND usage_count < max_usage
               RETURNING token, project_id, user_id, project_snapshot, max_usage, usage_count, created_at, expires_at"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Non-mutating lookup, used to name the failure after a missed claim and
    /// by the management list view.
    pub async fn get_bookmarklet_token(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<BookmarkletTokenRow>> {
        let row = sqlx::query_as::<_, BookmarkletTokenRow>(
            r#"SELECT token, project_id, user_id, project_snapshot, max_usage, usage_count, created_at, expires_at
               FROM bookmarklet_tokens WHERE token = $1"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_bookmarklet_tokens(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<Vec<BookmarkletTokenRow>> {
        let rows = sqlx::query_as::<_, BookmarkletTokenRow>(
            r#"SELECT token, project_id, user_id, project_snapshot, max_usage, usage_count, created_at, expires_at
               FROM bookmarklet_tokens
               WHERE project_id = $1 AND user_id = $2
               ORDER BY created_at DESC"#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_bookmarklet_token(
        &self,
        token: &str,
        user_id: Uuid,
    ) -> anyhow::Result<bool> {
        let result =
            sqlx::query("DELETE FROM bookmarklet_tokens WHERE token = $1 AND user_id = $2")
                .bind(token)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete token rows whose expiry is further in the past than `older_than`.
    /// Storage hygiene only — validity is always enforced at read time, so
    /// this can never change the outcome of a validate call.
    pub async fn purge_expired_tokens(&self, older_than: Duration) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query("DELETE FROM bookmarklet_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// -- Input structs --

pub struct NewProject {
    pub user_id: Uuid,
    pub name: String,
    pub website_url: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub website_url: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

pub struct NewBookmarkletToken {
    pub token: String,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub project_snapshot: serde_json::Value,
    pub max_usage: i32,
    pub expires_at: DateTime<Utc>,
}

// -- Output structs --

#[derive(Debug, sqlx::FromRow, Serialize, Deserialize)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub plan: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize, Deserialize)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub key_prefix: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
