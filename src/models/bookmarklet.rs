use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A bookmarklet token row as stored in `bookmarklet_tokens`.
///
/// The `token` string is the lookup key; `project_snapshot` is the JSONB copy
/// of the project captured at generation time. Validity is decided purely
/// from `expires_at` / `usage_count` / `max_usage` at read time — there is no
/// revoked flag and no background process that flips state.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BookmarkletTokenRow {
    pub token: String,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub project_snapshot: serde_json::Value,
    pub max_usage: i32,
    pub usage_count: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BookmarkletTokenRow {
    pub fn remaining_uses(&self) -> i32 {
        (self.max_usage - self.usage_count).max(0)
    }

    pub fn status(&self, now: DateTime<Utc>) -> TokenStatus {
        TokenStatus::evaluate(self.expires_at, self.usage_count, self.max_usage, now)
    }
}

/// Outcome of checking a token against the validity invariant:
/// valid ⟺ `now < expires_at` AND `usage_count < max_usage`.
///
/// The validate handler mutates via a single conditional UPDATE; this
/// evaluation is only used afterwards, on the claim-missed path, to name the
/// failure (expired vs exhausted) from a non-mutating re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Expired,
    Exhausted,
}

impl TokenStatus {
    pub fn evaluate(
        expires_at: DateTime<Utc>,
        usage_count: i32,
        max_usage: i32,
        now: DateTime<Utc>,
    ) -> Self {
        // Expiry wins when both bounds are violated: a dead token should not
        // report its usage budget.
        if now >= expires_at {
            TokenStatus::Expired
        } else if usage_count >= max_usage {
            TokenStatus::Exhausted
        } else {
            TokenStatus::Valid
        }
    }
}
