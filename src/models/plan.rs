use serde::{Deserialize, Serialize};

/// Subscription tier attached to a user. Stored as lowercase text in the
/// `users.plan` column; unknown values decode to `Free` so a bad row can
/// never grant access it should not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
}

impl Plan {
    pub fn from_db(s: &str) -> Self {
        match s {
            "starter" => Plan::Starter,
            "pro" => Plan::Pro,
            _ => Plan::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
        }
    }

    /// Per-token usage budget for bookmarklet tokens generated under this
    /// plan. `None` means the plan has no bookmarklet access at all and
    /// generation fails with `Forbidden`.
    pub fn bookmarklet_max_usage(&self) -> Option<i32> {
        match self {
            Plan::Free => None,
            Plan::Starter => Some(10),
            Plan::Pro => Some(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_has_no_bookmarklet_access() {
        assert_eq!(Plan::Free.bookmarklet_max_usage(), None);
    }

    #[test]
    fn paid_plans_have_usage_budgets() {
        assert_eq!(Plan::Starter.bookmarklet_max_usage(), Some(10));
        assert_eq!(Plan::Pro.bookmarklet_max_usage(), Some(100));
    }

    #[test]
    fn unknown_db_value_decodes_to_free() {
        assert_eq!(Plan::from_db("enterprise"), Plan::Free);
        assert_eq!(Plan::from_db(""), Plan::Free);
        assert_eq!(Plan::from_db("pro"), Plan::Pro);
    }

    #[test]
    fn db_roundtrip() {
        for plan in [Plan::Free, Plan::Starter, Plan::Pro] {
            assert_eq!(Plan::from_db(plan.as_str()), plan);
        }
    }
}
