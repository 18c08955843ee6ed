use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The root branch. Always present, never archived.
pub const MAIN_BRANCH: &str = "main";

/// Names a branch may never take.
const RESERVED_NAMES: &[&str] = &["all", "none", "registry", "system"];

/// Branch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Active,
    Merged,
    Archived,
}

impl BranchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BranchStatus::Active => "active",
            BranchStatus::Merged => "merged",
            BranchStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(BranchStatus::Active),
            "merged" => Ok(BranchStatus::Merged),
            "archived" => Ok(BranchStatus::Archived),
            other => Err(Error::internal(format!("unknown branch status '{other}'"))),
        }
    }
}

/// Registry row for a named, isolated view of the branched tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub branch_name: String,
    /// `None` only for `main`.
    pub parent_branch: Option<String>,
    pub description: Option<String>,
    pub status: BranchStatus,
    pub forked_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_strategy: Option<String>,
    pub metadata: serde_json::Value,
}

static BRANCH_NAME: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9/_.-]{0,99}$").unwrap()
});

/// Gate for branch names: first char alphanumeric, then up to 99 of
/// `[a-zA-Z0-9/_.-]`, and never a reserved word.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if !BRANCH_NAME.is_match(name) {
        return Err(Error::invalid_argument(format!(
            "invalid branch name '{name}': must match ^[a-zA-Z0-9][a-zA-Z0-9/_.-]{{0,99}}$"
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::invalid_argument(format!(
            "branch name '{name}' is reserved"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_names() {
        for name in ["main", "exp/a", "agent-1_try.2", "x"] {
            assert!(validate_branch_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_bad_names() {
        let too_long = "x".repeat(101);
        for name in ["", "/lead", "-dash", "has space", "all", too_long.as_str()] {
            assert!(validate_branch_name(name).is_err(), "{name}");
        }
    }
}
