//! Enumerations shared across the Remembr data model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// ============================================================================
// EPISODE ROLES
// ============================================================================

/// Well-known episode roles.
///
/// The role column is an open set (stored as text); these constants cover the
/// roles the core treats specially. Unknown roles are accepted on the write
/// path and receive the default priority weight in the short-term window.
pub mod role {
    pub const USER: &str = "user";
    pub const ASSISTANT: &str = "assistant";
    pub const SYSTEM: &str = "system";
    pub const TOOL: &str = "tool";
    pub const HANDOFF: &str = "handoff";

    /// Checkpoint episodes carry a serialized short-term window as content
    /// and `message_count` in their metadata.
    pub const CHECKPOINT: &str = "checkpoint";
}

/// Marker type re-exported for documentation purposes; roles travel as
/// strings end to end.
pub type EpisodeRole = String;

// ============================================================================
// SCOPE LEVEL
// ============================================================================

/// Specificity level of a memory scope in the org → team → user → agent
/// hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Org,
    Team,
    User,
    Agent,
}

impl ScopeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeLevel::Org => "org",
            ScopeLevel::Team => "team",
            ScopeLevel::User => "user",
            ScopeLevel::Agent => "agent",
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SEARCH MODE
// ============================================================================

/// Retrieval mode for the hybrid query engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Vector similarity over scope-filtered embeddings; metadata filters
    /// applied caller-side.
    Semantic,
    /// Vector similarity combined with storage-layer metadata filters.
    #[default]
    Hybrid,
    /// No embedding involved; strictly consistent, ordered by time.
    FilterOnly,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
            SearchMode::FilterOnly => "filter_only",
        }
    }
}

impl FromStr for SearchMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            "filter_only" => Ok(SearchMode::FilterOnly),
            other => Err(CoreError::InvalidSearchMode(other.to_string())),
        }
    }
}

// ============================================================================
// AUDIT
// ============================================================================

/// Actions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DeleteEpisode,
    DeleteSessionMemories,
    DeleteUserMemories,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::DeleteEpisode => "delete_episode",
            AuditAction::DeleteSessionMemories => "delete_session_memories",
            AuditAction::DeleteUserMemories => "delete_user_memories",
        }
    }
}

/// Outcome status of an audited operation.
///
/// Every privileged mutation writes `Attempt` before it begins and exactly
/// one of `Success`/`Failed` after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Attempt,
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Attempt => "attempt",
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
        }
    }
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Deployment environment; gates debug surfaces and secret validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(CoreError::InvalidEnvironment(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_mode_round_trip() {
        for mode in [SearchMode::Semantic, SearchMode::Hybrid, SearchMode::FilterOnly] {
            let parsed: SearchMode = mode.as_str().parse().expect("known mode should parse");
            assert_eq!(parsed, mode);
        }
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }

    #[test]
    fn test_search_mode_serde() {
        let json = serde_json::to_string(&SearchMode::FilterOnly).expect("serializable");
        assert_eq!(json, "\"filter_only\"");
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("production".parse::<Environment>().ok(), Some(Environment::Production));
        assert_eq!("LOCAL".parse::<Environment>().ok(), Some(Environment::Local));
        assert!("dev".parse::<Environment>().is_err());
        assert!(Environment::Production.is_production());
        assert!(!Environment::Staging.is_production());
    }

    #[test]
    fn test_audit_strings() {
        assert_eq!(AuditAction::DeleteUserMemories.as_str(), "delete_user_memories");
        assert_eq!(AuditStatus::Attempt.as_str(), "attempt");
    }
}
