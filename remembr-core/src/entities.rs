//! Core entity structures
//!
//! Each tenant-scoped entity carries `org_id` plus the optional
//! `team_id`/`user_id`/`agent_id` columns the scope resolver filters on.

use crate::enums::{AuditAction, AuditStatus};
use crate::identity::{
    AgentId, ApiKeyId, AuditLogId, EmbeddingId, EpisodeId, FactId, OrgId, SessionId, TeamId,
    Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

/// Organization - root tenancy boundary.
/// Deleting an organization cascades to everything beneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: OrgId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Team - sub-tenancy node below an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub team_id: TeamId,
    pub org_id: OrgId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// User - human identity within an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub org_id: OrgId,
    pub team_id: Option<TeamId>,
    pub email: String,
    /// bcrypt hash; never serialized into responses.
    #[serde(skip_serializing, default)]
    pub hashed_password: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Agent - automated identity, optionally bound to a user and team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub org_id: OrgId,
    pub user_id: Option<UserId>,
    pub team_id: Option<TeamId>,
    pub name: String,
    pub created_at: Timestamp,
}

/// Session - a conversation envelope grouping episodes.
/// The scope tuple is immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub org_id: OrgId,
    pub team_id: Option<TeamId>,
    pub user_id: Option<UserId>,
    pub agent_id: Option<AgentId>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

/// Episode - atomic memory record.
///
/// When `session_id` is set the episode's scope tuple equals its session's
/// scope tuple. Episodes with role `checkpoint` carry a serialized
/// short-term window as content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: EpisodeId,
    pub org_id: OrgId,
    pub team_id: Option<TeamId>,
    pub user_id: Option<UserId>,
    pub agent_id: Option<AgentId>,
    pub session_id: Option<SessionId>,
    pub role: String,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

impl Episode {
    /// Read `message_count` from checkpoint metadata, defaulting to 0.
    pub fn checkpoint_message_count(&self) -> i64 {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("message_count"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }
}

/// Embedding - one vector per episode (or memory fact).
///
/// `org_id` is duplicated from the owning row so the tenant guard applies to
/// vector search without a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub embedding_id: EmbeddingId,
    pub org_id: OrgId,
    pub episode_id: Option<EpisodeId>,
    pub fact_id: Option<FactId>,
    pub content: String,
    pub model: String,
    pub dimensions: i32,
    pub vector: Vec<f32>,
    pub created_at: Timestamp,
}

/// Memory fact - (subject, predicate, object) triple at rest.
/// Present in the data model for completeness; nothing in the write path
/// produces facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    pub fact_id: FactId,
    pub org_id: OrgId,
    pub team_id: Option<TeamId>,
    pub user_id: Option<UserId>,
    pub agent_id: Option<AgentId>,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub valid_from: Option<Timestamp>,
    pub valid_until: Option<Timestamp>,
    pub source_episode_id: Option<EpisodeId>,
    pub created_at: Timestamp,
}

/// API key - stored as a SHA-256 digest; the raw value is shown once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub api_key_id: ApiKeyId,
    pub org_id: OrgId,
    pub user_id: Option<UserId>,
    pub agent_id: Option<AgentId>,
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    pub name: String,
    pub last_used_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl ApiKey {
    /// A key is expired once `expires_at` is in the past; revocation sets
    /// `expires_at` to now.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Audit log entry - append-only record of a privileged mutation.
///
/// Written outside the mutating transaction so a rollback never erases the
/// attempt record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub audit_id: AuditLogId,
    pub org_id: Option<OrgId>,
    pub actor_user_id: Option<UserId>,
    pub action: AuditAction,
    pub status: AuditStatus,
    pub target_type: String,
    pub target_id: Option<String>,
    pub request_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::role;
    use crate::identity::EntityIdType;
    use chrono::Utc;

    fn sample_episode(metadata: Option<serde_json::Value>) -> Episode {
        Episode {
            episode_id: EpisodeId::new_v4(),
            org_id: OrgId::new_v4(),
            team_id: None,
            user_id: None,
            agent_id: None,
            session_id: None,
            role: role::CHECKPOINT.to_string(),
            content: "[]".to_string(),
            tags: Vec::new(),
            metadata,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_checkpoint_message_count() {
        let ep = sample_episode(Some(serde_json::json!({"message_count": 7})));
        assert_eq!(ep.checkpoint_message_count(), 7);

        let ep = sample_episode(Some(serde_json::json!({"checkpoint": true})));
        assert_eq!(ep.checkpoint_message_count(), 0);

        let ep = sample_episode(None);
        assert_eq!(ep.checkpoint_message_count(), 0);
    }

    #[test]
    fn test_api_key_expiry() {
        let now = Utc::now();
        let key = ApiKey {
            api_key_id: ApiKeyId::new_v4(),
            org_id: OrgId::new_v4(),
            user_id: None,
            agent_id: None,
            key_hash: "abc".to_string(),
            name: "ci".to_string(),
            last_used_at: None,
            expires_at: None,
            created_at: now,
        };
        assert!(!key.is_expired(now));

        let revoked = ApiKey {
            expires_at: Some(now - chrono::Duration::seconds(1)),
            ..key.clone()
        };
        assert!(revoked.is_expired(now));

        let future = ApiKey {
            expires_at: Some(now + chrono::Duration::days(30)),
            ..key
        };
        assert!(!future.is_expired(now));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            user_id: UserId::new_v4(),
            org_id: OrgId::new_v4(),
            team_id: None,
            email: "a@example.com".to_string(),
            hashed_password: "$2b$12$secret".to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).expect("serializable");
        assert!(!json.contains("secret"));
        assert!(!json.contains("hashed_password"));
    }
}
