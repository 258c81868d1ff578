//! Core data types for the Remembr memory service.
//!
//! This crate contains the tenancy-aware data model (entities, type-safe
//! entity IDs, role and scope enums), the memory scope resolver with its SQL
//! projection, the pure short-term window engine (token counting, priority
//! scoring, compression), and service configuration. It performs no I/O;
//! storage and transport live in `remembr-api`.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod scope;
pub mod window;

pub use config::Settings;
pub use entities::{
    Agent, ApiKey, AuditLogEntry, Embedding, Episode, MemoryFact, Organization, Session, Team,
    User,
};
pub use enums::{AuditAction, AuditStatus, Environment, EpisodeRole, ScopeLevel, SearchMode};
pub use error::CoreError;
pub use identity::{
    AgentId, ApiKeyId, AuditLogId, EmbeddingId, EntityIdType, EpisodeId, FactId, OrgId, SessionId,
    TeamId, Timestamp, UserId,
};
pub use scope::{MemoryScope, ScopePredicate, ScopeResolver};
pub use window::{token_count, WindowMessage};
