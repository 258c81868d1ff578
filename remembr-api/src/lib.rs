//! Remembr API - multi-tenant persistent memory service for AI agents.
//!
//! This crate hosts the HTTP surface (Axum), authentication (JWT + API
//! keys), the Postgres storage layer with its row-level tenant guard, the
//! short-term window service, the episodic store with asynchronous embedding
//! enrichment, the hybrid query engine, and the forgetting service with its
//! audit trail.

pub mod api_keys;
pub mod auth;
pub mod context;
pub mod db;
pub mod error;
pub mod macros;
pub mod rate_limit;
pub mod repo;
pub mod responses;
pub mod routes;
pub mod services;
pub mod state;
pub mod validation;

// Re-export commonly used types
pub use auth::{
    create_access_token, create_refresh_token, decode_token, decode_token_of_type, AuthConfig,
    Claims, TokenType,
};
pub use context::{AuthMethod, RequestContext};
pub use db::{scoped_tx, DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use rate_limit::{Bucket, RateLimitState};
pub use responses::{success, ApiResponse};
pub use routes::create_api_router;
pub use state::AppState;
