//! Shared application state for Axum routers.

use std::sync::Arc;

use remembr_cache::CacheService;
use remembr_core::Settings;

use crate::auth::AuthConfig;
use crate::db::DbClient;
use crate::services::episodic::EpisodicMemory;
use crate::services::forgetting::ForgettingService;
use crate::services::query::MemoryQueryEngine;
use crate::services::short_term::ShortTermMemory;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DbClient,
    pub cache: CacheService,
    pub auth_config: AuthConfig,
    pub short_term: ShortTermMemory,
    pub episodic: EpisodicMemory,
    pub forgetting: ForgettingService,
}

impl AppState {
    /// The query engine is cheap to assemble per request from the shared
    /// services.
    pub fn query_engine(&self) -> MemoryQueryEngine {
        MemoryQueryEngine::new(self.short_term.clone(), self.episodic.clone())
    }
}

crate::impl_from_ref!(DbClient, db);
crate::impl_from_ref!(CacheService, cache);
crate::impl_from_ref!(AuthConfig, auth_config);
crate::impl_from_ref!(ShortTermMemory, short_term);
crate::impl_from_ref!(EpisodicMemory, episodic);
crate::impl_from_ref!(ForgettingService, forgetting);
crate::impl_from_ref!(Arc<Settings>, settings);
