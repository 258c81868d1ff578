//! Route handlers and router assembly.

pub mod api_keys;
pub mod auth;
pub mod memory;
pub mod session;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::context::{auth_middleware, ContextState};
use crate::rate_limit::{rate_limit_middleware, RateLimitState};
use crate::state::AppState;

/// Build the full `/api/v1` router.
///
/// Middleware order (outermost first): trace → rate limit → auth. Rate
/// limiting keys on raw credentials so it runs before authentication; the
/// token endpoints themselves are outside the auth layer but inside the
/// rate limiter.
pub fn create_api_router(state: AppState) -> Router {
    let context_state = ContextState {
        db: state.db.clone(),
        cache: state.cache.clone(),
        auth_config: state.auth_config.clone(),
    };
    let rate_limit_state = RateLimitState::new(&state.settings);

    let protected = Router::new()
        .route(
            "/sessions",
            post(session::create_session).get(session::list_sessions),
        )
        .route("/sessions/:session_id", get(session::get_session))
        .route(
            "/sessions/:session_id/history",
            get(session::get_session_history),
        )
        .route(
            "/sessions/:session_id/checkpoint",
            post(session::create_session_checkpoint),
        )
        .route(
            "/sessions/:session_id/restore",
            post(session::restore_session_checkpoint),
        )
        .route(
            "/sessions/:session_id/checkpoints",
            get(session::list_session_checkpoints),
        )
        .route("/memory", post(memory::log_memory))
        .route("/memory/search", post(memory::search_memory))
        .route("/memory/diff", get(memory::memory_diff))
        .route("/memory/:episode_id", delete(memory::delete_memory_episode))
        .route(
            "/memory/session/:session_id",
            delete(memory::delete_session_memories),
        )
        .route(
            "/memory/user/:user_id",
            delete(memory::delete_user_memories),
        )
        .route("/auth/me", get(auth::me))
        .route(
            "/api-keys",
            post(api_keys::create_api_key).get(api_keys::list_api_keys),
        )
        .route("/api-keys/:key_id", delete(api_keys::revoke_api_key))
        .layer(middleware::from_fn_with_state(
            context_state,
            auth_middleware,
        ));

    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout));

    Router::new()
        .nest("/api/v1", protected.merge(public))
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
