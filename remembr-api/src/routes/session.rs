//! Session routes: creation, listing, window inspection, history, and
//! checkpoint management.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use remembr_core::{
    EpisodeId, MemoryScope, OrgId, Session, SessionId, Timestamp, WindowMessage,
};
use tokio_postgres::GenericClient;

use crate::context::RequestContext;
use crate::db::scoped_tx;
use crate::error::{ApiError, ApiResult};
use crate::repo;
use crate::repo::episodes::EpisodeFilter;
use crate::responses::success;
use crate::services::short_term::TokenUsage;
use crate::state::AppState;
use crate::validation::{validate_limit, validate_time_range};

// ============================================================================
// REQUEST / RESPONSE MODELS
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionRequest {
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub org_id: OrgId,
    pub created_at: Timestamp,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct SessionListItem {
    pub session_id: SessionId,
    pub created_at: Timestamp,
    pub metadata: Option<serde_json::Value>,
    pub message_count: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionListItem>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session_id: SessionId,
    pub org_id: OrgId,
    pub created_at: Timestamp,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    pub session: SessionDetail,
    pub messages: Vec<WindowMessage>,
    pub token_usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
pub struct SessionHistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub from_time: Option<Timestamp>,
    pub to_time: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryItem {
    pub episode_id: EpisodeId,
    pub session_id: Option<SessionId>,
    pub role: String,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryResponse {
    pub episodes: Vec<SessionHistoryItem>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionCheckpointResponse {
    pub checkpoint_id: EpisodeId,
    pub created_at: Timestamp,
    pub message_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct RestoreSessionRequest {
    pub checkpoint_id: EpisodeId,
}

#[derive(Debug, Serialize)]
pub struct RestoreSessionResponse {
    pub restored_message_count: usize,
    pub checkpoint_created_at: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct CheckpointListItem {
    pub checkpoint_id: EpisodeId,
    pub created_at: Timestamp,
    pub message_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckpointListResponse {
    pub checkpoints: Vec<CheckpointListItem>,
}

// ============================================================================
// HELPERS
// ============================================================================

async fn require_session_in_scope<C: GenericClient>(
    client: &C,
    session_id: SessionId,
    scope: &MemoryScope,
    request_id: &str,
) -> ApiResult<Session> {
    repo::sessions::get_session(client, session_id, scope)
        .await?
        .ok_or_else(|| ApiError::session_not_found().with_request_id(request_id))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/sessions - Create a session in the writable scope.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;
    let session = repo::sessions::create_session(&*tx, &scope, req.metadata.as_ref()).await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(success(
            CreateSessionResponse {
                session_id: session.session_id,
                org_id: session.org_id,
                created_at: session.created_at,
                metadata: session.metadata,
            },
            &ctx.request_id,
        )),
    ))
}

/// GET /api/v1/sessions - List sessions with per-session episode counts.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<ListSessionsQuery>,
) -> ApiResult<impl IntoResponse> {
    validate_limit(params.limit, 100)?;
    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;

    let total = repo::sessions::count_sessions(&*tx, &scope).await?;
    let sessions = repo::sessions::list_sessions(&*tx, &scope, params.limit, params.offset).await?;
    let session_ids: Vec<SessionId> = sessions.iter().map(|s| s.session_id).collect();
    let counts = repo::sessions::session_episode_counts(&*tx, &scope, &session_ids).await?;
    tx.commit().await?;

    let items = sessions
        .into_iter()
        .map(|session| SessionListItem {
            message_count: counts.get(&session.session_id).copied().unwrap_or(0),
            session_id: session.session_id,
            created_at: session.created_at,
            metadata: session.metadata,
        })
        .collect();

    Ok(Json(success(
        SessionListResponse {
            sessions: items,
            total,
            limit: params.limit,
            offset: params.offset,
        },
        &ctx.request_id,
    )))
}

/// GET /api/v1/sessions/:session_id - Session detail with the live window
/// and its token usage.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;
    let session = require_session_in_scope(&*tx, session_id, &scope, &ctx.request_id).await?;
    tx.commit().await?;

    let messages = state.short_term.get_context(session_id).await;
    let token_usage = state.short_term.token_usage(session_id).await;

    Ok(Json(success(
        SessionDetailResponse {
            session: SessionDetail {
                session_id: session.session_id,
                org_id: session.org_id,
                created_at: session.created_at,
                metadata: session.metadata,
            },
            messages,
            token_usage,
        },
        &ctx.request_id,
    )))
}

/// GET /api/v1/sessions/:session_id/history - Episodes of a session, newest
/// first, with optional time bounds.
pub async fn get_session_history(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<SessionId>,
    Query(params): Query<SessionHistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    validate_limit(params.limit, 1000)?;
    validate_time_range(params.from_time, params.to_time)
        .map_err(|e| e.with_request_id(&ctx.request_id))?;
    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;
    require_session_in_scope(&*tx, session_id, &scope, &ctx.request_id).await?;

    let total = repo::episodes::count_session_episodes(
        &*tx,
        session_id,
        &scope,
        params.from_time,
        params.to_time,
    )
    .await?;

    let filter = EpisodeFilter {
        session_id: Some(session_id),
        from_time: params.from_time,
        to_time: params.to_time,
        limit: params.limit,
        offset: params.offset,
        ..Default::default()
    };
    let episodes = repo::episodes::list_episodes(&*tx, &scope, &filter).await?;
    tx.commit().await?;

    let items = episodes
        .into_iter()
        .map(|ep| SessionHistoryItem {
            episode_id: ep.episode_id,
            session_id: ep.session_id,
            role: ep.role,
            content: ep.content,
            tags: ep.tags,
            metadata: ep.metadata,
            created_at: ep.created_at,
        })
        .collect();

    Ok(Json(success(
        SessionHistoryResponse {
            episodes: items,
            total,
            limit: params.limit,
            offset: params.offset,
        },
        &ctx.request_id,
    )))
}

/// POST /api/v1/sessions/:session_id/checkpoint - Snapshot the live window
/// as a checkpoint episode.
pub async fn create_session_checkpoint(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;

    let checkpoint_id = state
        .short_term
        .checkpoint(&*tx, session_id, &scope)
        .await
        .map_err(|e| e.with_request_id(&ctx.request_id))?;

    let checkpoint = repo::episodes::get_checkpoint(&*tx, checkpoint_id, session_id, &scope)
        .await?
        .ok_or_else(|| ApiError::checkpoint_not_found().with_request_id(&ctx.request_id))?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(success(
            SessionCheckpointResponse {
                checkpoint_id,
                created_at: checkpoint.created_at,
                message_count: checkpoint.checkpoint_message_count(),
            },
            &ctx.request_id,
        )),
    ))
}

/// POST /api/v1/sessions/:session_id/restore - Replace the live window with
/// a checkpoint's payload.
pub async fn restore_session_checkpoint(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<RestoreSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;

    let checkpoint = repo::episodes::get_checkpoint(&*tx, req.checkpoint_id, session_id, &scope)
        .await?
        .ok_or_else(|| ApiError::checkpoint_not_found().with_request_id(&ctx.request_id))?;

    let restored_message_count = state
        .short_term
        .restore_from_checkpoint(&*tx, session_id, req.checkpoint_id, &scope)
        .await
        .map_err(|e| e.with_request_id(&ctx.request_id))?;
    tx.commit().await?;

    Ok(Json(success(
        RestoreSessionResponse {
            restored_message_count,
            checkpoint_created_at: checkpoint.created_at,
        },
        &ctx.request_id,
    )))
}

/// GET /api/v1/sessions/:session_id/checkpoints - Checkpoints of a session,
/// newest first.
pub async fn list_session_checkpoints(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;
    let checkpoints = state
        .short_term
        .list_checkpoints(&*tx, session_id, &scope)
        .await
        .map_err(|e| e.with_request_id(&ctx.request_id))?;
    tx.commit().await?;

    let items = checkpoints
        .into_iter()
        .map(|ep| CheckpointListItem {
            checkpoint_id: ep.episode_id,
            created_at: ep.created_at,
            message_count: ep.checkpoint_message_count(),
        })
        .collect();

    Ok(Json(success(
        CheckpointListResponse { checkpoints: items },
        &ctx.request_id,
    )))
}
