//! Memory routes: episodic logging, hybrid search, diff, and forgetting.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use remembr_core::{
    token_count, EpisodeId, SearchMode, SessionId, Timestamp, UserId, WindowMessage,
};

use crate::context::RequestContext;
use crate::db::scoped_tx;
use crate::error::{ApiError, ApiResult};
use crate::repo;
use crate::repo::episodes::EpisodeFilter;
use crate::responses::success;
use crate::services::query::MemoryQueryRequest;
use crate::state::AppState;
use crate::validation::{validate_limit, validate_time_range, ValidateNonEmpty};

// ============================================================================
// REQUEST / RESPONSE MODELS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogMemoryRequest {
    pub role: String,
    pub content: String,
    pub session_id: Option<SessionId>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct LogMemoryResponse {
    pub episode_id: EpisodeId,
    pub session_id: Option<SessionId>,
    pub created_at: Timestamp,
    pub token_count: i32,
}

#[derive(Debug, Deserialize)]
pub struct SearchMemoryRequest {
    pub query: Option<String>,
    pub session_id: Option<SessionId>,
    pub role: Option<String>,
    pub tags: Option<Vec<String>>,
    pub from_time: Option<Timestamp>,
    pub to_time: Option<Timestamp>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_true")]
    pub include_short_term: bool,
    #[serde(default = "default_true")]
    pub include_episodic: bool,
    #[serde(default)]
    pub mode: SearchMode,
}

fn default_search_limit() -> usize {
    20
}

fn default_score_threshold() -> f64 {
    0.65
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    ShortTerm,
    Episodic,
}

#[derive(Debug, Serialize)]
pub struct MemorySearchResult {
    pub source: ResultSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<EpisodeId>,
    pub content: String,
    pub role: String,
    pub score: f64,
    pub created_at: Timestamp,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MemorySearchResponse {
    pub results: Vec<MemorySearchResult>,
    pub total: usize,
    pub query_time_ms: f64,
}

#[derive(Debug, Deserialize)]
pub struct MemoryDiffQuery {
    pub from_time: Timestamp,
    pub to_time: Timestamp,
    pub session_id: Option<SessionId>,
    pub user_id: Option<UserId>,
    pub role: Option<String>,
    /// Comma-separated tag list; overlap semantics.
    pub tags: Option<String>,
}

impl MemoryDiffQuery {
    fn tag_list(&self) -> Option<Vec<String>> {
        self.tags.as_ref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[derive(Debug, Serialize)]
pub struct MemoryDiffEpisode {
    pub episode_id: EpisodeId,
    pub session_id: Option<SessionId>,
    pub role: String,
    pub content: String,
    pub created_at: Timestamp,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DiffPeriod {
    pub from: Timestamp,
    pub to: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct MemoryDiffResponse {
    pub added: Vec<MemoryDiffEpisode>,
    pub period: DiffPeriod,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteEpisodeResponse {
    pub deleted: bool,
    pub episode_id: EpisodeId,
}

#[derive(Debug, Serialize)]
pub struct DeleteSessionMemoriesResponse {
    pub deleted_count: i64,
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct DeleteUserMemoriesResponse {
    pub deleted_episodes: i64,
    pub deleted_sessions: i64,
    pub user_id: UserId,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/memory - Log an episode; session-bound episodes also feed
/// the short-term window, auto-checkpointing past the threshold.
pub async fn log_memory(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<LogMemoryRequest>,
) -> ApiResult<impl IntoResponse> {
    req.role.validate_non_empty("role")?;
    req.content.validate_non_empty("content")?;
    if req.role.len() > 50 {
        return Err(ApiError::validation("role must be at most 50 characters"));
    }

    let scope = ctx.writable_scope()?;
    let tags = req.tags.clone().unwrap_or_default();

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;

    if let Some(session_id) = req.session_id {
        repo::sessions::get_session(&*tx, session_id, &scope)
            .await?
            .ok_or_else(|| ApiError::session_not_found().with_request_id(&ctx.request_id))?;
    }

    let episode = state
        .episodic
        .log(
            &*tx,
            &scope,
            &req.role,
            &req.content,
            &tags,
            req.metadata.as_ref(),
            req.session_id,
        )
        .await?;
    tx.commit().await?;

    // Enrichment only after the row is committed; the episode is findable
    // through filter-only search immediately, semantically once the vector
    // lands.
    state.episodic.schedule_enrichment(&episode);

    let tokens = token_count(&req.content);

    if let Some(session_id) = req.session_id {
        let message = WindowMessage {
            role: req.role.clone(),
            content: req.content.clone(),
            tokens,
            priority_score: 0.0,
            timestamp: Utc::now(),
        };
        state
            .short_term
            .add_message(session_id, message)
            .await
            .map_err(|e| e.with_request_id(&ctx.request_id))?;

        let tx = scoped_tx(&mut conn, scope.org_id).await?;
        let checkpoint = state
            .short_term
            .auto_checkpoint(&*tx, session_id, &scope)
            .await
            .map_err(|e| e.with_request_id(&ctx.request_id))?;
        tx.commit().await?;
        if let Some(checkpoint_id) = checkpoint {
            tracing::debug!(%session_id, %checkpoint_id, "Auto-checkpoint taken on log");
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(success(
            LogMemoryResponse {
                episode_id: episode.episode_id,
                session_id: episode.session_id,
                created_at: episode.created_at,
                token_count: tokens,
            },
            &ctx.request_id,
        )),
    ))
}

/// POST /api/v1/memory/search - Hybrid retrieval across short-term and
/// episodic memory.
pub async fn search_memory(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<SearchMemoryRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_limit(req.limit as i64, 100)?;
    validate_time_range(req.from_time, req.to_time)
        .map_err(|e| e.with_request_id(&ctx.request_id))?;
    if req.mode == SearchMode::Semantic
        && req.query.as_deref().map_or(true, |q| q.trim().is_empty())
    {
        return Err(
            ApiError::validation("semantic search requires a query")
                .with_request_id(&ctx.request_id),
        );
    }

    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;

    if let Some(session_id) = req.session_id {
        repo::sessions::get_session(&*tx, session_id, &scope)
            .await?
            .ok_or_else(|| ApiError::session_not_found().with_request_id(&ctx.request_id))?;
    }

    let request = MemoryQueryRequest {
        query: req.query.clone(),
        session_id: req.session_id,
        tags: req.tags.clone(),
        from_time: req.from_time,
        to_time: req.to_time,
        role: req.role.clone(),
        include_short_term: req.include_short_term,
        include_episodic: req.include_episodic,
        limit: req.limit,
        score_threshold: req.score_threshold,
        search_mode: req.mode,
    };

    let engine = state.query_engine();
    let result = engine
        .query(&*tx, &scope, &request)
        .await
        .map_err(|e| e.with_request_id(&ctx.request_id))?;
    tx.commit().await?;

    let mut results = Vec::with_capacity(result.total_results);
    for scored in result.short_term_messages {
        results.push(MemorySearchResult {
            source: ResultSource::ShortTerm,
            episode_id: None,
            content: scored.message.content,
            role: scored.message.role,
            score: scored.score,
            created_at: scored.message.timestamp,
            tags: Vec::new(),
        });
    }
    for hit in result.episodes {
        results.push(MemorySearchResult {
            source: ResultSource::Episodic,
            episode_id: Some(hit.episode.episode_id),
            content: hit.episode.content,
            role: hit.episode.role,
            score: hit.similarity_score,
            created_at: hit.episode.created_at,
            tags: hit.episode.tags,
        });
    }
    if req.mode == SearchMode::FilterOnly {
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    } else {
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.created_at.cmp(&a.created_at))
        });
    }

    Ok(Json(success(
        MemorySearchResponse {
            total: result.total_results,
            query_time_ms: result.query_time_ms,
            results,
        },
        &ctx.request_id,
    )))
}

/// GET /api/v1/memory/diff - Episodes added in a time window.
pub async fn memory_diff(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<MemoryDiffQuery>,
) -> ApiResult<impl IntoResponse> {
    if params.to_time < params.from_time {
        return Err(ApiError::invalid_time_range().with_request_id(&ctx.request_id));
    }

    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;

    if let Some(session_id) = params.session_id {
        repo::sessions::get_session(&*tx, session_id, &scope)
            .await?
            .ok_or_else(|| ApiError::session_not_found().with_request_id(&ctx.request_id))?;
    }

    let filter = EpisodeFilter {
        session_id: params.session_id,
        tags: params.tag_list(),
        role: params.role.clone(),
        from_time: Some(params.from_time),
        to_time: Some(params.to_time),
        ascending: true,
        limit: 10_000,
        offset: 0,
    };
    let mut episodes = repo::episodes::list_episodes(&*tx, &scope, &filter).await?;
    tx.commit().await?;

    if let Some(user_id) = params.user_id {
        episodes.retain(|ep| ep.user_id == Some(user_id));
    }

    let added: Vec<MemoryDiffEpisode> = episodes
        .into_iter()
        .map(|ep| MemoryDiffEpisode {
            episode_id: ep.episode_id,
            session_id: ep.session_id,
            role: ep.role,
            content: ep.content,
            created_at: ep.created_at,
            tags: ep.tags,
        })
        .collect();

    Ok(Json(success(
        MemoryDiffResponse {
            count: added.len(),
            period: DiffPeriod {
                from: params.from_time,
                to: params.to_time,
            },
            added,
        },
        &ctx.request_id,
    )))
}

/// DELETE /api/v1/memory/:episode_id - Forget one episode.
pub async fn delete_memory_episode(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(episode_id): Path<EpisodeId>,
) -> ApiResult<impl IntoResponse> {
    let scope = ctx.writable_scope()?;

    let deleted = state
        .forgetting
        .delete_episode(episode_id, &scope, &ctx.request_id, ctx.user_id)
        .await
        .map_err(|e| e.with_request_id(&ctx.request_id))?;

    if !deleted {
        return Err(ApiError::episode_not_found().with_request_id(&ctx.request_id));
    }

    Ok(Json(success(
        DeleteEpisodeResponse {
            deleted: true,
            episode_id,
        },
        &ctx.request_id,
    )))
}

/// DELETE /api/v1/memory/session/:session_id - Forget a session's memories.
pub async fn delete_session_memories(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    let scope = ctx.writable_scope()?;

    let mut conn = state.db.get_conn().await?;
    let tx = scoped_tx(&mut conn, scope.org_id).await?;
    repo::sessions::get_session(&*tx, session_id, &scope)
        .await?
        .ok_or_else(|| ApiError::session_not_found().with_request_id(&ctx.request_id))?;
    tx.commit().await?;

    let deleted_count = state
        .forgetting
        .delete_session_memories(session_id, &scope, &ctx.request_id, ctx.user_id)
        .await
        .map_err(|e| e.with_request_id(&ctx.request_id))?;

    Ok(Json(success(
        DeleteSessionMemoriesResponse {
            deleted_count,
            session_id,
        },
        &ctx.request_id,
    )))
}

/// DELETE /api/v1/memory/user/:user_id - Forget all of a user's memories.
/// Requires org-level authority.
pub async fn delete_user_memories(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(user_id): Path<UserId>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_org_level()?;

    let result = state
        .forgetting
        .delete_user_memories(user_id, ctx.org_id, &ctx.request_id, ctx.user_id)
        .await
        .map_err(|e| e.with_request_id(&ctx.request_id))?;

    Ok(Json(success(
        DeleteUserMemoriesResponse {
            deleted_episodes: result.deleted_episodes,
            deleted_sessions: result.deleted_sessions,
            user_id,
        },
        &ctx.request_id,
    )))
}
