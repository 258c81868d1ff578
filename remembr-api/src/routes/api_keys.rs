//! API key management routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use remembr_core::{AgentId, ApiKeyId, Timestamp};

use crate::api_keys::{generate_api_key, invalidate_lookup};
use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::repo;
use crate::responses::success;
use crate::state::AppState;
use crate::validation::ValidateNonEmpty;

// ============================================================================
// REQUEST / RESPONSE MODELS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub agent_id: Option<AgentId>,
    pub expires_at: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    pub api_key_id: ApiKeyId,
    /// The raw key; shown exactly once and never stored.
    pub api_key: String,
    pub name: String,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyListItem {
    pub api_key_id: ApiKeyId,
    pub name: String,
    pub last_used_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyListResponse {
    pub api_keys: Vec<ApiKeyListItem>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct RevokeApiKeyResponse {
    pub revoked: bool,
    pub api_key_id: ApiKeyId,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/api-keys - Create a key scoped to the caller's identity.
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateApiKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    req.name.validate_non_empty("name")?;
    if let Some(expires_at) = req.expires_at {
        if expires_at <= Utc::now() {
            return Err(ApiError::validation("expires_at must be in the future")
                .with_request_id(&ctx.request_id));
        }
    }

    let (raw_key, key_hash) = generate_api_key();

    let conn = state.db.get_conn().await?;
    let api_key = repo::api_keys::insert_api_key(
        &**conn,
        ctx.org_id,
        ctx.user_id,
        req.agent_id,
        &key_hash,
        req.name.trim(),
        req.expires_at,
    )
    .await?;

    tracing::info!(
        key_id = %api_key.api_key_id,
        org_id = %ctx.org_id,
        name = %api_key.name,
        "API key created"
    );

    Ok((
        StatusCode::CREATED,
        Json(success(
            CreateApiKeyResponse {
                api_key_id: api_key.api_key_id,
                api_key: raw_key,
                name: api_key.name,
                created_at: api_key.created_at,
                expires_at: api_key.expires_at,
            },
            &ctx.request_id,
        )),
    ))
}

/// GET /api/v1/api-keys - List the organization's keys.
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.get_conn().await?;
    let keys = repo::api_keys::list_for_org(&**conn, ctx.org_id).await?;

    let items: Vec<ApiKeyListItem> = keys
        .into_iter()
        .map(|key| ApiKeyListItem {
            api_key_id: key.api_key_id,
            name: key.name,
            last_used_at: key.last_used_at,
            expires_at: key.expires_at,
            created_at: key.created_at,
        })
        .collect();

    Ok(Json(success(
        ApiKeyListResponse {
            total: items.len(),
            api_keys: items,
        },
        &ctx.request_id,
    )))
}

/// DELETE /api/v1/api-keys/:key_id - Revoke a key and drop its cached
/// lookup.
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(key_id): Path<ApiKeyId>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.get_conn().await?;

    let api_key = repo::api_keys::get_for_org(&**conn, key_id, ctx.org_id)
        .await?
        .ok_or_else(|| ApiError::api_key_not_found().with_request_id(&ctx.request_id))?;

    repo::api_keys::revoke(&**conn, key_id, ctx.org_id, Utc::now()).await?;
    invalidate_lookup(&state.cache, &api_key.key_hash).await;

    tracing::info!(%key_id, org_id = %ctx.org_id, name = %api_key.name, "API key revoked");

    Ok(Json(success(
        RevokeApiKeyResponse {
            revoked: true,
            api_key_id: key_id,
        },
        &ctx.request_id,
    )))
}
