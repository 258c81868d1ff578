//! Authentication routes: registration, login, token refresh, logout.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use serde::{Deserialize, Serialize};

use remembr_core::{OrgId, TeamId, Timestamp, UserId};

use crate::auth::{
    create_access_token, create_refresh_token, decode_token_of_type, hash_password,
    is_refresh_token_revoked, revoke_refresh_token, verify_password, TokenType,
};
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
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub org_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user_id: UserId,
    pub email: String,
    pub org_id: OrgId,
    pub team_id: Option<TeamId>,
    pub is_active: bool,
    pub created_at: Timestamp,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/auth/register - Create an organization and its first user.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.email.validate_non_empty("email")?;
    req.org_name.validate_non_empty("org_name")?;
    if !req.email.contains('@') {
        return Err(ApiError::validation("email must be a valid address"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation(
            "password must be at least 8 characters",
        ));
    }

    let hashed = hash_password(&req.password)?;

    let mut conn = state.db.get_conn().await?;
    let tx = conn.transaction().await?;

    if repo::users::find_user_by_email(&*tx, &req.email)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict("Email already registered"));
    }

    let org = repo::users::create_org(&*tx, req.org_name.trim()).await?;
    let user = repo::users::create_user(&*tx, org.org_id, &req.email, &hashed).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.user_id, org_id = %org.org_id, "User registered");

    let access_token = create_access_token(
        &state.auth_config,
        user.user_id,
        Some(&user.email),
        None,
    )?;
    let refresh_token = create_refresh_token(&state.auth_config, user.user_id, Some(&user.email))?;

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            access_token,
            refresh_token,
            token_type: "bearer",
        }),
    ))
}

/// POST /api/v1/auth/login - Authenticate and mint a token pair.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.get_conn().await?;
    let user = repo::users::find_user_by_email(&**conn, &req.email).await?;

    let Some(user) = user else {
        return Err(ApiError::authentication("Incorrect email or password"));
    };
    if !verify_password(&req.password, &user.hashed_password) {
        return Err(ApiError::authentication("Incorrect email or password"));
    }
    if !user.is_active {
        return Err(ApiError::authentication("Inactive user"));
    }

    tracing::info!(user_id = %user.user_id, "User logged in");

    let access_token = create_access_token(
        &state.auth_config,
        user.user_id,
        Some(&user.email),
        None,
    )?;
    let refresh_token = create_refresh_token(&state.auth_config, user.user_id, Some(&user.email))?;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "bearer",
    }))
}

/// POST /api/v1/auth/refresh - Mint a new access token from a refresh token.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    if is_refresh_token_revoked(&state.cache, &req.refresh_token).await {
        return Err(ApiError::authentication("Token has been revoked"));
    }

    let claims = decode_token_of_type(&state.auth_config, &req.refresh_token, TokenType::Refresh)?;
    let user_id = claims.user_id()?;

    tracing::info!(%user_id, "Token refreshed");

    let access_token = create_access_token(
        &state.auth_config,
        user_id,
        claims.email.as_deref(),
        None,
    )?;

    Ok(Json(RefreshResponse {
        access_token,
        token_type: "bearer",
    }))
}

/// POST /api/v1/auth/logout - Revoke a refresh token until it expires.
pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<StatusCode> {
    let claims = decode_token_of_type(&state.auth_config, &req.refresh_token, TokenType::Refresh)?;

    revoke_refresh_token(&state.cache, &req.refresh_token, claims.exp).await;
    tracing::info!(user_id = %claims.sub, "User logged out");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/me - Current authenticated user.
pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<impl IntoResponse> {
    let user_id = ctx
        .user_id
        .ok_or_else(|| ApiError::authentication("No user identity").with_request_id(&ctx.request_id))?;

    let conn = state.db.get_conn().await?;
    let user = repo::users::get_user(&**conn, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found").with_request_id(&ctx.request_id))?;

    Ok(Json(success(
        UserResponse {
            user_id: user.user_id,
            email: user.email,
            org_id: user.org_id,
            team_id: user.team_id,
            is_active: user.is_active,
            created_at: user.created_at,
        },
        &ctx.request_id,
    )))
}
