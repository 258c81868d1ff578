//! Request context extraction and authentication middleware.
//!
//! Every authenticated route accepts two methods: a bearer access token or
//! an `x-api-key` header. The middleware resolves the identity, attaches a
//! per-request id, and injects a [`RequestContext`] into request extensions
//! for handlers to read. The context is an explicit value; nothing downstream
//! reaches for ambient state.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use remembr_cache::CacheService;
use remembr_core::{AgentId, MemoryScope, OrgId, ScopeResolver, UserId};

use crate::api_keys::lookup_api_key;
use crate::auth::{decode_token_of_type, AuthConfig, TokenType};
use crate::db::DbClient;
use crate::error::{ApiError, ApiResult};
use crate::repo;

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// Authentication method used for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Jwt,
    ApiKey,
}

/// Request id generated before authentication so rate-limit and auth errors
/// carry it too.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Request-scoped identity and tenancy context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub org_id: OrgId,
    pub user_id: Option<UserId>,
    pub agent_id: Option<AgentId>,
    pub auth_method: AuthMethod,
}

impl RequestContext {
    /// Resolve the most-specific scope this identity permits.
    pub fn scope(&self) -> ApiResult<MemoryScope> {
        ScopeResolver::from_identity(self.org_id, self.user_id, self.agent_id)
            .map_err(ApiError::from)
    }

    /// Resolve the writable scope; writes always pin to the most specific
    /// level available.
    pub fn writable_scope(&self) -> ApiResult<MemoryScope> {
        Ok(ScopeResolver::resolve_writable_scope(&self.scope()?))
    }

    /// Require org-level authority (no user or agent identity).
    pub fn require_org_level(&self) -> ApiResult<()> {
        if self.user_id.is_some() || self.agent_id.is_some() {
            return Err(ApiError::org_level_required().with_request_id(&self.request_id));
        }
        Ok(())
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Shared state for the authentication middleware.
#[derive(Clone)]
pub struct ContextState {
    pub db: DbClient,
    pub cache: CacheService,
    pub auth_config: AuthConfig,
}

async fn try_jwt_auth(state: &ContextState, token: &str) -> ApiResult<Option<RequestContext>> {
    let claims = match decode_token_of_type(&state.auth_config, token, TokenType::Access) {
        Ok(claims) => claims,
        Err(_) => return Ok(None),
    };

    let user_id = claims.user_id()?;
    let agent_id = claims.agent_id()?;

    let conn = state.db.get_conn().await?;
    let user = match repo::users::get_user(&**conn, user_id).await? {
        Some(user) => user,
        None => {
            tracing::warn!(%user_id, "Token subject not found");
            return Ok(None);
        }
    };
    if !user.is_active {
        tracing::warn!(%user_id, "Inactive user");
        return Ok(None);
    }

    Ok(Some(RequestContext {
        request_id: String::new(),
        org_id: user.org_id,
        user_id: Some(user.user_id),
        agent_id,
        auth_method: AuthMethod::Jwt,
    }))
}

async fn try_api_key_auth(
    state: &ContextState,
    raw_key: &str,
) -> ApiResult<Option<RequestContext>> {
    let context = match lookup_api_key(&state.db, &state.cache, raw_key).await? {
        Some(context) => context,
        None => return Ok(None),
    };

    Ok(Some(RequestContext {
        request_id: String::new(),
        org_id: context.org_id,
        user_id: context.user_id,
        agent_id: context.agent_id,
        auth_method: AuthMethod::ApiKey,
    }))
}

/// Axum middleware that authenticates the request and injects
/// [`RequestContext`] into extensions.
///
/// Tries the bearer access token first, then the API key. Both failing is a
/// 401 with the request id attached.
pub async fn auth_middleware(
    State(state): State<ContextState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .map(str::to_string);

    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .map(str::to_string);

    let mut context = None;
    if let Some(token) = bearer.as_deref() {
        context = try_jwt_auth(&state, token)
            .await
            .map_err(|e| e.with_request_id(&request_id))?;
    }
    if context.is_none() {
        if let Some(key) = api_key.as_deref() {
            context = try_api_key_auth(&state, key)
                .await
                .map_err(|e| e.with_request_id(&request_id))?;
        }
    }

    let mut context = context.ok_or_else(|| {
        ApiError::authentication("Authentication required").with_request_id(&request_id)
    })?;
    context.request_id = request_id;

    tracing::debug!(
        request_id = %context.request_id,
        org_id = %context.org_id,
        auth_method = ?context.auth_method,
        "Request context established"
    );

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remembr_core::{EntityIdType, ScopeLevel};

    fn ctx(user: Option<UserId>, agent: Option<AgentId>) -> RequestContext {
        RequestContext {
            request_id: "req-1".to_string(),
            org_id: OrgId::new_v4(),
            user_id: user,
            agent_id: agent,
            auth_method: AuthMethod::ApiKey,
        }
    }

    #[test]
    fn test_scope_levels_follow_identity() {
        let org_ctx = ctx(None, None);
        assert_eq!(org_ctx.scope().expect("valid").level, ScopeLevel::Org);

        let user_ctx = ctx(Some(UserId::new_v4()), None);
        assert_eq!(user_ctx.scope().expect("valid").level, ScopeLevel::User);

        let agent_ctx = ctx(Some(UserId::new_v4()), Some(AgentId::new_v4()));
        let scope = agent_ctx.scope().expect("valid");
        assert_eq!(scope.level, ScopeLevel::Agent);
        assert!(scope.agent_id.is_some());
        assert!(scope.user_id.is_some());
    }

    #[test]
    fn test_agent_without_user_is_rejected() {
        let broken = ctx(None, Some(AgentId::new_v4()));
        assert!(broken.scope().is_err());
    }

    #[test]
    fn test_require_org_level() {
        assert!(ctx(None, None).require_org_level().is_ok());

        let err = ctx(Some(UserId::new_v4()), None)
            .require_org_level()
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::AuthorizationError);
        assert_eq!(
            err.details,
            Some(serde_json::json!({"code": "ORG_LEVEL_REQUIRED"}))
        );
        assert_eq!(err.request_id.as_deref(), Some("req-1"));
    }
}
