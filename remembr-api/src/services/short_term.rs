//! Short-term session memory over the cache, with checkpoint/restore
//! persisted as episodes.
//!
//! Each session owns one window blob at `remembr:short_term:<id>:window`,
//! replaced atomically (delete+setex in a single pipeline) on every change,
//! so the persisted state is always the output of a single `add_message`.
//! Concurrent writers to the same session are last-writer-wins; callers that
//! need per-session linearization supply their own queue. Cache failures on
//! read degrade to an empty context; failures on write surface to the
//! caller.

use remembr_cache::{make_key, CacheService, SHORT_TERM_TTL};
use remembr_core::window::{compress_to_target, compress_window, total_tokens};
use remembr_core::{
    enums::role, Episode, EpisodeId, MemoryScope, ScopeResolver, Session, SessionId, WindowMessage,
};
use serde::Serialize;
use tokio_postgres::GenericClient;

use crate::error::{ApiError, ApiResult};
use crate::repo;

/// Token utilization of a session's live window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenUsage {
    pub used: i64,
    pub max: i32,
    pub percentage: f64,
}

/// Auto-checkpoint fires only strictly above the threshold fraction of the
/// budget; exactly at the threshold does not fire.
fn over_threshold(used: i64, max_tokens: i32, threshold: f64) -> bool {
    used as f64 > threshold * f64::from(max_tokens)
}

/// Build the scope a session's episodes must carry: the session's own tuple
/// at its most specific level.
pub fn scope_of_session(session: &Session) -> MemoryScope {
    let base = MemoryScope {
        org_id: session.org_id,
        team_id: session.team_id,
        user_id: session.user_id,
        agent_id: session.agent_id,
        level: remembr_core::ScopeLevel::Org,
    };
    ScopeResolver::resolve_writable_scope(&base)
}

/// Manage short-term conversational context for sessions.
#[derive(Clone)]
pub struct ShortTermMemory {
    cache: CacheService,
    max_tokens: i32,
    auto_checkpoint_threshold: f64,
}

impl ShortTermMemory {
    pub fn new(cache: CacheService, max_tokens: i32, auto_checkpoint_threshold: f64) -> Self {
        Self {
            cache,
            max_tokens,
            auto_checkpoint_threshold,
        }
    }

    pub fn max_tokens(&self) -> i32 {
        self.max_tokens
    }

    fn window_key(session_id: SessionId) -> String {
        make_key("short_term", &[&session_id.to_string(), "window"])
    }

    async fn require_session<C: GenericClient>(
        &self,
        client: &C,
        session_id: SessionId,
        scope: &MemoryScope,
    ) -> ApiResult<Session> {
        repo::sessions::get_session(client, session_id, scope)
            .await?
            .ok_or_else(ApiError::session_not_found)
    }

    /// Load the current window; absent or failing cache yields an empty
    /// context.
    pub async fn get_context(&self, session_id: SessionId) -> Vec<WindowMessage> {
        self.cache
            .get::<Vec<WindowMessage>>(&Self::window_key(session_id))
            .await
            .unwrap_or_default()
    }

    /// Append a message to the sliding window, compressing to the token
    /// budget, and persist the result atomically.
    pub async fn add_message(
        &self,
        session_id: SessionId,
        mut message: WindowMessage,
    ) -> ApiResult<()> {
        message.ensure_scored();

        let mut current = self.get_context(session_id).await;
        current.push(message);
        let compressed = compress_window(current, self.max_tokens);

        self.cache
            .swap(&Self::window_key(session_id), &compressed, SHORT_TERM_TTL)
            .await?;
        Ok(())
    }

    /// Token utilization for the active window.
    pub async fn token_usage(&self, session_id: SessionId) -> TokenUsage {
        let messages = self.get_context(session_id).await;
        let used = total_tokens(&messages);
        let percentage = if self.max_tokens > 0 {
            let pct = used as f64 / f64::from(self.max_tokens) * 100.0;
            (pct * 100.0).round() / 100.0
        } else {
            0.0
        };
        TokenUsage {
            used,
            max: self.max_tokens,
            percentage,
        }
    }

    /// Persist the current window as a checkpoint episode.
    ///
    /// The session lookup and the episode insert run on the same client so
    /// callers can wrap both in one transaction. The episode's scope tuple is
    /// the session's own tuple.
    pub async fn checkpoint<C: GenericClient>(
        &self,
        client: &C,
        session_id: SessionId,
        scope: &MemoryScope,
    ) -> ApiResult<EpisodeId> {
        let session = self.require_session(client, session_id, scope).await?;
        let messages = self.get_context(session_id).await;

        let payload = serde_json::to_string(&messages)?;
        let metadata = serde_json::json!({
            "checkpoint": true,
            "message_count": messages.len(),
        });

        let episode = repo::episodes::log_episode(
            client,
            &scope_of_session(&session),
            role::CHECKPOINT,
            &payload,
            &[],
            Some(&metadata),
            Some(session_id),
        )
        .await?;

        tracing::info!(
            %session_id,
            checkpoint_id = %episode.episode_id,
            message_count = messages.len(),
            "Short-term checkpoint created"
        );
        Ok(episode.episode_id)
    }

    /// Replace the current window with the payload of a checkpoint episode.
    /// Returns the restored message count.
    pub async fn restore_from_checkpoint<C: GenericClient>(
        &self,
        client: &C,
        session_id: SessionId,
        checkpoint_id: EpisodeId,
        scope: &MemoryScope,
    ) -> ApiResult<usize> {
        self.require_session(client, session_id, scope).await?;

        let checkpoint = repo::episodes::get_checkpoint(client, checkpoint_id, session_id, scope)
            .await?
            .ok_or_else(ApiError::checkpoint_not_found)?;

        let messages: Vec<WindowMessage> = serde_json::from_str(&checkpoint.content)
            .map_err(remembr_core::CoreError::MalformedWindow)?;

        self.cache
            .swap(&Self::window_key(session_id), &messages, SHORT_TERM_TTL)
            .await?;

        tracing::info!(
            %session_id,
            %checkpoint_id,
            restored_count = messages.len(),
            "Short-term checkpoint restored"
        );
        Ok(messages.len())
    }

    /// List checkpoint episodes for a session, newest first.
    pub async fn list_checkpoints<C: GenericClient>(
        &self,
        client: &C,
        session_id: SessionId,
        scope: &MemoryScope,
    ) -> ApiResult<Vec<Episode>> {
        self.require_session(client, session_id, scope).await?;
        repo::episodes::list_checkpoints(client, session_id, scope).await
    }

    /// Checkpoint and shrink the window when usage strictly exceeds the
    /// threshold fraction of the budget.
    ///
    /// Returns the checkpoint id, or `None` when usage is at or below the
    /// threshold. After the snapshot the live window is compressed to 50% of
    /// the budget; the single highest-priority message survives even when it
    /// alone exceeds that target.
    pub async fn auto_checkpoint<C: GenericClient>(
        &self,
        client: &C,
        session_id: SessionId,
        scope: &MemoryScope,
    ) -> ApiResult<Option<EpisodeId>> {
        let usage = self.token_usage(session_id).await;
        if !over_threshold(usage.used, self.max_tokens, self.auto_checkpoint_threshold) {
            return Ok(None);
        }

        let checkpoint_id = self.checkpoint(client, session_id, scope).await?;

        let messages = self.get_context(session_id).await;
        let target_tokens = self.max_tokens / 2;
        let compressed = compress_to_target(messages, target_tokens);
        let compressed_tokens = total_tokens(&compressed);

        self.cache
            .swap(&Self::window_key(session_id), &compressed, SHORT_TERM_TTL)
            .await?;

        tracing::info!(
            %session_id,
            %checkpoint_id,
            original_tokens = usage.used,
            compressed_tokens,
            "Short-term auto-checkpoint complete"
        );
        Ok(Some(checkpoint_id))
    }

    /// Drop a session's window, e.g. when its memories are forgotten.
    pub async fn invalidate_window(&self, session_id: SessionId) -> bool {
        self.cache.delete(&Self::window_key(session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remembr_core::{AgentId, EntityIdType, OrgId, ScopeLevel, UserId};

    fn session(
        user_id: Option<UserId>,
        agent_id: Option<AgentId>,
    ) -> Session {
        Session {
            session_id: SessionId::new_v4(),
            org_id: OrgId::new_v4(),
            team_id: None,
            user_id,
            agent_id,
            metadata: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_scope_of_session_pins_most_specific_level() {
        let s = session(None, None);
        assert_eq!(scope_of_session(&s).level, ScopeLevel::Org);

        let s = session(Some(UserId::new_v4()), None);
        assert_eq!(scope_of_session(&s).level, ScopeLevel::User);

        let s = session(Some(UserId::new_v4()), Some(AgentId::new_v4()));
        let scope = scope_of_session(&s);
        assert_eq!(scope.level, ScopeLevel::Agent);
        assert_eq!(scope.org_id, s.org_id);
        assert_eq!(scope.user_id, s.user_id);
        assert_eq!(scope.agent_id, s.agent_id);
    }

    #[test]
    fn test_window_key_convention() {
        let session_id: SessionId = "550e8400-e29b-41d4-a716-446655440000"
            .parse()
            .expect("valid UUID");
        assert_eq!(
            ShortTermMemory::window_key(session_id),
            "remembr:short_term:550e8400-e29b-41d4-a716-446655440000:window"
        );
    }

    #[test]
    fn test_threshold_fires_strictly_above() {
        // Budget 4000, threshold 0.8 -> trips past 3200 tokens
        assert!(!over_threshold(3199, 4000, 0.8));
        assert!(!over_threshold(3200, 4000, 0.8));
        assert!(over_threshold(3201, 4000, 0.8));

        // Zero budget never fires
        assert!(!over_threshold(0, 0, 0.8));
    }
}
