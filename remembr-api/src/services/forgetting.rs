//! Forgetting service: transactional erasure with an invariant audit trail.
//!
//! Every cascade runs in a single storage transaction covering the scope
//! verification and all dependent mutations. Audit rows are written on an
//! independent connection so a rollback never erases the attempt record;
//! audit writes that themselves fail are logged but never fail the parent
//! operation.

use remembr_core::{
    AuditAction, AuditStatus, EntityIdType, EpisodeId, MemoryScope, OrgId, SessionId, UserId,
};

use remembr_cache::{make_key, CacheService};

use crate::db::{scoped_tx, DbClient};
use crate::error::ApiResult;
use crate::repo;
use crate::repo::audit::AuditRecord;

/// Counts returned by a user-wide erasure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDeleteResult {
    pub deleted_episodes: i64,
    pub deleted_sessions: i64,
}

/// Service for episode/session/user erasure workflows.
#[derive(Clone)]
pub struct ForgettingService {
    db: DbClient,
    cache: CacheService,
}

impl ForgettingService {
    pub fn new(db: DbClient, cache: CacheService) -> Self {
        Self { db, cache }
    }

    /// Write one audit row on its own connection. Failures are logged only.
    async fn write_audit(&self, record: AuditRecord<'_>) {
        let conn = match self.db.get_conn().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(action = record.action.as_str(), error = %e, "Failed to acquire audit connection");
                return;
            }
        };
        if let Err(e) = repo::audit::write_audit(&**conn, &record).await {
            tracing::error!(action = record.action.as_str(), error = %e, "Failed to persist audit log");
        }
    }

    /// Erase one episode and its embeddings. Returns whether it was found.
    pub async fn delete_episode(
        &self,
        episode_id: EpisodeId,
        scope: &MemoryScope,
        request_id: &str,
        actor_user_id: Option<UserId>,
    ) -> ApiResult<bool> {
        let result = self.delete_episode_tx(episode_id, scope).await;

        match result {
            Ok(false) => Ok(false),
            Ok(true) => {
                self.write_audit(AuditRecord {
                    org_id: Some(scope.org_id),
                    actor_user_id,
                    action: AuditAction::DeleteEpisode,
                    status: AuditStatus::Success,
                    target_type: "episode",
                    target_id: Some(episode_id.to_string()),
                    request_id,
                    details: None,
                    error_message: None,
                })
                .await;
                Ok(true)
            }
            Err(e) => {
                self.write_audit(AuditRecord {
                    org_id: Some(scope.org_id),
                    actor_user_id,
                    action: AuditAction::DeleteEpisode,
                    status: AuditStatus::Failed,
                    target_type: "episode",
                    target_id: Some(episode_id.to_string()),
                    request_id,
                    details: None,
                    error_message: Some(e.to_string()),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn delete_episode_tx(
        &self,
        episode_id: EpisodeId,
        scope: &MemoryScope,
    ) -> ApiResult<bool> {
        let mut conn = self.db.get_conn().await?;
        let tx = scoped_tx(&mut conn, scope.org_id).await?;

        let episode = repo::episodes::get_episode_in_exact_scope(&*tx, episode_id, scope).await?;
        if episode.is_none() {
            return Ok(false);
        }

        repo::embeddings::delete_for_episode(&*tx, episode_id).await?;
        tx.execute(
            "DELETE FROM episodes WHERE id = $1",
            &[&episode_id.as_uuid()],
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Erase all episodes of a session (with embeddings) and invalidate the
    /// session's short-term window. Returns the deleted episode count; a
    /// session outside scope deletes nothing.
    pub async fn delete_session_memories(
        &self,
        session_id: SessionId,
        scope: &MemoryScope,
        request_id: &str,
        actor_user_id: Option<UserId>,
    ) -> ApiResult<i64> {
        let result = self.delete_session_tx(session_id, scope).await;

        match result {
            Ok(None) => Ok(0),
            Ok(Some(deleted_count)) => {
                // The window cache is non-transactional; invalidate after
                // the mutation commits.
                self.cache
                    .delete(&make_key(
                        "short_term",
                        &[&session_id.to_string(), "window"],
                    ))
                    .await;

                self.write_audit(AuditRecord {
                    org_id: Some(scope.org_id),
                    actor_user_id,
                    action: AuditAction::DeleteSessionMemories,
                    status: AuditStatus::Success,
                    target_type: "session",
                    target_id: Some(session_id.to_string()),
                    request_id,
                    details: Some(serde_json::json!({ "deleted_count": deleted_count })),
                    error_message: None,
                })
                .await;
                Ok(deleted_count)
            }
            Err(e) => {
                self.write_audit(AuditRecord {
                    org_id: Some(scope.org_id),
                    actor_user_id,
                    action: AuditAction::DeleteSessionMemories,
                    status: AuditStatus::Failed,
                    target_type: "session",
                    target_id: Some(session_id.to_string()),
                    request_id,
                    details: None,
                    error_message: Some(e.to_string()),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn delete_session_tx(
        &self,
        session_id: SessionId,
        scope: &MemoryScope,
    ) -> ApiResult<Option<i64>> {
        let mut conn = self.db.get_conn().await?;
        let tx = scoped_tx(&mut conn, scope.org_id).await?;

        let session = repo::sessions::get_session(&*tx, session_id, scope).await?;
        if session.is_none() {
            return Ok(None);
        }

        let count_row = tx
            .query_one(
                "SELECT COUNT(*) FROM episodes WHERE session_id = $1",
                &[&session_id.as_uuid()],
            )
            .await?;
        let deleted_count: i64 = count_row.get(0);

        repo::embeddings::delete_for_session(&*tx, session_id).await?;
        tx.execute(
            "DELETE FROM episodes WHERE session_id = $1",
            &[&session_id.as_uuid()],
        )
        .await?;
        tx.commit().await?;

        Ok(Some(deleted_count))
    }

    /// Erase every episode and session a user owns within an organization.
    ///
    /// Privileged: routes must enforce org-level authority before calling.
    /// Exactly one `attempt` audit row is written before the mutation, and
    /// exactly one of `success`/`failed` after.
    pub async fn delete_user_memories(
        &self,
        user_id: UserId,
        org_id: OrgId,
        request_id: &str,
        actor_user_id: Option<UserId>,
    ) -> ApiResult<UserDeleteResult> {
        self.write_audit(AuditRecord {
            org_id: Some(org_id),
            actor_user_id,
            action: AuditAction::DeleteUserMemories,
            status: AuditStatus::Attempt,
            target_type: "user",
            target_id: Some(user_id.to_string()),
            request_id,
            details: None,
            error_message: None,
        })
        .await;

        let result = self.delete_user_tx(user_id, org_id).await;

        match result {
            Ok(counts) => {
                self.write_audit(AuditRecord {
                    org_id: Some(org_id),
                    actor_user_id,
                    action: AuditAction::DeleteUserMemories,
                    status: AuditStatus::Success,
                    target_type: "user",
                    target_id: Some(user_id.to_string()),
                    request_id,
                    details: Some(serde_json::json!({
                        "deleted_episodes": counts.deleted_episodes,
                        "deleted_sessions": counts.deleted_sessions,
                    })),
                    error_message: None,
                })
                .await;
                Ok(counts)
            }
            Err(e) => {
                self.write_audit(AuditRecord {
                    org_id: Some(org_id),
                    actor_user_id,
                    action: AuditAction::DeleteUserMemories,
                    status: AuditStatus::Failed,
                    target_type: "user",
                    target_id: Some(user_id.to_string()),
                    request_id,
                    details: None,
                    error_message: Some(e.to_string()),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn delete_user_tx(&self, user_id: UserId, org_id: OrgId) -> ApiResult<UserDeleteResult> {
        let mut conn = self.db.get_conn().await?;
        let tx = scoped_tx(&mut conn, org_id).await?;

        let session_ids = repo::sessions::user_session_ids(&*tx, org_id, user_id).await?;
        let deleted_sessions = session_ids.len() as i64;

        let count_row = tx
            .query_one(
                "SELECT COUNT(*) FROM episodes WHERE org_id = $1 AND user_id = $2",
                &[&org_id.as_uuid(), &user_id.as_uuid()],
            )
            .await?;
        let deleted_episodes: i64 = count_row.get(0);

        if !session_ids.is_empty() {
            let session_uuids: Vec<uuid::Uuid> =
                session_ids.iter().map(|id| id.as_uuid()).collect();
            tx.execute(
                "DELETE FROM embeddings WHERE episode_id IN \
                 (SELECT id FROM episodes WHERE session_id = ANY($1))",
                &[&session_uuids],
            )
            .await?;
        }

        repo::embeddings::delete_for_user(&*tx, org_id, user_id).await?;
        tx.execute(
            "DELETE FROM episodes WHERE org_id = $1 AND user_id = $2",
            &[&org_id.as_uuid(), &user_id.as_uuid()],
        )
        .await?;
        tx.execute(
            "DELETE FROM sessions WHERE org_id = $1 AND user_id = $2",
            &[&org_id.as_uuid(), &user_id.as_uuid()],
        )
        .await?;
        tx.commit().await?;

        Ok(UserDeleteResult {
            deleted_episodes,
            deleted_sessions,
        })
    }
}
