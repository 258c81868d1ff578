//! Episode persistence and scoped retrieval.

use remembr_core::enums::role;
use remembr_core::{
    AgentId, EntityIdType, Episode, EpisodeId, MemoryScope, OrgId, SessionId, TeamId, Timestamp,
    UserId,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::repo::{predicate_params, readable_predicate};

const EPISODE_COLUMNS: &str =
    "id, org_id, team_id, user_id, agent_id, session_id, role, content, tags, metadata, created_at";

pub(crate) fn episode_from_row(row: &Row) -> Episode {
    Episode {
        episode_id: EpisodeId::new(row.get("id")),
        org_id: OrgId::new(row.get("org_id")),
        team_id: row.get::<_, Option<Uuid>>("team_id").map(TeamId::new),
        user_id: row.get::<_, Option<Uuid>>("user_id").map(UserId::new),
        agent_id: row.get::<_, Option<Uuid>>("agent_id").map(AgentId::new),
        session_id: row.get::<_, Option<Uuid>>("session_id").map(SessionId::new),
        role: row.get("role"),
        content: row.get("content"),
        tags: row
            .get::<_, Option<Vec<String>>>("tags")
            .unwrap_or_default(),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    }
}

/// Optional filters for episode listing.
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub session_id: Option<SessionId>,
    pub tags: Option<Vec<String>>,
    pub role: Option<String>,
    pub from_time: Option<Timestamp>,
    pub to_time: Option<Timestamp>,
    /// Ascending creation order (replay, diff); descending otherwise.
    pub ascending: bool,
    pub limit: i64,
    pub offset: i64,
}

impl EpisodeFilter {
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

/// Persist a new episode in the provided scope.
pub async fn log_episode<C: GenericClient>(
    client: &C,
    scope: &MemoryScope,
    episode_role: &str,
    content: &str,
    tags: &[String],
    metadata: Option<&serde_json::Value>,
    session_id: Option<SessionId>,
) -> ApiResult<Episode> {
    let row = client
        .query_one(
            &format!(
                "INSERT INTO episodes \
                 (org_id, team_id, user_id, agent_id, session_id, role, content, tags, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 RETURNING {EPISODE_COLUMNS}"
            ),
            &[
                &scope.org_id.as_uuid(),
                &scope.team_id.map(|id| id.as_uuid()),
                &scope.user_id.map(|id| id.as_uuid()),
                &scope.agent_id.map(|id| id.as_uuid()),
                &session_id.map(|id| id.as_uuid()),
                &episode_role,
                &content,
                &tags,
                &metadata,
            ],
        )
        .await?;

    Ok(episode_from_row(&row))
}

/// Get an episode by id if it is readable from the provided scope.
pub async fn get_episode<C: GenericClient>(
    client: &C,
    episode_id: EpisodeId,
    scope: &MemoryScope,
) -> ApiResult<Option<Episode>> {
    let pred = readable_predicate(scope, "", 2);
    let sql = format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = $1 AND {}", pred.sql);

    let episode_uuid = episode_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&episode_uuid];
    params.extend(predicate_params(&pred));

    let row = client.query_opt(&sql, &params).await?;
    Ok(row.as_ref().map(episode_from_row))
}

/// Get an episode by id only when its scope tuple matches exactly.
/// Mutations pin to the most specific scope instead of inheriting.
pub async fn get_episode_in_exact_scope<C: GenericClient>(
    client: &C,
    episode_id: EpisodeId,
    scope: &MemoryScope,
) -> ApiResult<Option<Episode>> {
    let pred = scope.to_exact_predicate("", 2);
    let sql = format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = $1 AND {}", pred.sql);

    let episode_uuid = episode_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&episode_uuid];
    params.extend(predicate_params(&pred));

    let row = client.query_opt(&sql, &params).await?;
    Ok(row.as_ref().map(episode_from_row))
}

/// List episodes readable from the scope with optional session/tag/role/time
/// filtering.
///
/// The scope predicate is applied before every other filter; the tag filter
/// is set-overlap, and the time range is inclusive on both ends.
pub async fn list_episodes<C: GenericClient>(
    client: &C,
    scope: &MemoryScope,
    filter: &EpisodeFilter,
) -> ApiResult<Vec<Episode>> {
    let pred = readable_predicate(scope, "", 1);
    let mut sql = format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE {}", pred.sql);
    let mut params: Vec<&(dyn ToSql + Sync)> = predicate_params(&pred);
    let mut next = params.len() + 1;

    let session_uuid = filter.session_id.map(|id| id.as_uuid());
    if let Some(ref session) = session_uuid {
        sql.push_str(&format!(" AND session_id = ${}", next));
        params.push(session);
        next += 1;
    }
    if let Some(ref tags) = filter.tags {
        if !tags.is_empty() {
            sql.push_str(&format!(" AND tags && ${}", next));
            params.push(tags);
            next += 1;
        }
    }
    if let Some(ref episode_role) = filter.role {
        sql.push_str(&format!(" AND role = ${}", next));
        params.push(episode_role);
        next += 1;
    }
    if let Some(ref from_time) = filter.from_time {
        sql.push_str(&format!(" AND created_at >= ${}", next));
        params.push(from_time);
        next += 1;
    }
    if let Some(ref to_time) = filter.to_time {
        sql.push_str(&format!(" AND created_at <= ${}", next));
        params.push(to_time);
        next += 1;
    }

    let order = if filter.ascending { "ASC" } else { "DESC" };
    sql.push_str(&format!(
        " ORDER BY created_at {order} LIMIT ${} OFFSET ${}",
        next,
        next + 1
    ));
    params.push(&filter.limit);
    params.push(&filter.offset);

    let rows = client.query(&sql, &params).await?;
    Ok(rows.iter().map(episode_from_row).collect())
}

/// Count episodes readable from the provided scope.
pub async fn count_episodes<C: GenericClient>(
    client: &C,
    scope: &MemoryScope,
) -> ApiResult<i64> {
    let pred = readable_predicate(scope, "", 1);
    let sql = format!("SELECT COUNT(*) FROM episodes WHERE {}", pred.sql);
    let row = client.query_one(&sql, &predicate_params(&pred)).await?;
    Ok(row.get(0))
}

/// Delete an episode if it exists in scope; silent no-op when absent.
/// Returns true when a row was removed.
pub async fn delete_episode<C: GenericClient>(
    client: &C,
    episode_id: EpisodeId,
    scope: &MemoryScope,
) -> ApiResult<bool> {
    let pred = scope.to_exact_predicate("", 2);
    let sql = format!("DELETE FROM episodes WHERE id = $1 AND {}", pred.sql);

    let episode_uuid = episode_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&episode_uuid];
    params.extend(predicate_params(&pred));

    let deleted = client.execute(&sql, &params).await?;
    Ok(deleted > 0)
}

/// Get a checkpoint episode for a session, verifying scope and role.
pub async fn get_checkpoint<C: GenericClient>(
    client: &C,
    checkpoint_id: EpisodeId,
    session_id: SessionId,
    scope: &MemoryScope,
) -> ApiResult<Option<Episode>> {
    let pred = scope.to_exact_predicate("", 3);
    let sql = format!(
        "SELECT {EPISODE_COLUMNS} FROM episodes \
         WHERE id = $1 AND session_id = $2 AND role = '{}' AND {}",
        role::CHECKPOINT,
        pred.sql
    );

    let checkpoint_uuid = checkpoint_id.as_uuid();
    let session_uuid = session_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&checkpoint_uuid, &session_uuid];
    params.extend(predicate_params(&pred));

    let row = client.query_opt(&sql, &params).await?;
    Ok(row.as_ref().map(episode_from_row))
}

/// List checkpoint episodes for a session, newest first.
pub async fn list_checkpoints<C: GenericClient>(
    client: &C,
    session_id: SessionId,
    scope: &MemoryScope,
) -> ApiResult<Vec<Episode>> {
    let pred = scope.to_exact_predicate("", 2);
    let sql = format!(
        "SELECT {EPISODE_COLUMNS} FROM episodes \
         WHERE session_id = $1 AND role = '{}' AND {} \
         ORDER BY created_at DESC",
        role::CHECKPOINT,
        pred.sql
    );

    let session_uuid = session_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&session_uuid];
    params.extend(predicate_params(&pred));

    let rows = client.query(&sql, &params).await?;
    Ok(rows.iter().map(episode_from_row).collect())
}

/// Count episodes for a session within scope, with optional time bounds.
pub async fn count_session_episodes<C: GenericClient>(
    client: &C,
    session_id: SessionId,
    scope: &MemoryScope,
    from_time: Option<Timestamp>,
    to_time: Option<Timestamp>,
) -> ApiResult<i64> {
    let pred = scope.to_exact_predicate("", 2);
    let mut sql = format!(
        "SELECT COUNT(*) FROM episodes WHERE session_id = $1 AND {}",
        pred.sql
    );

    let session_uuid = session_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&session_uuid];
    params.extend(predicate_params(&pred));
    let mut next = params.len() + 1;

    if let Some(ref from) = from_time {
        sql.push_str(&format!(" AND created_at >= ${}", next));
        params.push(from);
        next += 1;
    }
    if let Some(ref to) = to_time {
        sql.push_str(&format!(" AND created_at <= ${}", next));
        params.push(to);
    }

    let row = client.query_one(&sql, &params).await?;
    Ok(row.get(0))
}
