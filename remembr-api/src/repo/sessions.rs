//! Session persistence and scoped lookup.

use std::collections::HashMap;

use remembr_core::{
    AgentId, EntityIdType, MemoryScope, OrgId, Session, SessionId, TeamId, UserId,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::repo::predicate_params;

const SESSION_COLUMNS: &str =
    "id, org_id, team_id, user_id, agent_id, metadata, created_at, updated_at, expires_at";

fn session_from_row(row: &Row) -> Session {
    Session {
        session_id: SessionId::new(row.get("id")),
        org_id: OrgId::new(row.get("org_id")),
        team_id: row.get::<_, Option<Uuid>>("team_id").map(TeamId::new),
        user_id: row.get::<_, Option<Uuid>>("user_id").map(UserId::new),
        agent_id: row.get::<_, Option<Uuid>>("agent_id").map(AgentId::new),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        expires_at: row.get("expires_at"),
    }
}

/// Create a session pinned to the writable scope.
/// The scope tuple is immutable after creation.
pub async fn create_session<C: GenericClient>(
    client: &C,
    scope: &MemoryScope,
    metadata: Option<&serde_json::Value>,
) -> ApiResult<Session> {
    let row = client
        .query_one(
            &format!(
                "INSERT INTO sessions (org_id, team_id, user_id, agent_id, metadata) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {SESSION_COLUMNS}"
            ),
            &[
                &scope.org_id.as_uuid(),
                &scope.team_id.map(|id| id.as_uuid()),
                &scope.user_id.map(|id| id.as_uuid()),
                &scope.agent_id.map(|id| id.as_uuid()),
                &metadata,
            ],
        )
        .await?;

    Ok(session_from_row(&row))
}

/// Get a session by id if it belongs to the provided scope.
pub async fn get_session<C: GenericClient>(
    client: &C,
    session_id: SessionId,
    scope: &MemoryScope,
) -> ApiResult<Option<Session>> {
    let pred = scope.to_exact_predicate("", 2);
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 AND {}", pred.sql);

    let session_uuid = session_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&session_uuid];
    params.extend(predicate_params(&pred));

    let row = client.query_opt(&sql, &params).await?;
    Ok(row.as_ref().map(session_from_row))
}

/// List sessions in scope, most recently updated first.
pub async fn list_sessions<C: GenericClient>(
    client: &C,
    scope: &MemoryScope,
    limit: i64,
    offset: i64,
) -> ApiResult<Vec<Session>> {
    let pred = scope.to_exact_predicate("", 1);
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE {} \
         ORDER BY updated_at DESC LIMIT ${} OFFSET ${}",
        pred.sql,
        pred.params.len() + 1,
        pred.params.len() + 2
    );

    let mut params: Vec<&(dyn ToSql + Sync)> = predicate_params(&pred);
    params.push(&limit);
    params.push(&offset);

    let rows = client.query(&sql, &params).await?;
    Ok(rows.iter().map(session_from_row).collect())
}

/// Count sessions in scope.
pub async fn count_sessions<C: GenericClient>(client: &C, scope: &MemoryScope) -> ApiResult<i64> {
    let pred = scope.to_exact_predicate("", 1);
    let sql = format!("SELECT COUNT(*) FROM sessions WHERE {}", pred.sql);
    let row = client.query_one(&sql, &predicate_params(&pred)).await?;
    Ok(row.get(0))
}

/// Per-session episode counts for the given sessions, scope-filtered.
pub async fn session_episode_counts<C: GenericClient>(
    client: &C,
    scope: &MemoryScope,
    session_ids: &[SessionId],
) -> ApiResult<HashMap<SessionId, i64>> {
    if session_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let pred = scope.to_exact_predicate("", 2);
    let sql = format!(
        "SELECT session_id, COUNT(*) FROM episodes \
         WHERE session_id = ANY($1) AND {} GROUP BY session_id",
        pred.sql
    );

    let uuids: Vec<Uuid> = session_ids.iter().map(|id| id.as_uuid()).collect();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&uuids];
    params.extend(predicate_params(&pred));

    let rows = client.query(&sql, &params).await?;
    Ok(rows
        .iter()
        .map(|row| {
            (
                SessionId::new(row.get::<_, Uuid>(0)),
                row.get::<_, i64>(1),
            )
        })
        .collect())
}

/// Session ids belonging to a user within an organization.
pub async fn user_session_ids<C: GenericClient>(
    client: &C,
    org_id: OrgId,
    user_id: UserId,
) -> ApiResult<Vec<SessionId>> {
    let rows = client
        .query(
            "SELECT id FROM sessions WHERE org_id = $1 AND user_id = $2",
            &[&org_id.as_uuid(), &user_id.as_uuid()],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|row| SessionId::new(row.get::<_, Uuid>(0)))
        .collect())
}
