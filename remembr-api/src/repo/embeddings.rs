//! Embedding persistence and vector search.
//!
//! Vector search uses pgvector's `<=>` cosine-distance operator;
//! `similarity = 1 - distance`. Embedding rows duplicate the owning
//! episode's `org_id` so the tenant guard applies without a join.

use pgvector::Vector;
use remembr_core::{EntityIdType, Episode, EpisodeId, MemoryScope, OrgId, SessionId, Timestamp};
use tokio_postgres::types::ToSql;
use tokio_postgres::GenericClient;

use crate::error::ApiResult;
use crate::repo::episodes::episode_from_row;
use crate::repo::{predicate_params, readable_predicate};

/// Store an embedding for an episode.
pub async fn insert_embedding<C: GenericClient>(
    client: &C,
    org_id: OrgId,
    episode_id: EpisodeId,
    content: &str,
    model: &str,
    vector: &[f32],
) -> ApiResult<()> {
    let dimensions = vector.len() as i32;
    client
        .execute(
            "INSERT INTO embeddings (org_id, episode_id, content, model, dimensions, vector) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &org_id.as_uuid(),
                &episode_id.as_uuid(),
                &content,
                &model,
                &dimensions,
                &Vector::from(vector.to_vec()),
            ],
        )
        .await?;
    Ok(())
}

/// An episode paired with its vector similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredEpisode {
    pub episode: Episode,
    pub similarity_score: f64,
}

/// Nearest-neighbor search over scope-filtered embeddings.
///
/// Returns `(episode, similarity)` pairs ordered by distance; rows below
/// `score_threshold` are filtered out after the scan, mirroring the
/// threshold-after-ranking contract of the semantic search mode.
pub async fn search_similar<C: GenericClient>(
    client: &C,
    scope: &MemoryScope,
    query_vector: &[f32],
    limit: i64,
    score_threshold: f64,
) -> ApiResult<Vec<ScoredEpisode>> {
    let pred = readable_predicate(scope, "e.", 3);
    let sql = format!(
        "SELECT e.id, e.org_id, e.team_id, e.user_id, e.agent_id, e.session_id, \
                e.role, e.content, e.tags, e.metadata, e.created_at, \
                1 - (emb.vector <=> $1) AS similarity \
         FROM embeddings emb \
         JOIN episodes e ON e.id = emb.episode_id \
         WHERE emb.org_id = $2 AND {} \
         ORDER BY emb.vector <=> $1 \
         LIMIT ${}",
        pred.sql,
        pred.params.len() + 3
    );

    let vector = Vector::from(query_vector.to_vec());
    let org_uuid = scope.org_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&vector, &org_uuid];
    params.extend(predicate_params(&pred));
    params.push(&limit);

    let rows = client.query(&sql, &params).await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let similarity: f64 = row.get("similarity");
            if similarity < score_threshold {
                return None;
            }
            Some(ScoredEpisode {
                episode: episode_from_row(row),
                similarity_score: similarity,
            })
        })
        .collect())
}

/// Filters applied at the storage layer by hybrid search.
#[derive(Debug, Clone, Default)]
pub struct HybridFilter {
    pub session_id: Option<SessionId>,
    pub tags: Option<Vec<String>>,
    pub role: Option<String>,
    pub from_time: Option<Timestamp>,
    pub to_time: Option<Timestamp>,
}

/// Vector search combined with storage-layer metadata filters.
///
/// Rows must both rank within the nearest `limit` and pass every filter;
/// the score threshold is applied afterwards like in `search_similar`.
pub async fn search_hybrid<C: GenericClient>(
    client: &C,
    scope: &MemoryScope,
    query_vector: &[f32],
    filter: &HybridFilter,
    limit: i64,
    score_threshold: f64,
) -> ApiResult<Vec<ScoredEpisode>> {
    let pred = readable_predicate(scope, "e.", 3);
    let mut sql = format!(
        "SELECT e.id, e.org_id, e.team_id, e.user_id, e.agent_id, e.session_id, \
                e.role, e.content, e.tags, e.metadata, e.created_at, \
                1 - (emb.vector <=> $1) AS similarity \
         FROM embeddings emb \
         JOIN episodes e ON e.id = emb.episode_id \
         WHERE emb.org_id = $2 AND {}",
        pred.sql
    );

    let vector = Vector::from(query_vector.to_vec());
    let org_uuid = scope.org_id.as_uuid();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&vector, &org_uuid];
    params.extend(predicate_params(&pred));
    let mut next = params.len() + 1;

    let session_uuid = filter.session_id.map(|id| id.as_uuid());
    if let Some(ref session) = session_uuid {
        sql.push_str(&format!(" AND e.session_id = ${}", next));
        params.push(session);
        next += 1;
    }
    if let Some(ref tags) = filter.tags {
        if !tags.is_empty() {
            sql.push_str(&format!(" AND e.tags && ${}", next));
            params.push(tags);
            next += 1;
        }
    }
    if let Some(ref episode_role) = filter.role {
        sql.push_str(&format!(" AND e.role = ${}", next));
        params.push(episode_role);
        next += 1;
    }
    if let Some(ref from_time) = filter.from_time {
        sql.push_str(&format!(" AND e.created_at >= ${}", next));
        params.push(from_time);
        next += 1;
    }
    if let Some(ref to_time) = filter.to_time {
        sql.push_str(&format!(" AND e.created_at <= ${}", next));
        params.push(to_time);
        next += 1;
    }

    sql.push_str(&format!(" ORDER BY emb.vector <=> $1 LIMIT ${}", next));
    params.push(&limit);

    let rows = client.query(&sql, &params).await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let similarity: f64 = row.get("similarity");
            if similarity < score_threshold {
                return None;
            }
            Some(ScoredEpisode {
                episode: episode_from_row(row),
                similarity_score: similarity,
            })
        })
        .collect())
}

/// Delete embeddings owned by one episode. Returns deleted row count.
pub async fn delete_for_episode<C: GenericClient>(
    client: &C,
    episode_id: EpisodeId,
) -> ApiResult<u64> {
    let deleted = client
        .execute(
            "DELETE FROM embeddings WHERE episode_id = $1",
            &[&episode_id.as_uuid()],
        )
        .await?;
    Ok(deleted)
}

/// Delete embeddings owned by every episode of a session.
pub async fn delete_for_session<C: GenericClient>(
    client: &C,
    session_id: SessionId,
) -> ApiResult<u64> {
    let deleted = client
        .execute(
            "DELETE FROM embeddings WHERE episode_id IN \
             (SELECT id FROM episodes WHERE session_id = $1)",
            &[&session_id.as_uuid()],
        )
        .await?;
    Ok(deleted)
}

/// Delete embeddings owned by a user's episodes within an organization.
pub async fn delete_for_user<C: GenericClient>(
    client: &C,
    org_id: OrgId,
    user_id: remembr_core::UserId,
) -> ApiResult<u64> {
    let deleted = client
        .execute(
            "DELETE FROM embeddings WHERE org_id = $1 AND episode_id IN \
             (SELECT id FROM episodes WHERE org_id = $1 AND user_id = $2)",
            &[&org_id.as_uuid(), &user_id.as_uuid()],
        )
        .await?;
    Ok(deleted)
}
