//! Episodic memory service: append-only logging with asynchronous embedding
//! enrichment, and scoped retrieval over stored episodes.

use std::sync::Arc;

use remembr_core::{Episode, EpisodeId, MemoryScope, SessionId, Timestamp};
use tokio_postgres::GenericClient;

use crate::error::ApiResult;
use crate::repo;
use crate::repo::embeddings::{HybridFilter, ScoredEpisode};
use crate::repo::episodes::EpisodeFilter;
use crate::services::embedding::{EmbeddingClient, EmbeddingWorkerPool};

/// High-level episodic memory service.
#[derive(Clone)]
pub struct EpisodicMemory {
    embeddings: Arc<EmbeddingClient>,
    workers: EmbeddingWorkerPool,
}

impl EpisodicMemory {
    pub fn new(embeddings: Arc<EmbeddingClient>, workers: EmbeddingWorkerPool) -> Self {
        Self {
            embeddings,
            workers,
        }
    }

    /// Persist a new episode in the provided scope.
    ///
    /// Enrichment is not scheduled here: callers submit the episode through
    /// [`EpisodicMemory::schedule_enrichment`] after their transaction
    /// commits, so the background worker never races a rollback.
    pub async fn log<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        role: &str,
        content: &str,
        tags: &[String],
        metadata: Option<&serde_json::Value>,
        session_id: Option<SessionId>,
    ) -> ApiResult<Episode> {
        repo::episodes::log_episode(client, scope, role, content, tags, metadata, session_id).await
    }

    /// Queue best-effort embedding generation for a committed episode.
    pub fn schedule_enrichment(&self, episode: &Episode) {
        self.workers
            .submit(episode.episode_id, episode.content.clone());
    }

    /// Episodes whose tags overlap the provided set.
    pub async fn search_by_tags<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        tags: Vec<String>,
        limit: i64,
    ) -> ApiResult<Vec<Episode>> {
        let filter = EpisodeFilter {
            tags: Some(tags),
            ..EpisodeFilter::with_limit(limit)
        };
        repo::episodes::list_episodes(client, scope, &filter).await
    }

    /// Episodes constrained to a time range, newest first.
    pub async fn search_by_time<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        from_time: Option<Timestamp>,
        to_time: Option<Timestamp>,
        limit: i64,
    ) -> ApiResult<Vec<Episode>> {
        let filter = EpisodeFilter {
            from_time,
            to_time,
            ..EpisodeFilter::with_limit(limit)
        };
        repo::episodes::list_episodes(client, scope, &filter).await
    }

    /// Recent session episodes in descending creation order.
    pub async fn get_session_history<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        session_id: SessionId,
        limit: i64,
    ) -> ApiResult<Vec<Episode>> {
        let filter = EpisodeFilter {
            session_id: Some(session_id),
            ..EpisodeFilter::with_limit(limit)
        };
        repo::episodes::list_episodes(client, scope, &filter).await
    }

    /// Full session transcript, oldest first.
    pub async fn replay_session<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        session_id: SessionId,
    ) -> ApiResult<Vec<Episode>> {
        let filter = EpisodeFilter {
            session_id: Some(session_id),
            ascending: true,
            ..EpisodeFilter::with_limit(10_000)
        };
        repo::episodes::list_episodes(client, scope, &filter).await
    }

    /// Get an episode in scope.
    pub async fn get<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        episode_id: EpisodeId,
    ) -> ApiResult<Option<Episode>> {
        repo::episodes::get_episode(client, episode_id, scope).await
    }

    /// Delete an episode in scope; silent no-op when absent.
    pub async fn delete<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        episode_id: EpisodeId,
    ) -> ApiResult<()> {
        repo::episodes::delete_episode(client, episode_id, scope).await?;
        Ok(())
    }

    /// Count episodes in scope.
    pub async fn count<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
    ) -> ApiResult<i64> {
        repo::episodes::count_episodes(client, scope).await
    }

    /// Embed the query text; a failing embedding service degrades retrieval
    /// to no semantic results instead of failing the request.
    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        match self.embeddings.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed; degrading to empty semantic results");
                None
            }
        }
    }

    /// Nearest-neighbor search over scope-filtered embeddings.
    pub async fn search_semantic<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        query: &str,
        limit: i64,
        score_threshold: f64,
    ) -> ApiResult<Vec<ScoredEpisode>> {
        let Some(vector) = self.embed_query(query).await else {
            return Ok(Vec::new());
        };
        repo::embeddings::search_similar(client, scope, &vector, limit, score_threshold).await
    }

    /// Vector search combined with storage-layer metadata filters.
    pub async fn search_hybrid<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        query: &str,
        filter: &HybridFilter,
        limit: i64,
        score_threshold: f64,
    ) -> ApiResult<Vec<ScoredEpisode>> {
        let Some(vector) = self.embed_query(query).await else {
            return Ok(Vec::new());
        };
        repo::embeddings::search_hybrid(client, scope, &vector, filter, limit, score_threshold)
            .await
    }
}
