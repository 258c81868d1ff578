//! Embedding generation client and the background enrichment worker pool.
//!
//! The external service is a batch-capable vector generator with a fixed
//! model and dimension count. Transient failures (timeouts, 5xx, 429) are
//! retried with exponential backoff and jitter up to a fixed attempt count;
//! afterwards the enrichment permanently fails for that episode and is
//! logged with its id. Enrichment never fails the write path.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use remembr_core::{EntityIdType, EpisodeId, OrgId, Settings};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::db::DbClient;
use crate::repo;

/// Attempts per batch before the enrichment permanently fails.
const MAX_ATTEMPTS: u32 = 3;

/// Bound on a single embedding request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("embedding service returned {status}")]
    Status { status: StatusCode },

    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbeddingError {
    /// Timeouts, connection failures, rate limiting, and server errors are
    /// retryable; everything else fails immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Transport(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::Status { status } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            EmbeddingError::Malformed(_) => false,
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for a Jina-style `/v1/embeddings` endpoint.
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    pub model: String,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn from_settings(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: settings.embedding_base_url.clone(),
            api_key: settings.embedding_api_key.clone(),
            model: settings.embedding_model.clone(),
            batch_size: settings.embedding_batch_size.max(1),
        }
    }

    async fn request_batch(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Status { status });
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        if body.data.len() != input.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} vectors, got {}",
                input.len(),
                body.data.len()
            )));
        }

        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn embed_batch_with_retry(
        &self,
        input: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempt = 1u32;

        loop {
            match self.request_batch(input).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_secs(1));
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Embedding request failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Generate embeddings for the given texts.
    ///
    /// Batches larger than the service cap are split transparently; the
    /// output order matches the input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch_with_retry(chunk).await?);
        }

        tracing::debug!(
            model = %self.model,
            count = texts.len(),
            dimensions = vectors.first().map(Vec::len).unwrap_or(0),
            "Generated embeddings"
        );
        Ok(vectors)
    }

    /// Number of inputs sent per upstream request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

// ============================================================================
// WORKER POOL
// ============================================================================

/// One queued enrichment: embed the content, persist the vector.
#[derive(Debug)]
struct EmbeddingJob {
    episode_id: EpisodeId,
    content: String,
}

/// Bounded background worker pool for embedding enrichment.
///
/// Jobs are detached from their originating request: they carry their own
/// storage session, do not observe request cancellation, and re-read the
/// episode to recover its `org_id` so the vector lands in the right tenant.
/// A full queue drops the job with a warning; the episode stays retrievable
/// through filter-only search.
#[derive(Clone)]
pub struct EmbeddingWorkerPool {
    tx: mpsc::Sender<EmbeddingJob>,
}

impl EmbeddingWorkerPool {
    /// Spawn `workers` worker tasks sharing one bounded queue.
    pub fn spawn(
        client: Arc<EmbeddingClient>,
        db: DbClient,
        workers: usize,
        queue_len: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_len.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            let client = client.clone();
            let db = db.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        break;
                    };
                    process_job(&client, &db, job).await;
                }
                tracing::debug!(worker_id, "Embedding worker stopped");
            });
        }

        Self { tx }
    }

    /// Schedule enrichment for a freshly committed episode.
    pub fn submit(&self, episode_id: EpisodeId, content: String) {
        let job = EmbeddingJob {
            episode_id,
            content,
        };
        if let Err(e) = self.tx.try_send(job) {
            tracing::warn!(
                %episode_id,
                error = %e,
                "Embedding queue full; dropping enrichment"
            );
        }
    }
}

async fn process_job(client: &EmbeddingClient, db: &DbClient, job: EmbeddingJob) {
    let vectors = match client.embed(std::slice::from_ref(&job.content)).await {
        Ok(vectors) => vectors,
        Err(e) => {
            tracing::error!(
                episode_id = %job.episode_id,
                error = %e,
                "Failed to generate episode embedding"
            );
            return;
        }
    };
    let Some(vector) = vectors.into_iter().next() else {
        tracing::error!(episode_id = %job.episode_id, "Embedding service returned no vector");
        return;
    };

    if let Err(e) = store_embedding(db, client, job.episode_id, &job.content, &vector).await {
        tracing::error!(
            episode_id = %job.episode_id,
            error = %e,
            "Failed to persist episode embedding"
        );
    }
}

async fn store_embedding(
    db: &DbClient,
    client: &EmbeddingClient,
    episode_id: EpisodeId,
    content: &str,
    vector: &[f32],
) -> crate::error::ApiResult<()> {
    let conn = db.get_conn().await?;

    // Re-read the episode to recover its tenant; the episode may have been
    // deleted while the job was queued.
    let row = conn
        .query_opt(
            "SELECT org_id FROM episodes WHERE id = $1",
            &[&episode_id.as_uuid()],
        )
        .await?;
    let Some(row) = row else {
        tracing::warn!(%episode_id, "Skipping embedding save: episode not found");
        return Ok(());
    };
    let org_id = OrgId::new(row.get::<_, Uuid>(0));

    repo::embeddings::insert_embedding(
        &**conn,
        org_id,
        episode_id,
        content,
        &client.model,
        vector,
    )
    .await?;

    tracing::debug!(%episode_id, dimensions = vector.len(), "Episode embedding stored");
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EmbeddingError::Status {
            status: StatusCode::TOO_MANY_REQUESTS
        }
        .is_transient());
        assert!(EmbeddingError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR
        }
        .is_transient());
        assert!(EmbeddingError::Status {
            status: StatusCode::BAD_GATEWAY
        }
        .is_transient());
        assert!(!EmbeddingError::Status {
            status: StatusCode::UNAUTHORIZED
        }
        .is_transient());
        assert!(!EmbeddingError::Status {
            status: StatusCode::UNPROCESSABLE_ENTITY
        }
        .is_transient());
        assert!(!EmbeddingError::Malformed("truncated".to_string()).is_transient());
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let mut settings = Settings::default();
        settings.embedding_batch_size = 0;
        let client = EmbeddingClient::from_settings(&settings);
        assert_eq!(client.batch_size(), 1);

        settings.embedding_batch_size = 100;
        let client = EmbeddingClient::from_settings(&settings);
        assert_eq!(client.batch_size(), 100);
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let client = EmbeddingClient::from_settings(&Settings::default());
        let vectors = client.embed(&[]).await.expect("empty input never fails");
        assert!(vectors.is_empty());
    }
}
