//! Unified memory query engine over short-term and episodic memory.
//!
//! Branches run concurrently and are independently scope-filtered; episodic
//! hits are deduplicated by episode id keeping the highest score, then both
//! branches merge into one score-ordered list. Result ordering is
//! deterministic given identical inputs.

use std::time::Instant;

use remembr_core::{MemoryScope, SearchMode, SessionId, Timestamp, WindowMessage};
use tokio_postgres::GenericClient;

use crate::error::ApiResult;
use crate::repo::embeddings::{HybridFilter, ScoredEpisode};
use crate::services::episodic::EpisodicMemory;
use crate::services::short_term::ShortTermMemory;

// ============================================================================
// REQUEST / RESULT SHAPES
// ============================================================================

/// Inputs controlling memory retrieval across both memory layers.
#[derive(Debug, Clone)]
pub struct MemoryQueryRequest {
    pub query: Option<String>,
    pub session_id: Option<SessionId>,
    pub tags: Option<Vec<String>>,
    pub from_time: Option<Timestamp>,
    pub to_time: Option<Timestamp>,
    pub role: Option<String>,
    pub include_short_term: bool,
    pub include_episodic: bool,
    pub limit: usize,
    pub score_threshold: f64,
    pub search_mode: SearchMode,
}

impl Default for MemoryQueryRequest {
    fn default() -> Self {
        Self {
            query: None,
            session_id: None,
            tags: None,
            from_time: None,
            to_time: None,
            role: None,
            include_short_term: true,
            include_episodic: true,
            limit: 20,
            score_threshold: 0.65,
            search_mode: SearchMode::Hybrid,
        }
    }
}

/// A short-term message paired with its query relevance score.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub message: WindowMessage,
    pub score: f64,
}

/// Aggregated search output from both memory systems.
#[derive(Debug, Default)]
pub struct MemoryQueryResult {
    pub short_term_messages: Vec<ScoredMessage>,
    pub episodes: Vec<ScoredEpisode>,
    pub total_results: usize,
    pub query_time_ms: f64,
}

pub(crate) enum MergedPayload {
    ShortTerm(ScoredMessage),
    Episodic(ScoredEpisode),
}

pub(crate) struct MergedResult {
    created_at: Timestamp,
    score: f64,
    payload: MergedPayload,
}

// ============================================================================
// SCORING AND FILTERS
// ============================================================================

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    let mut tokens = std::collections::HashSet::new();
    let mut current = String::new();
    for c in text.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            current.push(c);
        } else if !current.is_empty() {
            tokens.insert(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.insert(current);
    }
    tokens
}

/// Relevance of a short-term message to the query: token-overlap ratio over
/// the query's tokens, plus 0.2 when the query appears as a substring.
pub(crate) fn message_score(message: &WindowMessage, query: Option<&str>) -> f64 {
    let Some(query) = query else {
        return 0.0;
    };
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }

    let content_tokens = tokenize(&message.content);
    let overlap =
        query_tokens.intersection(&content_tokens).count() as f64 / query_tokens.len() as f64;
    let exact_bonus = if message
        .content
        .to_lowercase()
        .contains(&query.to_lowercase())
    {
        0.2
    } else {
        0.0
    };
    overlap + exact_bonus
}

fn message_matches(message: &WindowMessage, request: &MemoryQueryRequest) -> bool {
    if let Some(ref role) = request.role {
        if &message.role != role {
            return false;
        }
    }
    if let Some(from_time) = request.from_time {
        if message.timestamp < from_time {
            return false;
        }
    }
    if let Some(to_time) = request.to_time {
        if message.timestamp > to_time {
            return false;
        }
    }
    if request.search_mode != SearchMode::FilterOnly {
        if let Some(ref query) = request.query {
            return message
                .content
                .to_lowercase()
                .contains(&query.to_lowercase());
        }
    }
    true
}

fn episode_matches(result: &ScoredEpisode, request: &MemoryQueryRequest) -> bool {
    let episode = &result.episode;
    if let Some(session_id) = request.session_id {
        if episode.session_id != Some(session_id) {
            return false;
        }
    }
    if let Some(ref role) = request.role {
        if &episode.role != role {
            return false;
        }
    }
    if let Some(ref tags) = request.tags {
        if !tags.is_empty() && !episode.tags.iter().any(|t| tags.contains(t)) {
            return false;
        }
    }
    if let Some(from_time) = request.from_time {
        if episode.created_at < from_time {
            return false;
        }
    }
    if let Some(to_time) = request.to_time {
        if episode.created_at > to_time {
            return false;
        }
    }
    true
}

// ============================================================================
// MERGE
// ============================================================================

/// Keep the highest-scoring hit per episode id.
pub(crate) fn dedupe_episodic(results: Vec<ScoredEpisode>) -> Vec<ScoredEpisode> {
    let mut by_id: Vec<ScoredEpisode> = Vec::with_capacity(results.len());
    for result in results {
        match by_id
            .iter_mut()
            .find(|existing| existing.episode.episode_id == result.episode.episode_id)
        {
            Some(existing) => {
                if result.similarity_score > existing.similarity_score {
                    *existing = result;
                }
            }
            None => by_id.push(result),
        }
    }
    by_id
}

/// Merge both branches into one ordered list and truncate to the limit.
pub(crate) fn merge_results(
    short_results: Vec<ScoredMessage>,
    episodic_results: Vec<ScoredEpisode>,
    request: &MemoryQueryRequest,
) -> Vec<MergedResult> {
    let deduped = dedupe_episodic(episodic_results);

    let mut merged: Vec<MergedResult> = short_results
        .into_iter()
        .map(|scored| MergedResult {
            created_at: scored.message.timestamp,
            score: scored.score,
            payload: MergedPayload::ShortTerm(scored),
        })
        .collect();
    merged.extend(deduped.into_iter().map(|result| MergedResult {
        created_at: result.episode.created_at,
        score: result.similarity_score,
        payload: MergedPayload::Episodic(result),
    }));

    if request.search_mode == SearchMode::FilterOnly {
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    } else {
        merged.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.created_at.cmp(&a.created_at))
        });
    }

    merged.truncate(request.limit);
    merged
}

fn split_merged(merged: Vec<MergedResult>) -> (Vec<ScoredMessage>, Vec<ScoredEpisode>) {
    let mut short_term = Vec::new();
    let mut episodes = Vec::new();
    for item in merged {
        match item.payload {
            MergedPayload::ShortTerm(scored) => short_term.push(scored),
            MergedPayload::Episodic(result) => episodes.push(result),
        }
    }
    (short_term, episodes)
}

// ============================================================================
// ENGINE
// ============================================================================

/// Single query entry-point for context-aware memory retrieval.
pub struct MemoryQueryEngine {
    short_term: ShortTermMemory,
    episodic: EpisodicMemory,
}

impl MemoryQueryEngine {
    pub fn new(short_term: ShortTermMemory, episodic: EpisodicMemory) -> Self {
        Self {
            short_term,
            episodic,
        }
    }

    /// Query short-term and episodic memory concurrently and return merged
    /// results. Wall time is the max of the two branch times plus the merge.
    pub async fn query<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        request: &MemoryQueryRequest,
    ) -> ApiResult<MemoryQueryResult> {
        let started = Instant::now();

        let short_branch = self.query_short_term(request);
        let episodic_branch = self.query_episodic(client, scope, request);
        let (short_results, episodic_results) = tokio::join!(short_branch, episodic_branch);
        let episodic_results = episodic_results?;

        let merged = merge_results(short_results, episodic_results, request);
        let total_results = merged.len();
        let (short_term_messages, episodes) = split_merged(merged);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(MemoryQueryResult {
            short_term_messages,
            episodes,
            total_results,
            query_time_ms: (elapsed_ms * 1000.0).round() / 1000.0,
        })
    }

    async fn query_short_term(&self, request: &MemoryQueryRequest) -> Vec<ScoredMessage> {
        if !request.include_short_term {
            return Vec::new();
        }
        let Some(session_id) = request.session_id else {
            return Vec::new();
        };

        let messages = self.short_term.get_context(session_id).await;
        let mut scored: Vec<ScoredMessage> = messages
            .into_iter()
            .filter(|msg| message_matches(msg, request))
            .map(|message| {
                let score = message_score(&message, request.query.as_deref());
                ScoredMessage { message, score }
            })
            .collect();

        if request.search_mode == SearchMode::FilterOnly {
            scored.sort_by(|a, b| b.message.timestamp.cmp(&a.message.timestamp));
        } else {
            scored.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(b.message.timestamp.cmp(&a.message.timestamp))
            });
        }
        scored.truncate(request.limit);
        scored
    }

    async fn query_episodic<C: GenericClient>(
        &self,
        client: &C,
        scope: &MemoryScope,
        request: &MemoryQueryRequest,
    ) -> ApiResult<Vec<ScoredEpisode>> {
        if !request.include_episodic {
            return Ok(Vec::new());
        }

        let limit = request.limit as i64;
        let results = match (&request.search_mode, request.query.as_deref()) {
            (SearchMode::Semantic, Some(query)) => {
                self.episodic
                    .search_semantic(client, scope, query, limit, request.score_threshold)
                    .await?
            }
            (SearchMode::Hybrid, Some(query)) => {
                let filter = HybridFilter {
                    session_id: request.session_id,
                    tags: request.tags.clone(),
                    role: request.role.clone(),
                    from_time: request.from_time,
                    to_time: request.to_time,
                };
                self.episodic
                    .search_hybrid(client, scope, query, &filter, limit, request.score_threshold)
                    .await?
            }
            _ => {
                // Filter-only, or no query text: a strictly consistent
                // time-ordered scan that skips the embedding service.
                let fetch_limit = (limit * 2).max(limit);
                let episodes = if let Some(session_id) = request.session_id {
                    self.episodic
                        .get_session_history(client, scope, session_id, fetch_limit)
                        .await?
                } else {
                    self.episodic
                        .search_by_time(
                            client,
                            scope,
                            request.from_time,
                            request.to_time,
                            fetch_limit,
                        )
                        .await?
                };
                episodes
                    .into_iter()
                    .map(|episode| ScoredEpisode {
                        episode,
                        similarity_score: 0.0,
                    })
                    .collect()
            }
        };

        let mut filtered: Vec<ScoredEpisode> = results
            .into_iter()
            .filter(|result| episode_matches(result, request))
            .collect();

        if request.search_mode == SearchMode::FilterOnly {
            filtered.sort_by(|a, b| b.episode.created_at.cmp(&a.episode.created_at));
        } else {
            filtered.sort_by(|a, b| {
                b.similarity_score
                    .total_cmp(&a.similarity_score)
                    .then(b.episode.created_at.cmp(&a.episode.created_at))
            });
        }
        filtered.truncate(request.limit);
        Ok(filtered)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use remembr_core::{EntityIdType, Episode, EpisodeId, OrgId};

    fn message(content: &str, secs: i64) -> WindowMessage {
        WindowMessage {
            role: "assistant".to_string(),
            content: content.to_string(),
            tokens: 8,
            priority_score: 100.0,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn episode_hit(id: EpisodeId, content: &str, score: f64, secs: i64) -> ScoredEpisode {
        ScoredEpisode {
            episode: Episode {
                episode_id: id,
                org_id: OrgId::new_v4(),
                team_id: None,
                user_id: None,
                agent_id: None,
                session_id: None,
                role: "assistant".to_string(),
                content: content.to_string(),
                tags: Vec::new(),
                metadata: None,
                created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            },
            similarity_score: score,
        }
    }

    #[test]
    fn test_message_score_overlap_and_bonus() {
        let msg = message("Reset password from account settings", 1_700_000_000);

        // Both query tokens present plus substring bonus
        let score = message_score(&msg, Some("reset password"));
        assert!((score - 1.2).abs() < 1e-9);

        // Half the query tokens, no substring
        let score = message_score(&msg, Some("password rotation"));
        assert!((score - 0.5).abs() < 1e-9);

        // No query
        assert_eq!(message_score(&msg, None), 0.0);
    }

    #[test]
    fn test_dedupe_keeps_highest_score() {
        let id = EpisodeId::new_v4();
        let results = vec![
            episode_hit(id, "Reset password from account settings", 0.71, 1_700_000_000),
            episode_hit(id, "Reset password from account settings", 0.95, 1_700_000_000),
        ];

        let deduped = dedupe_episodic(results);
        assert_eq!(deduped.len(), 1);
        assert!((deduped[0].similarity_score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_merge_dedupes_and_keeps_both_kinds() {
        // Hybrid search over duplicated episodic hits plus one short-term
        // match: exactly one episodic result at the max score, both kinds
        // present, score-descending order.
        let id = EpisodeId::new_v4();
        let short = ScoredMessage {
            message: message("Reset password from account settings", 1_700_000_500),
            score: 1.2,
        };
        let episodic = vec![
            episode_hit(id, "Reset password from account settings", 0.71, 1_700_000_000),
            episode_hit(id, "Reset password from account settings", 0.95, 1_700_000_000),
        ];

        let request = MemoryQueryRequest {
            query: Some("reset password".to_string()),
            limit: 5,
            ..Default::default()
        };
        let merged = merge_results(vec![short], episodic, &request);

        assert_eq!(merged.len(), 2);
        assert!(merged[0].score >= merged[1].score);
        let episodic_count = merged
            .iter()
            .filter(|m| matches!(m.payload, MergedPayload::Episodic(_)))
            .count();
        assert_eq!(episodic_count, 1);
    }

    #[test]
    fn test_merge_truncates_to_limit() {
        let episodic: Vec<ScoredEpisode> = (0..10)
            .map(|i| {
                episode_hit(
                    EpisodeId::new_v4(),
                    "content",
                    0.9 - i as f64 * 0.01,
                    1_700_000_000 + i,
                )
            })
            .collect();

        let request = MemoryQueryRequest {
            limit: 1,
            ..Default::default()
        };
        let merged = merge_results(Vec::new(), episodic, &request);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_filter_only_orders_by_time() {
        let old = episode_hit(EpisodeId::new_v4(), "old", 0.9, 1_700_000_000);
        let new = episode_hit(EpisodeId::new_v4(), "new", 0.1, 1_700_000_900);

        let request = MemoryQueryRequest {
            search_mode: SearchMode::FilterOnly,
            ..Default::default()
        };
        let merged = merge_results(Vec::new(), vec![old, new], &request);

        // Time descending, ignoring scores
        assert_eq!(merged[0].created_at, Utc.timestamp_opt(1_700_000_900, 0).unwrap());
    }

    #[test]
    fn test_message_matches_time_range_inclusive() {
        let msg = message("hello", 1_700_000_000);
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let request = MemoryQueryRequest {
            from_time: Some(at),
            to_time: Some(at),
            search_mode: SearchMode::FilterOnly,
            ..Default::default()
        };
        assert!(message_matches(&msg, &request));
    }

    #[test]
    fn test_episode_matches_tag_overlap() {
        let mut hit = episode_hit(EpisodeId::new_v4(), "tagged", 0.9, 1_700_000_000);
        hit.episode.tags = vec!["billing".to_string(), "auth".to_string()];

        // Overlap on any tag is enough; equality is not required
        let request = MemoryQueryRequest {
            tags: Some(vec!["auth".to_string(), "unrelated".to_string()]),
            search_mode: SearchMode::FilterOnly,
            ..Default::default()
        };
        assert!(episode_matches(&hit, &request));

        let request = MemoryQueryRequest {
            tags: Some(vec!["unrelated".to_string()]),
            search_mode: SearchMode::FilterOnly,
            ..Default::default()
        };
        assert!(!episode_matches(&hit, &request));
    }
}
