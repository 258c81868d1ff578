//! Pure short-term window primitives: token counting, priority scoring, and
//! compression.
//!
//! Everything here is deterministic and non-suspending; persistence of the
//! window lives in the API crate's short-term service.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::enums::role;
use crate::identity::Timestamp;

static ENCODING: Lazy<CoreBPE> =
    Lazy::new(|| cl100k_base().expect("cl100k_base vocabulary is embedded"));

/// Count text tokens using the cl100k_base tokenizer.
///
/// Counts are advisory but monotone: a non-empty message never counts zero.
pub fn token_count(text: &str) -> i32 {
    ENCODING.encode_with_special_tokens(text).len() as i32
}

// ============================================================================
// WINDOW MESSAGE
// ============================================================================

/// Message envelope persisted in the short-term window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMessage {
    pub role: String,
    pub content: String,
    pub tokens: i32,
    pub priority_score: f64,
    pub timestamp: Timestamp,
}

impl WindowMessage {
    /// Build a message with computed token count and priority score.
    pub fn new(role: impl Into<String>, content: impl Into<String>, timestamp: Timestamp) -> Self {
        let role = role.into();
        let content = content.into();
        let tokens = token_count(&content);
        let mut msg = Self {
            role,
            content,
            tokens,
            priority_score: 0.0,
            timestamp,
        };
        msg.priority_score = score_priority(&msg);
        msg
    }

    /// Fill in tokens and priority when absent (non-positive).
    pub fn ensure_scored(&mut self) {
        if self.tokens <= 0 {
            self.tokens = token_count(&self.content);
        }
        if self.priority_score <= 0.0 {
            self.priority_score = score_priority(self);
        }
    }

    fn timestamp_secs(&self) -> f64 {
        self.timestamp.timestamp_micros() as f64 / 1e6
    }
}

// ============================================================================
// PRIORITY SCORING
// ============================================================================

/// Default weight for a message role.
pub fn role_weight(role_name: &str) -> f64 {
    match role_name {
        role::SYSTEM => 3.0,
        role::USER => 2.0,
        role::ASSISTANT => 1.0,
        _ => 0.5,
    }
}

/// Score message priority deterministically for compression decisions.
///
/// `score = role_weight × 100 + (timestamp_seconds / 1e9) × 10 + 1/max(tokens, 1)`,
/// rounded to 8 decimal places. Equal inputs always produce equal scores;
/// compression breaks ties by (timestamp, index).
pub fn score_priority(message: &WindowMessage) -> f64 {
    let recency_component = message.timestamp_secs() / 1_000_000_000.0;
    let length_component = 1.0 / f64::from(message.tokens.max(1));
    let raw = role_weight(&message.role) * 100.0 + recency_component * 10.0 + length_component;
    (raw * 1e8).round() / 1e8
}

// ============================================================================
// COMPRESSION
// ============================================================================

/// Sum of token counts across a window.
pub fn total_tokens(messages: &[WindowMessage]) -> i64 {
    messages.iter().map(|m| i64::from(m.tokens)).sum()
}

fn removal_index(messages: &[WindowMessage]) -> Option<usize> {
    messages
        .iter()
        .enumerate()
        .min_by(|(ai, a), (bi, b)| {
            a.priority_score
                .total_cmp(&b.priority_score)
                .then(a.timestamp.cmp(&b.timestamp))
                .then(ai.cmp(bi))
        })
        .map(|(idx, _)| idx)
}

/// Drop lowest-priority messages until total tokens fit the budget.
///
/// A single message larger than the budget is itself dropped, leaving the
/// window empty.
pub fn compress_window(mut messages: Vec<WindowMessage>, max_tokens: i32) -> Vec<WindowMessage> {
    while total_tokens(&messages) > i64::from(max_tokens) && !messages.is_empty() {
        if let Some(idx) = removal_index(&messages) {
            messages.remove(idx);
        }
    }
    messages
}

/// Drop lowest-priority messages until total tokens reach `target_tokens`,
/// always preserving the final (highest-priority) message even when it alone
/// exceeds the target. Used by auto-checkpoint's post-snapshot shrink.
pub fn compress_to_target(
    mut messages: Vec<WindowMessage>,
    target_tokens: i32,
) -> Vec<WindowMessage> {
    while total_tokens(&messages) > i64::from(target_tokens) && messages.len() > 1 {
        if let Some(idx) = removal_index(&messages) {
            messages.remove(idx);
        }
    }
    messages
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(role_name: &str, content: &str, tokens: i32, secs: i64) -> WindowMessage {
        let mut m = WindowMessage {
            role: role_name.to_string(),
            content: content.to_string(),
            tokens,
            priority_score: 0.0,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        };
        m.priority_score = score_priority(&m);
        m
    }

    #[test]
    fn test_token_count_monotone() {
        assert_eq!(token_count(""), 0);
        assert!(token_count("hello") >= 1);
        let short = token_count("hello");
        let longer = token_count("hello hello hello hello");
        assert!(longer > short);
    }

    #[test]
    fn test_role_weights() {
        assert_eq!(role_weight("system"), 3.0);
        assert_eq!(role_weight("user"), 2.0);
        assert_eq!(role_weight("assistant"), 1.0);
        assert_eq!(role_weight("tool"), 0.5);
        assert_eq!(role_weight("anything-else"), 0.5);
    }

    #[test]
    fn test_score_is_pure() {
        let a = msg("user", "question", 4, 1_700_000_000);
        let b = msg("user", "question", 4, 1_700_000_000);
        assert_eq!(score_priority(&a), score_priority(&b));
        assert_eq!(a.priority_score, b.priority_score);
    }

    #[test]
    fn test_score_orders_by_role_first() {
        let system = msg("system", "instruction", 4, 1_700_000_000);
        let user = msg("user", "question", 4, 1_700_000_000);
        let assistant = msg("assistant", "answer", 4, 1_700_000_000);
        assert!(system.priority_score > user.priority_score);
        assert!(user.priority_score > assistant.priority_score);
    }

    #[test]
    fn test_budget_enforcement_drops_lowest_priority() {
        // MAX_TOKENS=12: system(4) + assistant(6) + user(4) = 14 > 12,
        // assistant carries the lowest role weight and is dropped.
        let window = vec![
            msg("system", "instruction", 4, 1_700_000_000),
            msg("assistant", "verbose response example", 6, 1_700_000_001),
            msg("user", "question", 4, 1_700_000_002),
        ];
        let compressed = compress_window(window, 12);

        assert_eq!(compressed.len(), 2);
        assert_eq!(compressed[0].role, "system");
        assert_eq!(compressed[1].role, "user");
        assert_eq!(total_tokens(&compressed), 8);
    }

    #[test]
    fn test_zero_budget_empties_window() {
        let window = vec![msg("system", "instruction", 4, 1_700_000_000)];
        assert!(compress_window(window, 0).is_empty());
    }

    #[test]
    fn test_oversized_message_is_dropped() {
        let window = vec![msg("user", "a very long message", 100, 1_700_000_000)];
        assert!(compress_window(window, 12).is_empty());
    }

    #[test]
    fn test_tie_break_by_timestamp_then_index() {
        // Same role and token count; earlier timestamp loses.
        let early = msg("user", "first", 4, 1_700_000_000);
        let late = msg("user", "second", 4, 1_700_000_100);
        let compressed = compress_window(vec![early.clone(), late.clone()], 4);
        assert_eq!(compressed, vec![late.clone()]);

        // Identical messages tie on (priority, timestamp); the earlier index
        // is removed.
        let twin_a = msg("user", "twin", 4, 1_700_000_000);
        let twin_b = msg("user", "twin", 4, 1_700_000_000);
        let compressed = compress_window(vec![twin_a, twin_b], 4);
        assert_eq!(compressed.len(), 1);
    }

    #[test]
    fn test_compress_to_target_preserves_last_message() {
        let big = msg("system", "big", 90, 1_700_000_000);
        let small = msg("assistant", "small", 10, 1_700_000_001);
        let compressed = compress_to_target(vec![big.clone(), small], 50);

        // The surviving message exceeds the target but is never removed.
        assert_eq!(compressed.len(), 1);
        assert_eq!(compressed[0].role, "system");
        assert!(total_tokens(&compressed) > 50);
    }

    #[test]
    fn test_window_payload_round_trip() {
        let window = vec![
            msg("user", "rules", 3, 1_700_000_000),
            msg("user", "question", 4, 1_700_000_001),
        ];
        let payload = serde_json::to_string(&window).expect("serializable");
        let restored: Vec<WindowMessage> =
            serde_json::from_str(&payload).expect("deserializable");
        assert_eq!(restored, window);
        // Re-serializing the restored window yields the checkpoint content
        assert_eq!(
            serde_json::to_string(&restored).expect("serializable"),
            payload
        );
    }

    #[test]
    fn test_ensure_scored_fills_missing_fields() {
        let mut m = WindowMessage {
            role: "user".to_string(),
            content: "what is the capital of France?".to_string(),
            tokens: 0,
            priority_score: 0.0,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        m.ensure_scored();
        assert!(m.tokens > 0);
        assert!(m.priority_score > 0.0);

        // Explicit values are left untouched
        let before = m.clone();
        m.ensure_scored();
        assert_eq!(m, before);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_message() -> impl Strategy<Value = WindowMessage> {
            (
                prop_oneof![
                    Just("system".to_string()),
                    Just("user".to_string()),
                    Just("assistant".to_string()),
                    Just("tool".to_string()),
                ],
                1i32..200,
                1_600_000_000i64..1_800_000_000,
            )
                .prop_map(|(role, tokens, secs)| {
                    let mut m = WindowMessage {
                        role,
                        content: "x".to_string(),
                        tokens,
                        priority_score: 0.0,
                        timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
                    };
                    m.priority_score = score_priority(&m);
                    m
                })
        }

        proptest! {
            #[test]
            fn compressed_window_fits_budget(
                messages in prop::collection::vec(arb_message(), 0..32),
                max_tokens in 0i32..500,
            ) {
                let compressed = compress_window(messages, max_tokens);
                prop_assert!(total_tokens(&compressed) <= i64::from(max_tokens));
            }

            #[test]
            fn compression_preserves_relative_order(
                messages in prop::collection::vec(arb_message(), 0..16),
                max_tokens in 0i32..500,
            ) {
                let compressed = compress_window(messages.clone(), max_tokens);
                // Survivors appear in their original order
                let mut cursor = 0;
                for survivor in &compressed {
                    let pos = messages[cursor..]
                        .iter()
                        .position(|m| m == survivor)
                        .map(|p| p + cursor);
                    prop_assert!(pos.is_some());
                    cursor = pos.unwrap() + 1;
                }
            }

            #[test]
            fn scoring_is_deterministic(message in arb_message()) {
                prop_assert_eq!(score_priority(&message), score_priority(&message));
            }
        }
    }
}
