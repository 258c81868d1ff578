//! Standard response envelopes.
//!
//! Success responses are `{data, request_id, timestamp}`; errors are rendered
//! by `ApiError::into_response` as `{error: {code, message, details?,
//! request_id}}`.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Success envelope wrapping every 2xx payload.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub request_id: String,
    /// ISO-8601 UTC timestamp of response creation.
    pub timestamp: String,
}

/// Wrap a payload in the success envelope.
pub fn success<T: Serialize>(data: T, request_id: &str) -> ApiResponse<T> {
    ApiResponse {
        data,
        request_id: request_id.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let resp = success(serde_json::json!({"ok": true}), "req-1");
        let value = serde_json::to_value(&resp).expect("serializable");

        assert_eq!(value["data"]["ok"], true);
        assert_eq!(value["request_id"], "req-1");
        // RFC3339 UTC with trailing Z
        let ts = value["timestamp"].as_str().expect("timestamp is a string");
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }
}
