//! Validation helpers shared by route handlers.

use crate::error::{ApiError, ApiResult};

/// Trait for validating non-empty strings.
pub trait ValidateNonEmpty {
    /// Validate that the value is non-empty (after trimming).
    fn validate_non_empty(&self, field_name: &str) -> ApiResult<()>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field_name: &str) -> ApiResult<()> {
        if self.trim().is_empty() {
            return Err(ApiError::missing_field(field_name));
        }
        Ok(())
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field_name: &str) -> ApiResult<()> {
        self.as_str().validate_non_empty(field_name)
    }
}

/// Validate that a limit lies in `[1, max]`.
pub fn validate_limit(limit: i64, max: i64) -> ApiResult<()> {
    if limit < 1 || limit > max {
        return Err(ApiError::validation(format!(
            "limit must be between 1 and {}",
            max
        )));
    }
    Ok(())
}

/// Validate an inclusive time range.
pub fn validate_time_range(
    from_time: Option<chrono::DateTime<chrono::Utc>>,
    to_time: Option<chrono::DateTime<chrono::Utc>>,
) -> ApiResult<()> {
    if let (Some(from), Some(to)) = (from_time, to_time) {
        if to < from {
            return Err(ApiError::invalid_time_range());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_validate_non_empty() {
        assert!("hello".validate_non_empty("field").is_ok());
        assert!("".validate_non_empty("field").is_err());
        assert!("   ".validate_non_empty("field").is_err());
        assert!(String::from("x").validate_non_empty("field").is_ok());
    }

    #[test]
    fn test_validate_limit() {
        assert!(validate_limit(1, 100).is_ok());
        assert!(validate_limit(100, 100).is_ok());
        assert!(validate_limit(0, 100).is_err());
        assert!(validate_limit(101, 100).is_err());
    }

    #[test]
    fn test_validate_time_range_inclusive() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let later = Utc.timestamp_opt(1_700_000_100, 0).unwrap();

        // Equal bounds are allowed
        assert!(validate_time_range(Some(at), Some(at)).is_ok());
        assert!(validate_time_range(Some(at), Some(later)).is_ok());
        assert!(validate_time_range(Some(later), Some(at)).is_err());
        assert!(validate_time_range(None, Some(at)).is_ok());
        assert!(validate_time_range(Some(at), None).is_ok());
    }
}
