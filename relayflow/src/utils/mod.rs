//! Identifier and timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Generates a fresh, time-ordered identifier for jobs and events.
#[must_use]
pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generates an insertion token used by downstream APIs to deduplicate
/// re-delivered events.
#[must_use]
pub fn generate_insert_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Formats a timestamp as RFC 3339 with second precision.
#[must_use]
pub fn rfc3339(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_id_is_unique_uuid() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_insert_id_has_no_hyphens() {
        let id = generate_insert_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }

    #[test]
    fn test_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(rfc3339(&ts), "2021-03-04T05:06:07Z");
    }
}
