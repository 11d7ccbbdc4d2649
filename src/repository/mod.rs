//! Repository layer for catalog persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! against SQLite, through diesel-async's SyncConnectionWrapper.

pub mod diesel_pool;
pub mod failed_url;
pub mod media;
pub mod migrations;
mod records;

pub use diesel_pool::{AsyncSqlitePool, DieselError};
pub use failed_url::FailedUrlRepository;
pub use media::{InsertOutcome, MediaRepository};
pub use migrations::run_migrations;

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_roundtrip() {
        let now = Utc::now();
        let parsed = parse_datetime(&now.to_rfc3339());
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_parse_datetime_invalid_is_epoch() {
        assert_eq!(parse_datetime("not a date"), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_parse_datetime_opt() {
        assert_eq!(parse_datetime_opt(None), None);
        assert_eq!(parse_datetime_opt(Some("garbage".to_string())), None);
        assert!(parse_datetime_opt(Some(Utc::now().to_rfc3339())).is_some());
    }
}
