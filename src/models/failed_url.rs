//! Failure tracking for source URLs that could not be ingested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure count at which a URL is treated as permanently poisoned and
/// skipped without re-fetching.
pub const POISON_THRESHOLD: i32 = 3;

/// Tracks a source URL that failed ingestion.
///
/// Created on first failure; repeat failures bump `attempts` and refresh
/// `reason`/`last_attempt_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUrl {
    pub url: String,
    /// Last failure description.
    pub reason: String,
    pub attempts: i32,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

impl FailedUrl {
    pub fn is_poisoned(&self) -> bool {
        self.attempts >= POISON_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_threshold() {
        let mut failed = FailedUrl {
            url: "http://x/gone.mp4".to_string(),
            reason: "HTTP 404".to_string(),
            attempts: 2,
            first_failed_at: Utc::now(),
            last_attempt_at: Utc::now(),
        };
        assert!(!failed.is_poisoned());
        failed.attempts = 3;
        assert!(failed.is_poisoned());
    }
}
