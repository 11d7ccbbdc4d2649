//! Poison-URL repository.
//!
//! Retry bookkeeping is an atomic upsert: concurrent chunk items failing on
//! the same URL each land one `attempts` increment, with no read-modify-write
//! window.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_pool::{AsyncSqlitePool, DieselError};
use super::records::{FailedUrlRow, NewFailedUrl};
use crate::models::{FailedUrl, POISON_THRESHOLD};
use crate::schema::failed_urls;

/// Diesel-backed failed-URL repository.
#[derive(Clone)]
pub struct FailedUrlRepository {
    pool: AsyncSqlitePool,
}

impl FailedUrlRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Record one failed ingestion attempt for a URL.
    ///
    /// First failure inserts with `attempts = 1`; repeats increment the
    /// counter and refresh `reason`/`last_attempt_at` in a single statement.
    pub async fn record_failure(&self, url: &str, reason: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let now = Utc::now().to_rfc3339();
        let new_row = NewFailedUrl {
            url,
            reason,
            attempts: 1,
            first_failed_at: now.clone(),
            last_attempt_at: now.clone(),
        };

        diesel::insert_into(failed_urls::table)
            .values(&new_row)
            .on_conflict(failed_urls::url)
            .do_update()
            .set((
                failed_urls::attempts.eq(failed_urls::attempts + 1),
                failed_urls::reason.eq(reason),
                failed_urls::last_attempt_at.eq(now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Check whether a URL has reached the poison threshold.
    ///
    /// Runs before any network call for the URL.
    pub async fn is_poisoned(&self, url: &str) -> Result<bool, DieselError> {
        let attempts = self.attempts(url).await?;
        Ok(attempts >= POISON_THRESHOLD)
    }

    /// Recorded attempt count for a URL (0 when never failed).
    pub async fn attempts(&self, url: &str) -> Result<i32, DieselError> {
        let mut conn = self.pool.get().await?;

        let attempts: Option<i32> = failed_urls::table
            .find(url)
            .select(failed_urls::attempts)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(attempts.unwrap_or(0))
    }

    pub async fn get(&self, url: &str) -> Result<Option<FailedUrl>, DieselError> {
        let mut conn = self.pool.get().await?;

        let row: Option<FailedUrlRow> = failed_urls::table
            .find(url)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(row.map(FailedUrlRow::into_model))
    }

    pub async fn count(&self) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let count: i64 = failed_urls::table
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count as u64)
    }
}
