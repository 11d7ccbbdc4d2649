//! Media catalog repository.
//!
//! Dedup correctness rests on the unique constraints over `content_hash`
//! and `storage_key`: a violation raised by a concurrent duplicate ingest
//! is reported as [`InsertOutcome::DuplicateRace`], never as an error.

use std::collections::HashMap;

use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::RunQueryDsl;

use super::diesel_pool::{AsyncSqlitePool, DieselError};
use super::records::{MediaRecordRow, NewMediaRecord};
use crate::models::{MediaRecord, MessageGroup};
use crate::schema::media_records;

/// Result of a catalog insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A unique constraint fired: another ingest already stored this
    /// content (or this storage key). Treated as success-as-duplicate.
    DuplicateRace,
}

/// Diesel-backed media catalog repository.
#[derive(Clone)]
pub struct MediaRepository {
    pool: AsyncSqlitePool,
}

impl MediaRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a record, folding unique-constraint races into
    /// [`InsertOutcome::DuplicateRace`].
    pub async fn insert(&self, record: &MediaRecord) -> Result<InsertOutcome, DieselError> {
        let mut conn = self.pool.get().await?;

        let new_record = NewMediaRecord::from_model(record);
        match diesel::insert_into(media_records::table)
            .values(&new_record)
            .execute(&mut conn)
            .await
        {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Ok(InsertOutcome::DuplicateRace)
            }
            Err(e) => Err(e),
        }
    }

    /// Dedup existence check, run before any store write.
    pub async fn exists_by_hash(&self, content_hash: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let count: i64 = media_records::table
            .filter(media_records::content_hash.eq(content_hash))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count > 0)
    }

    pub async fn get(&self, id: &str) -> Result<Option<MediaRecord>, DieselError> {
        let mut conn = self.pool.get().await?;

        let row: Option<MediaRecordRow> = media_records::table
            .find(id)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(row.map(MediaRecordRow::into_model))
    }

    /// All media for one message, newest ingest first.
    pub async fn list_for_message(
        &self,
        message_id: &str,
    ) -> Result<Vec<MediaRecord>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<MediaRecordRow> = media_records::table
            .filter(media_records::source_message_id.eq(message_id))
            .order(media_records::ingested_at.desc())
            .load(&mut conn)
            .await?;

        Ok(rows.into_iter().map(MediaRecordRow::into_model).collect())
    }

    /// Page of message groups, most recently ingested message first.
    ///
    /// Two queries like every consumer of a grouped feed: page the distinct
    /// message ids first, then hydrate all media for those ids.
    pub async fn list_grouped(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageGroup>, DieselError> {
        let mut conn = self.pool.get().await?;

        let ids: Vec<GroupIdRow> = diesel::sql_query(
            "SELECT source_message_id FROM media_records \
             GROUP BY source_message_id \
             ORDER BY MAX(ingested_at) DESC LIMIT ? OFFSET ?",
        )
        .bind::<diesel::sql_types::BigInt, _>(limit)
        .bind::<diesel::sql_types::BigInt, _>(offset)
        .load(&mut conn)
        .await?;

        let message_ids: Vec<String> = ids.into_iter().map(|r| r.source_message_id).collect();
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<MediaRecordRow> = media_records::table
            .filter(media_records::source_message_id.eq_any(&message_ids))
            .order(media_records::ingested_at.desc())
            .load(&mut conn)
            .await?;

        let mut by_message: HashMap<String, Vec<MediaRecord>> = HashMap::new();
        for row in rows {
            let record = row.into_model();
            by_message
                .entry(record.source_message_id.clone())
                .or_default()
                .push(record);
        }

        Ok(message_ids
            .into_iter()
            .filter_map(|id| {
                let media = by_message.remove(&id)?;
                // Slice indexing, not `.first()`: the RunQueryDsl blanket
                // impl in scope captures `first` on Vec.
                let first = media.get(0)?;
                Some(MessageGroup {
                    source_message_id: id,
                    source_channel_id: first.source_channel_id.clone(),
                    text_content: first.text_content.clone(),
                    source_timestamp: first.source_timestamp,
                    media,
                })
            })
            .collect())
    }

    /// Highest ingested snowflake for a channel.
    ///
    /// Snowflakes must compare as 64-bit integers; TEXT ordering would
    /// misorder ids of different lengths.
    pub async fn latest_message_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<String>, DieselError> {
        let mut conn = self.pool.get().await?;

        let row: Option<GroupIdRow> = diesel::sql_query(
            "SELECT source_message_id FROM media_records \
             WHERE source_channel_id = ? \
             ORDER BY CAST(source_message_id AS INTEGER) DESC LIMIT 1",
        )
        .bind::<diesel::sql_types::Text, _>(channel_id)
        .get_result(&mut conn)
        .await
        .optional()?;

        Ok(row.map(|r| r.source_message_id))
    }

    pub async fn mark_unavailable(&self, id: &str) -> Result<bool, DieselError> {
        self.set_available(id, false).await
    }

    pub async fn mark_available(&self, id: &str) -> Result<bool, DieselError> {
        self.set_available(id, true).await
    }

    async fn set_available(&self, id: &str, available: bool) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(media_records::table.find(id))
            .set(media_records::available.eq(i32::from(available)))
            .execute(&mut conn)
            .await?;

        Ok(updated > 0)
    }

    /// In-place refresh of the record stored under a storage key, used by
    /// redownload when the fetched content no longer matches the catalog.
    pub async fn refresh_by_storage_key(
        &self,
        storage_key: &str,
        content_hash: &str,
        thumbnail_key: Option<&str>,
        duration_seconds: Option<f64>,
    ) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            media_records::table.filter(media_records::storage_key.eq(storage_key)),
        )
        .set((
            media_records::content_hash.eq(content_hash),
            media_records::thumbnail_key.eq(thumbnail_key),
            media_records::duration_seconds.eq(duration_seconds),
            media_records::available.eq(1),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated > 0)
    }

    /// Delete a record, returning it so the caller can remove the stored
    /// object best-effort.
    pub async fn delete(&self, id: &str) -> Result<Option<MediaRecord>, DieselError> {
        let mut conn = self.pool.get().await?;

        let row: Option<MediaRecordRow> = media_records::table
            .find(id)
            .first(&mut conn)
            .await
            .optional()?;

        if row.is_some() {
            diesel::delete(media_records::table.find(id))
                .execute(&mut conn)
                .await?;
        }

        Ok(row.map(MediaRecordRow::into_model))
    }

    pub async fn count(&self) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let count: i64 = media_records::table
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count as u64)
    }

    /// Record counts per media kind.
    pub async fn kind_counts(&self) -> Result<HashMap<String, u64>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<KindCount> = diesel::sql_query(
            "SELECT kind, COUNT(*) as count FROM media_records GROUP BY kind",
        )
        .load(&mut conn)
        .await?;

        Ok(rows.into_iter().map(|r| (r.kind, r.count as u64)).collect())
    }
}

#[derive(QueryableByName)]
struct GroupIdRow {
    #[diesel(sql_type = diesel::sql_types::Text)]
    source_message_id: String,
}

#[derive(QueryableByName)]
struct KindCount {
    #[diesel(sql_type = diesel::sql_types::Text)]
    kind: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}
