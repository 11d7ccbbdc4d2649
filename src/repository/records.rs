//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.
//! Datetimes are stored as RFC 3339 TEXT and converted at the boundary.

use diesel::prelude::*;

use super::{parse_datetime, parse_datetime_opt};
use crate::models::{FailedUrl, MediaKind, MediaRecord};
use crate::schema;

/// Media record row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::media_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MediaRecordRow {
    pub id: String,
    pub kind: String,
    pub storage_key: String,
    pub thumbnail_key: Option<String>,
    pub content_hash: Option<String>,
    pub source_channel_id: String,
    pub source_message_id: String,
    pub text_content: Option<String>,
    pub source_timestamp: Option<String>,
    pub duration_seconds: Option<f64>,
    pub available: i32,
    pub ingested_at: String,
}

impl MediaRecordRow {
    pub fn into_model(self) -> MediaRecord {
        MediaRecord {
            // Unrecognized kinds cannot appear: classification is mandatory
            // before a record is written.
            kind: MediaKind::from_str(&self.kind).unwrap_or(MediaKind::Image),
            id: self.id,
            storage_key: self.storage_key,
            thumbnail_key: self.thumbnail_key,
            content_hash: self.content_hash,
            source_channel_id: self.source_channel_id,
            source_message_id: self.source_message_id,
            text_content: self.text_content,
            source_timestamp: parse_datetime_opt(self.source_timestamp),
            duration_seconds: self.duration_seconds,
            available: self.available != 0,
            ingested_at: parse_datetime(&self.ingested_at),
        }
    }
}

/// New media record for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::media_records)]
pub struct NewMediaRecord<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub storage_key: &'a str,
    pub thumbnail_key: Option<&'a str>,
    pub content_hash: Option<&'a str>,
    pub source_channel_id: &'a str,
    pub source_message_id: &'a str,
    pub text_content: Option<&'a str>,
    pub source_timestamp: Option<String>,
    pub duration_seconds: Option<f64>,
    pub available: i32,
    pub ingested_at: String,
}

impl<'a> NewMediaRecord<'a> {
    pub fn from_model(record: &'a MediaRecord) -> Self {
        Self {
            id: &record.id,
            kind: record.kind.as_str(),
            storage_key: &record.storage_key,
            thumbnail_key: record.thumbnail_key.as_deref(),
            content_hash: record.content_hash.as_deref(),
            source_channel_id: &record.source_channel_id,
            source_message_id: &record.source_message_id,
            text_content: record.text_content.as_deref(),
            source_timestamp: record.source_timestamp.map(|dt| dt.to_rfc3339()),
            duration_seconds: record.duration_seconds,
            available: i32::from(record.available),
            ingested_at: record.ingested_at.to_rfc3339(),
        }
    }
}

/// Failed URL row from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::failed_urls)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FailedUrlRow {
    pub url: String,
    pub reason: String,
    pub attempts: i32,
    pub first_failed_at: String,
    pub last_attempt_at: String,
}

impl FailedUrlRow {
    pub fn into_model(self) -> FailedUrl {
        FailedUrl {
            url: self.url,
            reason: self.reason,
            attempts: self.attempts,
            first_failed_at: parse_datetime(&self.first_failed_at),
            last_attempt_at: parse_datetime(&self.last_attempt_at),
        }
    }
}

/// New failed URL for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::failed_urls)]
pub struct NewFailedUrl<'a> {
    pub url: &'a str,
    pub reason: &'a str,
    pub attempts: i32,
    pub first_failed_at: String,
    pub last_attempt_at: String,
}
