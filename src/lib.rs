//! Mediakeep - Discord media acquisition and archival system.
//!
//! Continuously harvests images and videos referenced in Discord messages,
//! deduplicates them by content hash, trims oversized video, generates
//! thumbnails, and persists everything as content-addressed objects plus
//! searchable catalog records.

pub mod cli;
pub mod config;
pub mod discord;
pub mod harvest;
pub mod models;
pub mod repository;
pub mod schema;
pub mod storage;
