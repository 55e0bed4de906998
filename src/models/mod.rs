//! Core data models for the dual-destination drive.
//!
//! File records map onto the `files` table via a hand-written `sqlx::FromRow`
//! and serialize as JSON via `serde` for the presentation feed.

pub mod file_record;
pub mod principal;
pub mod storage_mode;
