//! Core data models for the video ingestion service.
//!
//! `video` maps to the `videos` table via `sqlx::FromRow` and serializes as
//! JSON via `serde`; `orientation` holds the geometry classification.

pub mod orientation;
pub mod video;
