//! Represents a video record owned by a user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A video entry as persisted in the `videos` table.
///
/// The ingestion pipeline never creates these from scratch; it only fills
/// in `video_url` or `thumbnail_url` on a record that already exists.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct VideoRecord {
    /// Unique identifier, taken from the request path.
    pub id: Uuid,

    /// Identity of the user that owns this video.
    pub user_id: Uuid,

    pub title: String,

    pub description: String,

    /// Public URL of the thumbnail image, once uploaded.
    pub thumbnail_url: Option<String>,

    /// Public URL of the normalized video, once ingested.
    pub video_url: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /api/videos`.
#[derive(Deserialize, Debug)]
pub struct CreateVideoParams {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl VideoRecord {
    /// Build a fresh draft record for `user_id` with no media attached.
    pub fn draft(user_id: Uuid, params: CreateVideoParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: params.title,
            description: params.description,
            thumbnail_url: None,
            video_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}
