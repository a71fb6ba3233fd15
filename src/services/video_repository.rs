//! Persistence of video records in SQLite.

use crate::models::video::VideoRecord;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Schema applied by `--migrate` and by in-memory test databases.
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("video `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Record store for videos.
///
/// Each call is a single statement, so updates are atomic per row.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> RepositoryResult<VideoRecord>;

    async fn create(&self, record: &VideoRecord) -> RepositoryResult<()>;

    /// Persist the mutable fields of `record` and return the stored row.
    async fn update(&self, record: &VideoRecord) -> RepositoryResult<VideoRecord>;

    /// Cheap connectivity check used by readiness probes.
    async fn ping(&self) -> RepositoryResult<()>;
}

#[derive(Clone)]
pub struct SqliteVideoRepository {
    db: Arc<SqlitePool>,
}

impl SqliteVideoRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema statement by statement.
    pub async fn migrate(&self) -> RepositoryResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in &statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(statements.len())
    }
}

#[async_trait]
impl VideoRepository for SqliteVideoRepository {
    async fn get(&self, id: Uuid) -> RepositoryResult<VideoRecord> {
        sqlx::query_as::<_, VideoRecord>(
            "SELECT id, user_id, title, description, thumbnail_url, video_url,
                    created_at, updated_at
             FROM videos WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(id),
            other => RepositoryError::Sqlx(other),
        })
    }

    async fn create(&self, record: &VideoRecord) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO videos (id, user_id, title, description, thumbnail_url, video_url,
                                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.thumbnail_url)
        .bind(&record.video_url)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn update(&self, record: &VideoRecord) -> RepositoryResult<VideoRecord> {
        sqlx::query_as::<_, VideoRecord>(
            r#"
            UPDATE videos SET
                title = ?,
                description = ?,
                thumbnail_url = ?,
                video_url = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING id, user_id, title, description, thumbnail_url, video_url,
                      created_at, updated_at
            "#,
        )
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.thumbnail_url)
        .bind(&record.video_url)
        .bind(Utc::now())
        .bind(record.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(record.id),
            other => RepositoryError::Sqlx(other),
        })
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    /// Migrated repository over a private in-memory database.
    pub async fn memory_repository() -> SqliteVideoRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteVideoRepository::new(Arc::new(pool));
        repo.migrate().await.unwrap();
        repo
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::memory_repository;
    use super::*;
    use crate::models::video::CreateVideoParams;

    fn draft(owner: Uuid) -> VideoRecord {
        VideoRecord::draft(
            owner,
            CreateVideoParams {
                title: "boots".into(),
                description: "a walk in the park".into(),
            },
        )
    }

    #[tokio::test]
    async fn created_records_round_trip() {
        let repo = memory_repository().await;
        let record = draft(Uuid::new_v4());
        repo.create(&record).await.unwrap();

        let loaded = repo.get(record.id).await.unwrap();
        assert_eq!(loaded.user_id, record.user_id);
        assert_eq!(loaded.title, "boots");
        assert_eq!(loaded.video_url, None);
    }

    #[tokio::test]
    async fn update_sets_url_and_touches_timestamp() {
        let repo = memory_repository().await;
        let mut record = draft(Uuid::new_v4());
        repo.create(&record).await.unwrap();

        record.video_url = Some("https://b.s3.us-east-1.amazonaws.com/landscape/x.mp4".into());
        let updated = repo.update(&record).await.unwrap();
        assert_eq!(updated.video_url, record.video_url);
        assert!(updated.updated_at >= record.updated_at);
        assert_eq!(repo.get(record.id).await.unwrap().video_url, record.video_url);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let repo = memory_repository().await;
        let missing = draft(Uuid::new_v4());

        assert!(matches!(
            repo.get(missing.id).await,
            Err(RepositoryError::NotFound(id)) if id == missing.id
        ));
        assert!(matches!(
            repo.update(&missing).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ping_succeeds_on_live_pool() {
        memory_repository().await.ping().await.unwrap();
    }

    #[tokio::test]
    async fn migration_can_be_rerun() {
        let repo = memory_repository().await;
        assert_eq!(repo.migrate().await.unwrap(), 2);
    }
}
