//! IngestService: the request-scoped pipeline that turns an uploaded video
//! into a published, fast-start object referenced by its record.
//!
//! Stages run strictly in order for one request:
//! authorize → stage → probe → classify → normalize → publish → update record.
//! Any failure aborts the remaining stages. Scratch files are `StagedFile`s
//! owned by the pipeline's stack frame, so they are removed on every exit
//! path. Publishing is the last remote side effect before the record update;
//! if that update fails the uploaded object is logged as dangling.

use crate::{
    models::video::{CreateVideoParams, VideoRecord},
    services::{
        auth::{AuthError, TokenVerifier},
        keys::{ObjectKey, PublicUrlScheme},
        normalize::{ContainerNormalizer, NormalizeError},
        probe::{GeometryProber, ProbeError},
        publish::{ObjectPublisher, PublishError},
        staging::{ScratchArea, StagedFile},
        video_repository::{RepositoryError, VideoRepository},
    },
};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use std::{io, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::{
    io::{AsyncSeekExt, AsyncWriteExt},
    task::JoinError,
};
use tracing::{Instrument, Span, error, info, warn};
use uuid::Uuid;

/// The only container type accepted for video uploads.
pub const VIDEO_MEDIA_TYPE: &str = "video/mp4";

/// Accepted thumbnail types and the extension used for their keys.
const THUMBNAIL_MEDIA_TYPES: [(&str, &str); 2] = [("image/jpeg", "jpg"), ("image/png", "png")];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid video id `{0}`")]
    InvalidId(String),
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    #[error("video `{0}` not found")]
    VideoNotFound(Uuid),
    #[error("not authorized to modify video `{0}`")]
    NotOwner(Uuid),
    #[error("missing `{0}` form field")]
    MissingField(&'static str),
    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),
    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("malformed upload: {0}")]
    MalformedUpload(String),
    #[error("could not stage upload: {0}")]
    Staging(#[source] io::Error),
    #[error("could not probe video: {0}")]
    Probe(#[from] ProbeError),
    #[error("could not normalize video: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("could not publish object: {0}")]
    Publish(#[from] PublishError),
    #[error("could not load video: {0}")]
    Lookup(#[source] RepositoryError),
    #[error("could not create video: {0}")]
    CreateRecord(#[source] RepositoryError),
    #[error("could not update video: {0}")]
    RecordUpdate(#[source] RepositoryError),
    #[error("ingestion task ended abnormally: {0}")]
    Task(#[source] JoinError),
}

impl IngestError {
    /// HTTP status: 4xx when the caller is at fault, 5xx when a dependency is.
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::InvalidId(_)
            | IngestError::MissingField(_)
            | IngestError::UnsupportedMediaType(_)
            | IngestError::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthorized(_) | IngestError::NotOwner(_) => StatusCode::UNAUTHORIZED,
            IngestError::VideoNotFound(_) => StatusCode::NOT_FOUND,
            IngestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::Staging(_)
            | IngestError::Probe(_)
            | IngestError::Normalize(_)
            | IngestError::Publish(_)
            | IngestError::Lookup(_)
            | IngestError::CreateRecord(_)
            | IngestError::RecordUpdate(_)
            | IngestError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Pipeline stage at which the request failed.
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::InvalidId(_)
            | IngestError::Unauthorized(_)
            | IngestError::VideoNotFound(_)
            | IngestError::NotOwner(_)
            | IngestError::Lookup(_) => "authorize",
            IngestError::MissingField(_)
            | IngestError::UnsupportedMediaType(_)
            | IngestError::PayloadTooLarge { .. }
            | IngestError::MalformedUpload(_)
            | IngestError::Staging(_) => "stage",
            IngestError::Probe(_) => "probe",
            IngestError::Normalize(_) => "normalize",
            IngestError::Publish(_) => "publish",
            IngestError::RecordUpdate(_) => "update_record",
            IngestError::CreateRecord(_) => "create_record",
            IngestError::Task(_) => "process",
        }
    }

    /// Message safe to return to the client.
    ///
    /// Caller errors are described in full; dependency errors only name the
    /// failed stage, the details go to the log.
    pub fn public_message(&self) -> String {
        match self {
            IngestError::Staging(_) => "Couldn't save upload".into(),
            IngestError::Probe(_) => "Couldn't read video geometry".into(),
            IngestError::Normalize(_) => "Couldn't process video".into(),
            IngestError::Publish(_) => "Couldn't upload video".into(),
            IngestError::Lookup(_) => "Couldn't get video".into(),
            IngestError::RecordUpdate(_) => "Couldn't update video".into(),
            IngestError::CreateRecord(_) => "Couldn't create video".into(),
            IngestError::Task(_) => "Couldn't process video".into(),
            other => other.to_string(),
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// One file part of a multipart request.
pub struct Upload<S> {
    /// Content type declared on the part, unvalidated.
    pub content_type: Option<String>,
    pub body: S,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_video_bytes: u64,
    pub max_thumbnail_bytes: u64,
}

/// External media capabilities the pipeline drives.
#[derive(Clone)]
pub struct MediaTools {
    pub prober: Arc<dyn GeometryProber>,
    pub normalizer: Arc<dyn ContainerNormalizer>,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub urls: PublicUrlScheme,
    pub scratch: ScratchArea,
    pub limits: UploadLimits,
}

#[derive(Clone)]
pub struct IngestService {
    videos: Arc<dyn VideoRepository>,
    verifier: TokenVerifier,
    media: MediaTools,
    publisher: Arc<dyn ObjectPublisher>,
    settings: IngestSettings,
}

impl IngestService {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        verifier: TokenVerifier,
        media: MediaTools,
        publisher: Arc<dyn ObjectPublisher>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            videos,
            verifier,
            media,
            publisher,
            settings,
        }
    }

    pub fn limits(&self) -> UploadLimits {
        self.settings.limits
    }

    pub fn scratch(&self) -> &ScratchArea {
        &self.settings.scratch
    }

    pub fn videos(&self) -> &Arc<dyn VideoRepository> {
        &self.videos
    }

    /// Resolve the caller from `token`.
    pub fn authenticate(&self, token: &str) -> IngestResult<Uuid> {
        self.verifier
            .verify(token)
            .map_err(IngestError::from)
            .inspect_err(log_failure)
    }

    /// Load `video_id` and require that `user_id` owns it.
    ///
    /// Runs before any staging or remote I/O.
    pub async fn authorize(&self, video_id: Uuid, user_id: Uuid) -> IngestResult<VideoRecord> {
        let result = async {
            let record = self.videos.get(video_id).await.map_err(|err| match err {
                RepositoryError::NotFound(id) => IngestError::VideoNotFound(id),
                other => IngestError::Lookup(other),
            })?;
            if record.user_id != user_id {
                return Err(IngestError::NotOwner(video_id));
            }
            Ok(record)
        }
        .await;
        result.inspect_err(log_failure)
    }

    /// Create a draft record owned by `user_id`.
    pub async fn create_video(
        &self,
        user_id: Uuid,
        params: CreateVideoParams,
    ) -> IngestResult<VideoRecord> {
        let record = VideoRecord::draft(user_id, params);
        self.videos
            .create(&record)
            .await
            .map_err(IngestError::CreateRecord)
            .inspect_err(log_failure)?;
        info!(video_id = %record.id, user_id = %user_id, "created video draft");
        Ok(record)
    }

    /// Run the full video pipeline for an authorized `record`.
    #[tracing::instrument(skip_all, fields(video_id = %record.id, user_id = %record.user_id))]
    pub async fn ingest_video<S>(
        &self,
        record: VideoRecord,
        upload: Upload<S>,
    ) -> IngestResult<VideoRecord>
    where
        S: Stream<Item = IngestResult<Bytes>> + Send,
    {
        let start = Instant::now();
        let result = self.video_pipeline(record, upload).await;
        match &result {
            Ok(record) => info!(
                url = record.video_url.as_deref().unwrap_or_default(),
                duration_ms = start.elapsed().as_millis() as u64,
                "video ingested"
            ),
            Err(err) => log_failure(err),
        }
        result
    }

    async fn video_pipeline<S>(
        &self,
        record: VideoRecord,
        upload: Upload<S>,
    ) -> IngestResult<VideoRecord>
    where
        S: Stream<Item = IngestResult<Bytes>> + Send,
    {
        let media_type = accept_media_type(upload.content_type.as_deref(), &[VIDEO_MEDIA_TYPE])?;

        let original = self
            .stage(upload.body, self.settings.limits.max_video_bytes)
            .await?;

        // Past this point the request future may be dropped; the task is not.
        let service = self.clone();
        tokio::spawn(
            async move { service.process_staged(record, original, media_type).await }
                .instrument(Span::current()),
        )
        .await
        .map_err(IngestError::Task)?
    }

    async fn process_staged(
        &self,
        mut record: VideoRecord,
        original: StagedFile,
        media_type: &'static str,
    ) -> IngestResult<VideoRecord> {
        let geometry = self.media.prober.probe(original.path()).await?;
        let label = geometry.orientation();
        info!(
            width = geometry.width,
            height = geometry.height,
            label = %label,
            "classified upload"
        );

        let normalized = self
            .settings
            .scratch
            .create("faststart", ".mp4")
            .map_err(IngestError::Staging)?;
        self.media
            .normalizer
            .normalize(original.path(), normalized.path())
            .await?;
        original.discard();

        let key = ObjectKey::for_video(label);
        self.publisher
            .publish_file(normalized.path(), &key, media_type)
            .await?;
        normalized.discard();

        record.video_url = Some(self.settings.urls.url_for(&key));
        self.save_with_object(&record, &key).await
    }

    /// Store a thumbnail image for an authorized `record`.
    ///
    /// The image is buffered in memory for this request only.
    #[tracing::instrument(skip_all, fields(video_id = %record.id, user_id = %record.user_id))]
    pub async fn ingest_thumbnail<S>(
        &self,
        record: VideoRecord,
        upload: Upload<S>,
    ) -> IngestResult<VideoRecord>
    where
        S: Stream<Item = IngestResult<Bytes>> + Send,
    {
        let result = async {
            let allowed = THUMBNAIL_MEDIA_TYPES.map(|(media_type, _)| media_type);
            let media_type = accept_media_type(upload.content_type.as_deref(), &allowed)?;
            let extension = THUMBNAIL_MEDIA_TYPES
                .iter()
                .find(|(candidate, _)| *candidate == media_type)
                .map(|(_, ext)| *ext)
                .unwrap_or("jpg");

            let bytes =
                collect_limited(upload.body, self.settings.limits.max_thumbnail_bytes).await?;

            let service = self.clone();
            tokio::spawn(
                async move {
                    service
                        .publish_thumbnail(record, bytes, media_type, extension)
                        .await
                }
                .instrument(Span::current()),
            )
            .await
            .map_err(IngestError::Task)?
        }
        .await;

        match &result {
            Ok(_) => info!("thumbnail stored"),
            Err(err) => log_failure(err),
        }
        result
    }

    async fn publish_thumbnail(
        &self,
        mut record: VideoRecord,
        bytes: Bytes,
        media_type: &'static str,
        extension: &'static str,
    ) -> IngestResult<VideoRecord> {
        let key = ObjectKey::for_thumbnail(extension);
        self.publisher
            .publish_bytes(bytes, &key, media_type)
            .await?;

        record.thumbnail_url = Some(self.settings.urls.url_for(&key));
        self.save_with_object(&record, &key).await
    }

    /// Copy `body` into a fresh staged file, enforcing `limit` as bytes arrive.
    async fn stage<S>(&self, body: S, limit: u64) -> IngestResult<StagedFile>
    where
        S: Stream<Item = IngestResult<Bytes>> + Send,
    {
        let staged = self
            .settings
            .scratch
            .create("upload", ".mp4")
            .map_err(IngestError::Staging)?;
        let mut file = staged.writer().map_err(IngestError::Staging)?;

        let mut size_bytes: u64 = 0;
        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            if size_bytes > limit {
                return Err(IngestError::PayloadTooLarge { limit });
            }
            file.write_all(&chunk).await.map_err(IngestError::Staging)?;
        }
        if size_bytes == 0 {
            return Err(IngestError::MalformedUpload("upload is empty".into()));
        }

        file.flush().await.map_err(IngestError::Staging)?;
        file.sync_all().await.map_err(IngestError::Staging)?;
        file.rewind().await.map_err(IngestError::Staging)?;

        info!(
            size_bytes,
            path = %staged.path().display(),
            "upload staged"
        );
        Ok(staged)
    }

    async fn save_with_object(
        &self,
        record: &VideoRecord,
        key: &ObjectKey,
    ) -> IngestResult<VideoRecord> {
        self.videos.update(record).await.map_err(|err| {
            error!(
                bucket = self.settings.urls.bucket(),
                key = %key,
                error = %err,
                "object uploaded but record update failed; object is dangling"
            );
            IngestError::RecordUpdate(err)
        })
    }
}

/// Validate a declared content type against `allowed`, ignoring parameters
/// and case. Returns the matching canonical type.
pub fn accept_media_type<'a>(declared: Option<&str>, allowed: &[&'a str]) -> IngestResult<&'a str> {
    let declared = declared.unwrap_or_default();
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    allowed
        .iter()
        .copied()
        .find(|candidate| *candidate == essence)
        .ok_or_else(|| IngestError::UnsupportedMediaType(declared.to_string()))
}

async fn collect_limited<S>(body: S, limit: u64) -> IngestResult<Bytes>
where
    S: Stream<Item = IngestResult<Bytes>> + Send,
{
    let mut buf = BytesMut::new();
    pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(IngestError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    if buf.is_empty() {
        return Err(IngestError::MalformedUpload("upload is empty".into()));
    }
    Ok(buf.freeze())
}

fn log_failure(err: &IngestError) {
    if err.status().is_server_error() {
        error!(stage = err.stage(), error = %err, "ingestion failed");
    } else {
        warn!(stage = err.stage(), error = %err, "ingestion rejected");
    }
}
