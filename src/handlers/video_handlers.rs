//! HTTP handlers for video records and their media uploads.
//! File parts are streamed straight into the ingestion pipeline; nothing is
//! buffered here beyond what the multipart parser holds.

use crate::{
    errors::AppError,
    models::video::{CreateVideoParams, VideoRecord},
    services::{
        auth::bearer_token,
        ingest_service::{IngestError, IngestService, Upload},
    },
};
use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode},
};
use futures::TryStreamExt;
use tracing::warn;
use uuid::Uuid;

/// Form field carrying the video bytes.
const VIDEO_FIELD: &str = "video";
/// Form field carrying the thumbnail bytes.
const THUMBNAIL_FIELD: &str = "thumbnail";

/// `POST /api/video_upload/{video_id}`
///
/// Authorizes the caller against the record before touching the body, then
/// runs the ingestion pipeline on the `video` part.
pub async fn upload_video(
    State(service): State<IngestService>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VideoRecord>, AppError> {
    let video_id = parse_video_id(&video_id)?;
    let user_id = caller(&service, &headers)?;
    let record = service.authorize(video_id, user_id).await?;

    let limit = service.limits().max_video_bytes;
    let mut multipart = multipart.map_err(|rej| IngestError::MalformedUpload(rej.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }
        let upload = Upload {
            content_type: field.content_type().map(str::to_owned),
            body: field.map_err(move |err| multipart_error(err, limit)),
        };
        let updated = service.ingest_video(record, upload).await?;
        return Ok(Json(updated));
    }

    Err(IngestError::MissingField(VIDEO_FIELD).into())
}

/// `POST /api/thumbnail_upload/{video_id}`
pub async fn upload_thumbnail(
    State(service): State<IngestService>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VideoRecord>, AppError> {
    let video_id = parse_video_id(&video_id)?;
    let user_id = caller(&service, &headers)?;
    let record = service.authorize(video_id, user_id).await?;

    let limit = service.limits().max_thumbnail_bytes;
    let mut multipart = multipart.map_err(|rej| IngestError::MalformedUpload(rej.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        if field.name() != Some(THUMBNAIL_FIELD) {
            continue;
        }
        let upload = Upload {
            content_type: field.content_type().map(str::to_owned),
            body: field.map_err(move |err| multipart_error(err, limit)),
        };
        let updated = service.ingest_thumbnail(record, upload).await?;
        return Ok(Json(updated));
    }

    Err(IngestError::MissingField(THUMBNAIL_FIELD).into())
}

/// `POST /api/videos`: create an empty draft owned by the caller.
pub async fn create_video(
    State(service): State<IngestService>,
    headers: HeaderMap,
    Json(params): Json<CreateVideoParams>,
) -> Result<(StatusCode, Json<VideoRecord>), AppError> {
    let user_id = caller(&service, &headers)?;
    let record = service.create_video(user_id, params).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /api/videos/{video_id}`: fetch a record owned by the caller.
pub async fn get_video(
    State(service): State<IngestService>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<VideoRecord>, AppError> {
    let video_id = parse_video_id(&video_id)?;
    let user_id = caller(&service, &headers)?;
    let record = service.authorize(video_id, user_id).await?;
    Ok(Json(record))
}

fn parse_video_id(raw: &str) -> Result<Uuid, IngestError> {
    Uuid::parse_str(raw).map_err(|_| IngestError::InvalidId(raw.to_string()))
}

/// Resolve the user behind the request's bearer token.
fn caller(service: &IngestService, headers: &HeaderMap) -> Result<Uuid, IngestError> {
    let token = bearer_token(headers)
        .map_err(IngestError::from)
        .inspect_err(|err| warn!(error = %err, "request without usable credentials"))?;
    service.authenticate(token)
}

/// Map multipart parser failures, keeping body-limit hits distinct.
fn multipart_error(err: MultipartError, limit: u64) -> IngestError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IngestError::PayloadTooLarge { limit }
    } else {
        IngestError::MalformedUpload(err.body_text())
    }
}
