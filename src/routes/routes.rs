//! Defines routes for the video ingestion API.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz` -> liveness
//!   - `GET  /readyz`  -> readiness (record store + scratch dir)
//!
//! - **Video records**
//!   - `POST /api/videos`            -> create a draft owned by the caller
//!   - `GET  /api/videos/{video_id}` -> fetch one of the caller's videos
//!
//! - **Uploads** (multipart, bearer token required)
//!   - `POST /api/video_upload/{video_id}`     -> field `video`, `video/mp4` only
//!   - `POST /api/thumbnail_upload/{video_id}` -> field `thumbnail`, JPEG or PNG

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        video_handlers::{create_video, get_video, upload_thumbnail, upload_video},
    },
    services::ingest_service::{IngestService, UploadLimits},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Allowance for multipart framing on top of the file-size limit.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Build and return the router for the ingestion API.
///
/// Upload routes carry their own body limits so oversized requests are cut
/// off while streaming rather than after buffering.
pub fn routes(limits: UploadLimits) -> Router<IngestService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Record routes
        .route("/api/videos", post(create_video))
        .route("/api/videos/{video_id}", get(get_video))
        // Upload routes
        .route(
            "/api/video_upload/{video_id}",
            post(upload_video).layer(body_limit(limits.max_video_bytes)),
        )
        .route(
            "/api/thumbnail_upload/{video_id}",
            post(upload_thumbnail).layer(body_limit(limits.max_thumbnail_bytes)),
        )
}

fn body_limit(file_limit: u64) -> DefaultBodyLimit {
    let total = file_limit.saturating_add(MULTIPART_OVERHEAD_BYTES);
    DefaultBodyLimit::max(usize::try_from(total).unwrap_or(usize::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::orientation::StreamGeometry;
    use crate::services::{
        auth::test_support::issue_token,
        ingest_service::test_support::{BUCKET, Fault, Harness, REGION, SECRET},
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BOUNDARY: &str = "ingest-test-boundary";
    const HD: StreamGeometry = StreamGeometry {
        width: 1280,
        height: 720,
    };

    fn app(h: &Harness) -> Router {
        routes(h.service.limits()).with_state(h.service.clone())
    }

    fn multipart_body(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             ignored\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"upload.bin\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(uri: &str, token: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn valid_mp4_upload_updates_the_record() {
        let h = Harness::new(HD, Fault::None).await;
        let uri = format!("/api/video_upload/{}", h.record.id);
        let res = app(&h)
            .oneshot(upload_request(
                &uri,
                Some(&h.token),
                multipart_body("video", "video/mp4", b"ftyp....moov....mdat"),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let url = body["video_url"].as_str().unwrap().to_string();
        let prefix = format!("https://{BUCKET}.s3.{REGION}.amazonaws.com/landscape/");
        assert!(url.starts_with(&prefix), "{url}");
        assert!(url.ends_with(".mp4"));
        assert_eq!(body["id"], json!(h.record.id));

        let persisted = h.service.videos().get(h.record.id).await.unwrap();
        assert_eq!(persisted.video_url.as_deref(), Some(url.as_str()));
        assert_eq!(h.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn non_mp4_upload_is_a_bad_request() {
        let h = Harness::new(HD, Fault::None).await;
        let uri = format!("/api/video_upload/{}", h.record.id);
        let res = app(&h)
            .oneshot(upload_request(
                &uri,
                Some(&h.token),
                multipart_body("video", "video/webm", b"\x1a\x45\xdf\xa3"),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json_body(res).await;
        assert_eq!(body["status"], 400);
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn another_users_token_is_rejected() {
        let h = Harness::new(HD, Fault::None).await;
        let intruder = issue_token(SECRET, Uuid::new_v4(), 3600);
        let uri = format!("/api/video_upload/{}", h.record.id);
        let res = app(&h)
            .oneshot(upload_request(
                &uri,
                Some(&intruder),
                multipart_body("video", "video/mp4", b"data"),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.scratch_entries(), 0);
        let persisted = h.service.videos().get(h.record.id).await.unwrap();
        assert_eq!(persisted.video_url, None);
    }

    #[tokio::test]
    async fn missing_credentials_are_unauthorized() {
        let h = Harness::new(HD, Fault::None).await;
        let uri = format!("/api/video_upload/{}", h.record.id);
        let res = app(&h)
            .oneshot(upload_request(
                &uri,
                None,
                multipart_body("video", "video/mp4", b"data"),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_video_id_is_a_bad_request() {
        let h = Harness::new(HD, Fault::None).await;
        let res = app(&h)
            .oneshot(upload_request(
                "/api/video_upload/not-a-uuid",
                Some(&h.token),
                multipart_body("video", "video/mp4", b"data"),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json_body(res).await;
        assert_eq!(body["error"], "invalid video id `not-a-uuid`");
    }

    #[tokio::test]
    async fn missing_video_field_is_a_bad_request() {
        let h = Harness::new(HD, Fault::None).await;
        let uri = format!("/api/video_upload/{}", h.record.id);
        let res = app(&h)
            .oneshot(upload_request(
                &uri,
                Some(&h.token),
                multipart_body("file", "video/mp4", b"data"),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json_body(res).await;
        assert_eq!(body["error"], "missing `video` form field");
    }

    #[tokio::test]
    async fn oversized_upload_is_payload_too_large() {
        let h = Harness::new(HD, Fault::None).await;
        let uri = format!("/api/video_upload/{}", h.record.id);
        let data = vec![7u8; 4096];
        let res = app(&h)
            .oneshot(upload_request(
                &uri,
                Some(&h.token),
                multipart_body("video", "video/mp4", &data),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(h.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn pipeline_failures_are_server_errors() {
        let h = Harness::new(HD, Fault::Normalize).await;
        let uri = format!("/api/video_upload/{}", h.record.id);
        let res = app(&h)
            .oneshot(upload_request(
                &uri,
                Some(&h.token),
                multipart_body("video", "video/mp4", b"data"),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(res).await;
        assert_eq!(body["error"], "Couldn't process video");
        assert_eq!(h.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn thumbnail_upload_sets_thumbnail_url() {
        let h = Harness::new(HD, Fault::None).await;
        let uri = format!("/api/thumbnail_upload/{}", h.record.id);
        let res = app(&h)
            .oneshot(upload_request(
                &uri,
                Some(&h.token),
                multipart_body("thumbnail", "image/jpeg", b"\xff\xd8\xff"),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let url = body["thumbnail_url"].as_str().unwrap();
        assert!(url.contains("/thumbnails/") && url.ends_with(".jpg"), "{url}");
    }

    #[tokio::test]
    async fn records_can_be_created_and_fetched_by_their_owner() {
        let h = Harness::new(HD, Fault::None).await;
        let res = app(&h)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/videos")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, format!("Bearer {}", h.token))
                    .body(Body::from(r#"{"title":"sunset","description":"beach"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = json_body(res).await;
        assert_eq!(created["user_id"], json!(h.owner));
        assert_eq!(created["video_url"], Value::Null);

        let id = created["id"].as_str().unwrap();
        let res = app(&h)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/videos/{id}"))
                    .header(header::AUTHORIZATION, format!("Bearer {}", h.token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["title"], "sunset");
    }

    #[tokio::test]
    async fn health_endpoints_report_ok() {
        let h = Harness::new(HD, Fault::None).await;
        let res = app(&h)
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app(&h)
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["checks"]["database"]["ok"], true);
        assert_eq!(body["checks"]["scratch"]["ok"], true);
        assert_eq!(h.scratch_entries(), 0);
    }
}
