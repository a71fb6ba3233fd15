//! Object key and public URL construction.
//!
//! Every stored object is addressed as `<prefix>/<id>.<ext>` where `id` is 32
//! random bytes in unpadded URL-safe base64. The public URL follows the
//! virtual-hosted S3 scheme `https://<bucket>.<service-host>/<key>`. Callers
//! and tests must go through these helpers rather than formatting keys or URLs
//! themselves.

use crate::models::orientation::OrientationLabel;
use base64::{Engine as _, engine::general_purpose};
use std::fmt;

/// Number of random bytes behind each object id.
const OBJECT_ID_BYTES: usize = 32;

/// Key prefix used for thumbnail images.
pub const THUMBNAIL_PREFIX: &str = "thumbnails";

/// A bucket-relative object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Key for a normalized video: `<label>/<id>.mp4`.
    pub fn for_video(label: OrientationLabel) -> Self {
        Self::with_id(label.as_str(), &random_object_id(), "mp4")
    }

    /// Key for a thumbnail image: `thumbnails/<id>.<ext>`.
    pub fn for_thumbnail(extension: &str) -> Self {
        Self::with_id(THUMBNAIL_PREFIX, &random_object_id(), extension)
    }

    fn with_id(prefix: &str, id: &str, extension: &str) -> Self {
        Self(format!("{}/{}.{}", prefix, id, extension))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Draw a fresh opaque id from the thread-local CSPRNG.
fn random_object_id() -> String {
    let bytes: [u8; OBJECT_ID_BYTES] = rand::random();
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds durable retrieval URLs for objects in one bucket.
#[derive(Debug, Clone)]
pub struct PublicUrlScheme {
    bucket: String,
    service_host: String,
}

impl PublicUrlScheme {
    pub fn new(bucket: impl Into<String>, service_host: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            service_host: service_host.into(),
        }
    }

    /// Scheme for AWS S3 in `region`: host `s3.<region>.amazonaws.com`.
    pub fn aws(bucket: impl Into<String>, region: &str) -> Self {
        Self::new(bucket, aws_service_host(region))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn url_for(&self, key: &ObjectKey) -> String {
        format!("https://{}.{}/{}", self.bucket, self.service_host, key)
    }
}

/// Regional S3 host name.
pub fn aws_service_host(region: &str) -> String {
    format!("s3.{}.amazonaws.com", region)
}
