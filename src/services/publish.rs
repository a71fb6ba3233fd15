//! Uploading staged artifacts to the remote content bucket.
//!
//! Publishing is a single attempt. The S3 client is built with retries turned
//! off and without a request timeout; an optional overall deadline can be
//! configured per publisher.

use crate::services::keys::ObjectKey;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore, PutOptions, PutPayload, RetryConfig,
    aws::AmazonS3Builder, buffered::BufWriter, path::Path as ObjectPath,
};
use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to open `{path}` for upload: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("upload of `{key}` failed: {source}")]
    Transfer {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("upload of `{key}` failed: {source}")]
    Store {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("upload of `{key}` did not finish within {after:?}")]
    TimedOut {
        key: String,
        after: Duration,
    },
    #[error("invalid object store configuration: {0}")]
    Config(#[source] object_store::Error),
}

/// Puts objects into the content bucket.
///
/// The stored content type is whatever the caller passes; it is never sniffed
/// from the bytes.
#[async_trait]
pub trait ObjectPublisher: Send + Sync {
    /// Stream the file at `path` to `key`.
    async fn publish_file(
        &self,
        path: &Path,
        key: &ObjectKey,
        content_type: &str,
    ) -> Result<(), PublishError>;

    /// Store an in-memory blob at `key`.
    async fn publish_bytes(
        &self,
        bytes: Bytes,
        key: &ObjectKey,
        content_type: &str,
    ) -> Result<(), PublishError>;
}

/// Publisher over any `object_store` backend.
#[derive(Clone)]
pub struct ObjectStorePublisher {
    store: Arc<dyn ObjectStore>,
    timeout: Option<Duration>,
}

impl ObjectStorePublisher {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Option<Duration>) -> Self {
        Self { store, timeout }
    }

    /// Publisher for an S3 (or S3-compatible) bucket.
    ///
    /// Credentials come from the standard `AWS_*` environment variables.
    /// `endpoint` targets a non-AWS provider such as MinIO.
    pub fn s3(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self, PublishError> {
        let store = s3_builder(bucket, region, endpoint)
            .build()
            .map_err(PublishError::Config)?;
        Ok(Self::new(Arc::new(store), timeout))
    }

    async fn within_deadline<F>(&self, key: &ObjectKey, upload: F) -> Result<(), PublishError>
    where
        F: Future<Output = Result<(), PublishError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, upload).await.unwrap_or_else(|_| {
                Err(PublishError::TimedOut {
                    key: key.to_string(),
                    after: limit,
                })
            }),
            None => upload.await,
        }
    }

    async fn stream_file(
        &self,
        path: &Path,
        key: &ObjectKey,
        content_type: &str,
    ) -> Result<u64, PublishError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|source| PublishError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let mut writer = BufWriter::new(Arc::clone(&self.store), object_path(key))
            .with_attributes(content_attributes(content_type));

        let copy = async {
            let copied = tokio::io::copy(&mut file, &mut writer).await?;
            writer.shutdown().await?;
            Ok::<_, io::Error>(copied)
        };
        let transfer = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, copy).await.map_err(|_| limit),
            None => Ok(copy.await),
        };

        let failure = match transfer {
            Ok(Ok(copied)) => return Ok(copied),
            Ok(Err(source)) => PublishError::Transfer {
                key: key.to_string(),
                source,
            },
            Err(after) => PublishError::TimedOut {
                key: key.to_string(),
                after,
            },
        };

        if let Err(abort_err) = writer.abort().await {
            error!(key = %key, error = %abort_err, "failed to abort partial upload");
        }
        Err(failure)
    }
}

/// Single-attempt S3 client settings: no retries and no client-side request
/// timeout.
fn s3_builder(bucket: &str, region: &str, endpoint: Option<&str>) -> AmazonS3Builder {
    let builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(region)
        .with_retry(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
        .with_client_options(ClientOptions::new().with_timeout_disabled());

    match endpoint {
        Some(endpoint) => builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://")),
        None => builder,
    }
}

#[async_trait]
impl ObjectPublisher for ObjectStorePublisher {
    async fn publish_file(
        &self,
        path: &Path,
        key: &ObjectKey,
        content_type: &str,
    ) -> Result<(), PublishError> {
        let start = Instant::now();
        let size_bytes = self.stream_file(path, key, content_type).await?;
        info!(
            key = %key,
            content_type,
            size_bytes,
            duration_ms = start.elapsed().as_millis() as u64,
            "object upload successful"
        );
        Ok(())
    }

    async fn publish_bytes(
        &self,
        bytes: Bytes,
        key: &ObjectKey,
        content_type: &str,
    ) -> Result<(), PublishError> {
        let start = Instant::now();
        let size_bytes = bytes.len();
        let opts = PutOptions {
            attributes: content_attributes(content_type),
            ..PutOptions::default()
        };

        self.within_deadline(key, async {
            self.store
                .put_opts(&object_path(key), PutPayload::from(bytes), opts)
                .await
                .map_err(|source| PublishError::Store {
                    key: key.to_string(),
                    source,
                })?;
            info!(
                key = %key,
                content_type,
                size_bytes,
                duration_ms = start.elapsed().as_millis() as u64,
                "object upload successful"
            );
            Ok(())
        })
        .await
    }
}

fn object_path(key: &ObjectKey) -> ObjectPath {
    ObjectPath::from(key.as_str())
}

fn content_attributes(content_type: &str) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(Attribute::ContentType, content_type.to_string().into());
    attributes
}
