//! Fast-start remuxing through `ffmpeg`.
//!
//! Streams are copied verbatim (`-c copy`); only the container layout
//! changes so the `moov` index precedes the sample data.

use crate::services::process::{ToolCommand, ToolError};
use async_trait::async_trait;
use std::{ffi::OsStr, path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Rewrites `input` into `output` with a progressive-playback layout.
///
/// `output` already exists as an empty scratch file owned by the caller and
/// is overwritten. On error its contents must be considered garbage.
#[async_trait]
pub trait ContainerNormalizer: Send + Sync {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<(), NormalizeError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegNormalizer {
    tool: ToolCommand,
}

impl FfmpegNormalizer {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            tool: ToolCommand::new(program, timeout),
        }
    }
}

#[async_trait]
impl ContainerNormalizer for FfmpegNormalizer {
    #[tracing::instrument(skip(self), fields(program = %self.tool.program()))]
    async fn normalize(&self, input: &Path, output: &Path) -> Result<(), NormalizeError> {
        self.tool
            .run([
                OsStr::new("-y"),
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-i"),
                input.as_os_str(),
                OsStr::new("-c"),
                OsStr::new("copy"),
                OsStr::new("-movflags"),
                OsStr::new("faststart"),
                OsStr::new("-f"),
                OsStr::new("mp4"),
                output.as_os_str(),
            ])
            .await?;
        Ok(())
    }
}
