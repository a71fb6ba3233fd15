//! Geometry probing through `ffprobe`.
//!
//! The prober asks for a JSON description of every stream in the container
//! and takes the first stream's width and height as the video's geometry.
//! Stream types are not inspected: a container that lists an audio or data
//! stream first yields that stream's dimensions, or `InvalidGeometry` when it
//! has none.

use crate::{
    models::orientation::StreamGeometry,
    services::process::{ToolCommand, ToolError},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::{ffi::OsStr, path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("failed to parse probe output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no streams found in video file")]
    NoStreamsFound,
    #[error("first stream reports no usable dimensions ({width:?}x{height:?})")]
    InvalidGeometry {
        width: Option<u32>,
        height: Option<u32>,
    },
}

/// Reads the frame geometry of a fully written media file.
#[async_trait]
pub trait GeometryProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<StreamGeometry, ProbeError>;
}

/// `ffprobe`-backed prober. Spawns exactly one process per call.
///
/// A first stream without positive width and height is rejected with
/// `ProbeError::InvalidGeometry` instead of being classified as 0x0.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    tool: ToolCommand,
}

impl FfprobeProber {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            tool: ToolCommand::new(program, timeout),
        }
    }
}

#[async_trait]
impl GeometryProber for FfprobeProber {
    #[tracing::instrument(skip(self), fields(program = %self.tool.program()))]
    async fn probe(&self, path: &Path) -> Result<StreamGeometry, ProbeError> {
        let output = self
            .tool
            .run([
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-print_format"),
                OsStr::new("json"),
                OsStr::new("-show_streams"),
                path.as_os_str(),
            ])
            .await?;

        parse_geometry(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<StreamDescriptor>,
}

#[derive(Debug, Deserialize)]
struct StreamDescriptor {
    width: Option<u32>,
    height: Option<u32>,
}

/// Extract the first stream's geometry from `ffprobe -print_format json` output.
pub fn parse_geometry(report: &[u8]) -> Result<StreamGeometry, ProbeError> {
    let report: ProbeReport = serde_json::from_slice(report)?;
    let first = report.streams.first().ok_or(ProbeError::NoStreamsFound)?;

    match (first.width, first.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => {
            Ok(StreamGeometry { width, height })
        }
        (width, height) => Err(ProbeError::InvalidGeometry { width, height }),
    }
}
