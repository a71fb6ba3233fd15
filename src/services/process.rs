//! Running external media tools (`ffprobe`, `ffmpeg`) as child processes.

use std::{
    ffi::OsStr,
    io,
    process::{ExitStatus, Output, Stdio},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt carried inside an error.
const STDERR_EXCERPT_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("`{program}` did not finish within {after:?}")]
    TimedOut {
        program: String,
        after: Duration,
    },
}

/// Path and optional time limit of one external tool.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the tool to completion and return its captured output.
    ///
    /// Any non-zero exit is an error. Without a timeout the call waits for as
    /// long as the child runs; with one, the child is killed when it expires.
    /// A child started without a timeout is never killed by this call.
    pub async fn run<I, A>(&self, args: I) -> Result<Output, ToolError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(self.timeout.is_some());

        let start = Instant::now();
        let pending = cmd.output();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ToolError::TimedOut {
                        program: self.program.clone(),
                        after: limit,
                    });
                }
            },
            None => pending.await,
        };

        let output = result.map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        debug!(
            program = %self.program,
            status = %output.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "external tool finished"
        );

        if !output.status.success() {
            return Err(ToolError::Exited {
                program: self.program.clone(),
                status: output.status,
                stderr: stderr_excerpt(&output.stderr),
            });
        }

        Ok(output)
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
