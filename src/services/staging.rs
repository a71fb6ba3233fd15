//! Private scratch files backing one request.
//!
//! A `StagedFile` is removed from disk when it is dropped, so every exit path
//! of the pipeline releases the files it created. Names come from `tempfile`
//! and are unique per file, which keeps concurrent requests apart.

use std::{
    io,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const STAGED_PREFIX: &str = "video-ingest-";

/// Directory in which staged files are created.
#[derive(Debug, Clone)]
pub struct ScratchArea {
    dir: PathBuf,
}

impl ScratchArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Scratch area under the operating system's temp directory.
    pub fn system() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create an empty private file named `video-ingest-<role>-<random><suffix>`.
    pub fn create(&self, role: &str, suffix: &str) -> io::Result<StagedFile> {
        let inner = tempfile::Builder::new()
            .prefix(&format!("{}{}-", STAGED_PREFIX, role))
            .suffix(suffix)
            .tempfile_in(&self.dir)?;
        debug!(path = %inner.path().display(), "created staged file");
        Ok(StagedFile { inner })
    }
}

/// A scratch file owned by exactly one request.
#[derive(Debug)]
pub struct StagedFile {
    inner: NamedTempFile,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Async handle sharing the underlying file descriptor.
    pub fn writer(&self) -> io::Result<tokio::fs::File> {
        Ok(tokio::fs::File::from_std(self.inner.as_file().try_clone()?))
    }

    /// Delete the file now, logging rather than failing if removal goes wrong.
    pub fn discard(self) {
        let path = self.inner.path().to_path_buf();
        match self.inner.close() {
            Ok(()) => debug!(path = %path.display(), "removed staged file"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove staged file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn staged_files_live_in_the_scratch_dir_until_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchArea::new(tmp.path());

        let staged = scratch.create("upload", ".mp4").unwrap();
        let name = staged.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("video-ingest-upload-"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(staged.path().parent(), Some(tmp.path()));

        let mut writer = staged.writer().unwrap();
        writer.write_all(b"payload").await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"payload");

        drop(writer);
        drop(staged);
        assert_eq!(entries(tmp.path()), 0);
    }

    #[test]
    fn discard_removes_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchArea::new(tmp.path());
        let a = scratch.create("upload", ".mp4").unwrap();
        let b = scratch.create("upload", ".mp4").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(entries(tmp.path()), 2);

        a.discard();
        assert_eq!(entries(tmp.path()), 1);
        drop(b);
        assert_eq!(entries(tmp.path()), 0);
    }

    #[test]
    fn missing_scratch_dir_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchArea::new(tmp.path().join("gone"));
        assert!(scratch.create("upload", ".mp4").is_err());
    }
}
