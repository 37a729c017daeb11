//! Delivery of finished recordings

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::AppError;

/// Receives a finished recording file
pub trait DownloadSink {
    /// Store `data` under `file_name`, returning where it went
    fn deliver(&mut self, file_name: &str, data: &[u8]) -> Result<PathBuf, AppError>;
}

/// Writes recordings into a directory, creating it if needed
#[derive(Debug, Clone)]
pub struct FileDownloads {
    dir: PathBuf,
}

impl FileDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for FileDownloads {
    fn deliver(&mut self, file_name: &str, data: &[u8]) -> Result<PathBuf, AppError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            AppError::RecordingSave(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        let path = self.dir.join(file_name);
        std::fs::write(&path, data)
            .map_err(|e| AppError::RecordingSave(format!("cannot write {}: {}", path.display(), e)))?;

        tracing::info!("Saved recording {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }
}

/// `recording-2024-05-01T12-30-00.000Z.webm`
pub fn recording_file_name(at: DateTime<Utc>, extension: &str) -> String {
    let stamp = at.to_rfc3339_opts(SecondsFormat::Millis, true).replace(':', "-");
    format!("recording-{}.{}", stamp, extension)
}
