use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::app::ports::{SourcePayload, SourcePort};
use crate::error::SourceError;

/// Reads a payload from the local filesystem. The fetch time is the file's
/// modification time.
pub struct FileSource {
    path: PathBuf,
    origin: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, origin: &str) -> Self {
        Self {
            path: path.into(),
            origin: origin.to_string(),
        }
    }
}

#[async_trait]
impl SourcePort for FileSource {
    async fn read(&self) -> Result<SourcePayload, SourceError> {
        let unreadable = |e: std::io::Error| SourceError::Unreadable {
            origin: self.origin.clone(),
            detail: format!("{}: {}", self.path.display(), e),
        };
        let bytes = tokio::fs::read(&self.path).await.map_err(unreadable)?;
        let fetched_at = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(SourceError::Empty {
                origin: self.origin.clone(),
            });
        }
        Ok(SourcePayload { bytes, fetched_at })
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let source = FileSource::new("/nonexistent/healthai.json", "x");
        assert!(matches!(source.read().await, Err(SourceError::Unreadable { .. })));
    }

    #[tokio::test]
    async fn test_blank_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.json");
        std::fs::write(&path, "  \n").unwrap();
        let source = FileSource::new(&path, "x");
        assert!(matches!(source.read().await, Err(SourceError::Empty { .. })));
    }
}
