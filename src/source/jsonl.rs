//! JSON-lines archives
//!
//! One [`RawRecord`] JSON object per line, field names as in the native
//! record (`type`, `date`, `composedMessage`, `logType`, ...). Blank lines are
//! skipped. An archive is read fully into a [`MemorySource`] when opened.

use crate::source::error::{SourceError, SourceResult};
use crate::source::memory::MemorySource;
use crate::source::record::RawRecord;
use crate::source::{LogSource, SourceOpener};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

/// Read a JSON-lines archive into memory
pub async fn load_jsonl(path: &Path) -> SourceResult<MemorySource> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SourceError::Unavailable(format!("archive not found: {}", path.display()))
        } else {
            SourceError::from(e)
        }
    })?;

    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: RawRecord =
            serde_json::from_str(line).map_err(|e| SourceError::Malformed {
                line: index + 1,
                error: e.to_string(),
            })?;
        records.push(record);
    }

    debug!(path = %path.display(), records = records.len(), "Read archive");
    Ok(MemorySource::new(path.display().to_string(), records))
}

/// Write records as a JSON-lines archive, replacing any existing file
pub async fn write_jsonl(path: &Path, records: &[RawRecord]) -> SourceResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut buffer = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| SourceError::Io(format!("failed to encode record: {}", e)))?;
        buffer.push_str(&line);
        buffer.push('\n');
    }

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(buffer.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Resolves `file://` URLs and plain paths to JSON-lines archives
#[derive(Debug, Clone)]
pub struct JsonlOpener {
    bulk_streaming: bool,
}

impl Default for JsonlOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonlOpener {
    pub fn new() -> Self {
        Self {
            bulk_streaming: true,
        }
    }

    /// Opened sources report no bulk streaming, forcing the predicate path
    pub fn without_bulk_streaming(mut self) -> Self {
        self.bulk_streaming = false;
        self
    }

    /// Local path for a `file:` URL (percent-decoded) or a plain path
    pub fn resolve(location: &str) -> SourceResult<PathBuf> {
        match Url::parse(location) {
            Ok(url) if url.scheme() == "file" => url.to_file_path().map_err(|_| {
                SourceError::Unavailable(format!("not a local file URL: {}", location))
            }),
            _ => Ok(PathBuf::from(location)),
        }
    }
}

#[async_trait]
impl SourceOpener for JsonlOpener {
    async fn open(&self, url: &str) -> SourceResult<Arc<dyn LogSource>> {
        let path = Self::resolve(url)?;
        let mut source = load_jsonl(&path).await?;
        if !self.bulk_streaming {
            source = source.without_bulk_streaming();
        }
        info!(url, records = source.len(), "Opened archive");
        Ok(Arc::new(source))
    }
}
