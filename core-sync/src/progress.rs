//! Progress Store
//!
//! Persists the most recent fully committed [`DateContext`], the high-water
//! mark a later run resumes from. The marker only ever moves forward:
//! [`ProgressStore::save`] ignores contexts at or below the current one.
//!
//! The file format is a single line:
//!
//! ```text
//! sync_date: 2024/01 january/06
//! ```

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use core_library::{DateContext, FileMapping};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Key written before the context in the marker file.
pub const MARKER_KEY: &str = "sync_date";

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Reads the marker; `None` when nothing has been committed.
    async fn load(&self) -> Result<Option<DateContext>>;

    /// Overwrites the stored marker unconditionally.
    async fn write_marker(&self, context: DateContext) -> Result<()>;

    /// Whether `candidate` is at or below the marker.
    async fn is_processed(&self, candidate: DateContext) -> Result<bool> {
        Ok(self
            .load()
            .await?
            .map_or(false, |marker| candidate <= marker))
    }

    /// Advances the marker to `context`.
    ///
    /// Returns `false` without writing when `context` is already processed.
    async fn save(&self, context: DateContext) -> Result<bool> {
        if self.is_processed(context).await? {
            debug!(context = %context, "Context already processed, marker unchanged");
            return Ok(false);
        }

        self.write_marker(context).await?;
        Ok(true)
    }
}

/// Marker kept in a small text file.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    path: PathBuf,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, message: impl Into<String>) -> SyncError {
        SyncError::Progress {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    fn parse(&self, contents: &str) -> Result<Option<DateContext>> {
        let Some(line) = contents.lines().next().filter(|l| !l.trim().is_empty()) else {
            return Ok(None);
        };

        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| self.error(format!("malformed marker line '{}'", line)))?;
        if key.trim() != MARKER_KEY {
            return Err(self.error(format!("unexpected key '{}'", key.trim())));
        }

        let value = value.trim();
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse()
            .map(Some)
            .map_err(|e| self.error(format!("{}", e)))
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn load(&self) -> Result<Option<DateContext>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => self.parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.error(e.to_string())),
        }
    }

    async fn write_marker(&self, context: DateContext) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(e.to_string()))?;
        }

        // Write then rename so a crash never leaves a truncated marker.
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, format!("{}: {}", MARKER_KEY, context))
            .await
            .map_err(|e| self.error(e.to_string()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| self.error(e.to_string()))?;

        info!(context = %context, "Saved progress marker");
        Ok(())
    }
}

/// Drops mappings whose context is already processed.
///
/// The marker is read once for the whole list.
pub async fn retain_unprocessed(
    store: &dyn ProgressStore,
    mut mappings: Vec<FileMapping>,
) -> Result<Vec<FileMapping>> {
    let Some(marker) = store.load().await? else {
        return Ok(mappings);
    };

    let before = mappings.len();
    mappings.retain(|m| m.context() > marker);
    info!(
        marker = %marker,
        skipped = before - mappings.len(),
        remaining = mappings.len(),
        "Filtered processed date contexts"
    );
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(s: &str) -> DateContext {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_means_nothing_processed() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path().join("state").join("sync_state.txt"));

        assert_eq!(store.load().await.unwrap(), None);
        assert!(!store.is_processed(ctx("1970/01 january/01")).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_writes_marker_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("sync_state.txt");
        let store = FileProgressStore::new(&path);

        assert!(store.save(ctx("2024/01 january/05")).await.unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "sync_date: 2024/01 january/05");
        assert_eq!(store.load().await.unwrap(), Some(ctx("2024/01 january/05")));
    }

    #[tokio::test]
    async fn test_monotonic_resume() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path().join("sync_state.txt"));

        for c in ["2023/12 december/31", "2024/01 january/05", "2024/02 february/01"] {
            assert!(store.save(ctx(c)).await.unwrap());
        }

        assert!(store.is_processed(ctx("2023/06 june/01")).await.unwrap());
        assert!(store.is_processed(ctx("2024/01 january/05")).await.unwrap());
        assert!(store.is_processed(ctx("2024/02 february/01")).await.unwrap());
        assert!(!store.is_processed(ctx("2024/02 february/02")).await.unwrap());
        assert!(!store.is_processed(ctx("2025/01 january/01")).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_never_moves_backwards() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path().join("sync_state.txt"));

        assert!(store.save(ctx("2024/03 march/01")).await.unwrap());
        assert!(!store.save(ctx("2024/02 february/01")).await.unwrap());
        assert!(!store.save(ctx("2024/03 march/01")).await.unwrap());

        assert_eq!(store.load().await.unwrap(), Some(ctx("2024/03 march/01")));
    }

    #[tokio::test]
    async fn test_malformed_marker_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync_state.txt");
        let store = FileProgressStore::new(&path);

        std::fs::write(&path, "last: 2024/01 january/05").unwrap();
        assert!(matches!(store.load().await, Err(SyncError::Progress { .. })));

        std::fs::write(&path, "sync_date: 2024/01 jan/05").unwrap();
        assert!(store.load().await.is_err());

        std::fs::write(&path, "").unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retain_unprocessed() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path().join("sync_state.txt"));
        let mappings = vec![
            FileMapping::new("/in/a", "/out/2024/01 january/04/a").unwrap(),
            FileMapping::new("/in/b", "/out/2024/01 january/05/b").unwrap(),
            FileMapping::new("/in/c", "/out/2024/01 january/06/c").unwrap(),
        ];

        let all = retain_unprocessed(&store, mappings.clone()).await.unwrap();
        assert_eq!(all.len(), 3);

        store.save(ctx("2024/01 january/05")).await.unwrap();
        let remaining = retain_unprocessed(&store, mappings).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].context(), ctx("2024/01 january/06"));
    }
}
