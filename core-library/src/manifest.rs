//! Library manifest records
//!
//! A manifest is a JSON export of the collection:
//!
//! ```json
//! {
//!   "allow_ids": ["109970693"],
//!   "records": [
//!     {
//!       "id": "109970693",
//!       "location": "file://localhost/Volumes/music/haircuts%20for%20men.aiff",
//!       "date_added": "2023-04-27",
//!       "artist": "haircuts for men",
//!       "album": "京都コネクション",
//!       "genre": "Lounge/Ambient"
//!     }
//!   ]
//! }
//! ```
//!
//! `location` is percent-encoded and rooted at a collection prefix
//! (`file://localhost` by default). `allow_ids`, when present and non-empty,
//! restricts which records produce mappings.

use crate::error::{LibraryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One track entry of the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub id: String,
    /// URI-like, percent-encoded file location
    pub location: String,
    /// `YYYY-MM-DD`
    pub date_added: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

impl ManifestRecord {
    /// Local filesystem path of the record.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the location is not under `collection_prefix` or
    /// is not valid percent-encoded UTF-8.
    pub fn source_path(&self, collection_prefix: &str) -> Result<PathBuf> {
        let relative = self
            .location
            .strip_prefix(collection_prefix)
            .ok_or_else(|| LibraryError::InvalidInput {
                field: "location".to_string(),
                message: format!("'{}' is not under '{}'", self.location, collection_prefix),
            })?;

        let decoded = urlencoding::decode(relative).map_err(|e| LibraryError::InvalidInput {
            field: "location".to_string(),
            message: e.to_string(),
        })?;

        if decoded.starts_with('/') {
            Ok(PathBuf::from(decoded.as_ref()))
        } else {
            Ok(Path::new("/").join(decoded.as_ref()))
        }
    }
}

/// A collection export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub records: Vec<ManifestRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_ids: Option<HashSet<String>>,
}

impl Manifest {
    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| LibraryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let manifest = Self::from_json_str(&contents)?;
        debug!(
            records = manifest.records.len(),
            allow_list = manifest.allow_ids.as_ref().is_some_and(|ids| !ids.is_empty()),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Whether `record` passes the allow list. An empty list filters nothing.
    pub fn is_allowed(&self, record: &ManifestRecord) -> bool {
        match &self.allow_ids {
            Some(ids) if !ids.is_empty() => ids.contains(&record.id),
            _ => true,
        }
    }
}
