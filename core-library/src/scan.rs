//! Directory-scan mapping source
//!
//! Walks a date-structured input tree and maps every file to the same
//! relative path under an output root. Hidden files and anything inside a
//! hidden directory are ignored.

use crate::error::{LibraryError, Result};
use crate::models::{FileMapping, AUDIO_EXTENSIONS};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, Default)]
pub struct DirectoryScanner {
    /// Lowercase extensions without the dot; `None` accepts every file
    extensions: Option<HashSet<String>>,
}

impl DirectoryScanner {
    /// Scanner accepting every visible file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scanner accepting only the common audio formats.
    pub fn audio() -> Self {
        Self::new().with_extensions(AUDIO_EXTENSIONS)
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = Some(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        );
        self
    }

    /// Maps each accepted file under `input_root` to `output_root`.
    ///
    /// Unreadable entries are logged and skipped. A file whose output path
    /// has no date context is an error, since the input tree is expected to
    /// be date-structured throughout.
    pub fn scan(&self, input_root: &Path, output_root: &Path) -> Result<Vec<FileMapping>> {
        if !input_root.is_dir() {
            return Err(LibraryError::InvalidInput {
                field: "input_root".to_string(),
                message: format!("'{}' is not a directory", input_root.display()),
            });
        }

        let walker = WalkDir::new(input_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        let mut mappings = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Error accessing entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }

            let relative = entry.path().strip_prefix(input_root).map_err(|_| {
                LibraryError::InvalidInput {
                    field: "input_root".to_string(),
                    message: format!("'{}' escaped the scan root", entry.path().display()),
                }
            })?;

            mappings.push(FileMapping::new(
                entry.path(),
                output_root.join(relative),
            )?);
        }

        debug!(
            root = %input_root.display(),
            mappings = mappings.len(),
            "Scanned directory"
        );
        Ok(mappings)
    }

    fn accepts(&self, path: &Path) -> bool {
        let Some(extensions) = &self.extensions else {
            return true;
        };

        path.extension()
            .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
