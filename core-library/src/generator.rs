//! Mapping Generator
//!
//! Turns manifest records into [`FileMapping`]s laid out as
//! `<output_root>/YYYY/MM month/DD[/artist/album]/<file name>`, where the date
//! comes from each record's `date_added`.

use crate::date_context::DateContext;
use crate::error::{LibraryError, Result};
use crate::manifest::{Manifest, ManifestRecord};
use crate::models::{sanitize_segment, FileMapping, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default collection location prefix.
pub const DEFAULT_COLLECTION_PREFIX: &str = "file://localhost";

#[derive(Debug, Clone)]
pub struct MappingGenerator {
    output_root: PathBuf,
    collection_prefix: String,
    metadata_path: bool,
}

impl MappingGenerator {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            collection_prefix: DEFAULT_COLLECTION_PREFIX.to_string(),
            metadata_path: true,
        }
    }

    pub fn with_collection_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.collection_prefix = prefix.into();
        self
    }

    /// Insert `artist/album` directories between the date and the file name.
    pub fn with_metadata_path(mut self, enabled: bool) -> Self {
        self.metadata_path = enabled;
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Produces one mapping per usable record.
    ///
    /// Records outside the manifest's allow list are skipped quietly; records
    /// that cannot be placed in the date tree are skipped with a warning.
    pub fn generate(&self, manifest: &Manifest) -> Vec<FileMapping> {
        let mut mappings = Vec::with_capacity(manifest.records.len());

        for record in &manifest.records {
            if !manifest.is_allowed(record) {
                debug!(id = %record.id, "Skipping record outside allow list");
                continue;
            }

            match self.map_record(record) {
                Ok(mapping) => mappings.push(mapping),
                Err(e) => warn!(id = %record.id, error = %e, "Skipping record"),
            }
        }

        info!(
            records = manifest.records.len(),
            mappings = mappings.len(),
            "Generated mappings"
        );
        mappings
    }

    /// Maps a single record.
    pub fn map_record(&self, record: &ManifestRecord) -> Result<FileMapping> {
        let source = record.source_path(&self.collection_prefix)?;
        let context = DateContext::from_date_added(&record.date_added)?;

        let file_name = source
            .file_name()
            .ok_or_else(|| LibraryError::InvalidInput {
                field: "location".to_string(),
                message: format!("'{}' has no file name", source.display()),
            })?
            .to_owned();

        let mut relative = context.to_path();
        if self.metadata_path {
            relative.push(sanitize_segment(record.artist.as_deref(), UNKNOWN_ARTIST));
            relative.push(sanitize_segment(record.album.as_deref(), UNKNOWN_ALBUM));
        }
        relative.push(file_name);

        // Fails when the output root itself holds a four-digit component.
        FileMapping::new(source, self.output_root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, location: &str, date: &str) -> ManifestRecord {
        ManifestRecord {
            id: id.to_string(),
            location: location.to_string(),
            date_added: date.to_string(),
            artist: Some("Gloria Jones".to_string()),
            album: Some("Tainted Love".to_string()),
            genre: None,
        }
    }

    #[test]
    fn test_metadata_layout() {
        let generator = MappingGenerator::new("/out");
        let mapping = generator
            .map_record(&record(
                "1",
                "file://localhost/Volumes/music/Tainted%20Love.aiff",
                "2022-04-24",
            ))
            .unwrap();

        assert_eq!(mapping.source(), Path::new("/Volumes/music/Tainted Love.aiff"));
        assert_eq!(
            mapping.destination(),
            Path::new("/out/2022/04 april/24/Gloria Jones/Tainted Love/Tainted Love.aiff")
        );
        assert_eq!(mapping.context().to_string(), "2022/04 april/24");
    }

    #[test]
    fn test_flat_layout_and_placeholders() {
        let flat = MappingGenerator::new("/out").with_metadata_path(false);
        let rec = record("1", "file://localhost/m/a.mp3", "2024-01-05");
        assert_eq!(
            flat.map_record(&rec).unwrap().destination(),
            Path::new("/out/2024/01 january/05/a.mp3")
        );

        let mut untagged = rec.clone();
        untagged.artist = None;
        untagged.album = Some(String::new());
        assert_eq!(
            MappingGenerator::new("/out")
                .map_record(&untagged)
                .unwrap()
                .destination(),
            Path::new("/out/2024/01 january/05/UNKNOWN_ARTIST/UNKNOWN_ALBUM/a.mp3")
        );
    }

    #[test]
    fn test_output_root_directly_precedes_year() {
        // Numeric album names must not be mistaken for the year.
        let mut rec = record("1", "file://localhost/m/159678_1983.aiff", "2024-08-18");
        rec.album = Some("1983".to_string());

        let mapping = MappingGenerator::new("/data/tracks-output")
            .map_record(&rec)
            .unwrap();
        assert_eq!(mapping.context().to_string(), "2024/08 august/18");
        assert_eq!(mapping.output_root(), PathBuf::from("/data/tracks-output"));
    }

    #[test]
    fn test_generate_skips_filtered_and_bad_records() {
        let manifest = Manifest {
            records: vec![
                record("1", "file://localhost/m/a.mp3", "2024-01-05"),
                record("2", "file://localhost/m/b.mp3", "2024-01-06"),
                record("3", "file://localhost/m/c.mp3", "not-a-date"),
                record("4", "smb://nas/m/d.mp3", "2024-01-07"),
            ],
            allow_ids: Some(["2", "3", "4"].iter().map(|s| s.to_string()).collect()),
        };

        let mappings = MappingGenerator::new("/out").generate(&manifest);
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].source(), Path::new("/m/b.mp3"));
    }

    #[test]
    fn test_dated_output_root_is_rejected() {
        let rec = record("1", "file://localhost/m/a.mp3", "2024-01-05");
        let err = MappingGenerator::new("/backup/2023")
            .map_record(&rec)
            .unwrap_err();
        assert!(matches!(err, LibraryError::UnparseableDateContext { .. }));
    }

    #[test]
    fn test_custom_prefix() {
        let generator = MappingGenerator::new("/out").with_collection_prefix("file:///");
        let rec = record("1", "file:///Users/me/a.mp3", "2024-01-05");
        assert_eq!(
            generator.map_record(&rec).unwrap().source(),
            Path::new("/Users/me/a.mp3")
        );
    }
}
