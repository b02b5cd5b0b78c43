//! Domain models for the sync pipeline
//!
//! A [`FileMapping`] pairs a source file with its destination in the
//! date-structured output tree. The destination's [`DateContext`] is derived
//! once, on construction, so a mapping that cannot be bucketed never exists.

use crate::date_context::{find_date_context, DateContext};
use crate::error::{LibraryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Separator used when mappings are printed or logged.
pub const MAPPING_DELIMITER: &str = "->";

/// Placeholder directory for tracks without an artist tag.
pub const UNKNOWN_ARTIST: &str = "UNKNOWN_ARTIST";

/// Placeholder directory for tracks without an album tag.
pub const UNKNOWN_ALBUM: &str = "UNKNOWN_ALBUM";

/// Audio extensions recognised when scanning directories.
pub const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "wav", "aif", "aiff", "flac"];

// =============================================================================
// File Mapping
// =============================================================================

/// A source file and where it lands in the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMapping", into = "RawMapping")]
pub struct FileMapping {
    source: PathBuf,
    destination: PathBuf,
    context: DateContext,
    context_index: usize,
}

impl FileMapping {
    /// Creates a mapping, rejecting destinations without a date context.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();
        let destination = destination.into();

        let (context, context_index) = find_date_context(&destination).ok_or_else(|| {
            LibraryError::UnparseableDateContext {
                path: destination.clone(),
            }
        })?;

        Ok(Self {
            source,
            destination,
            context,
            context_index,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Date bucket of the destination.
    pub fn context(&self) -> DateContext {
        self.context
    }

    /// Same mapping with the destination extension replaced.
    ///
    /// `extension` may be given with or without its leading dot.
    pub fn with_extension(&self, extension: &str) -> Self {
        let mut destination = self.destination.clone();
        destination.set_extension(extension.trim_start_matches('.'));

        Self {
            source: self.source.clone(),
            destination,
            context: self.context,
            context_index: self.context_index,
        }
    }

    /// Output root the date tree hangs from.
    pub fn output_root(&self) -> PathBuf {
        self.destination
            .components()
            .take(self.context_index)
            .collect()
    }

    /// Day directory in the form the mirror tool needs for relative
    /// transfers: `<output_root>/./YYYY/MM month/DD`.
    ///
    /// The `.` marks where the path kept on the remote side begins.
    pub fn remote_relative_path(&self) -> PathBuf {
        let mut path = self.output_root();
        path.push(Component::CurDir);
        path.push(self.context.to_path());
        path
    }
}

impl fmt::Display for FileMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.source.display(),
            MAPPING_DELIMITER,
            self.destination.display()
        )
    }
}

#[derive(Serialize, Deserialize)]
struct RawMapping {
    source: PathBuf,
    destination: PathBuf,
}

impl TryFrom<RawMapping> for FileMapping {
    type Error = LibraryError;

    fn try_from(raw: RawMapping) -> Result<Self> {
        FileMapping::new(raw.source, raw.destination)
    }
}

impl From<FileMapping> for RawMapping {
    fn from(mapping: FileMapping) -> Self {
        RawMapping {
            source: mapping.source,
            destination: mapping.destination,
        }
    }
}

/// Makes a tag safe to use as a single directory name.
///
/// Empty tags fall back to `placeholder`; path separators are replaced so a
/// tag like `AC/DC` stays one segment.
pub fn sanitize_segment(tag: Option<&str>, placeholder: &str) -> String {
    let trimmed = tag.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return placeholder.to_string();
    }
    trimmed.replace(['/', '\\'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_context() {
        let mapping = FileMapping::new(
            "/in/track.aiff",
            "/out/2024/01 january/05/Artist/Album/track.aiff",
        )
        .unwrap();

        assert_eq!(mapping.context().to_string(), "2024/01 january/05");
        assert_eq!(mapping.source(), Path::new("/in/track.aiff"));
        assert_eq!(mapping.output_root(), PathBuf::from("/out"));
    }

    #[test]
    fn test_new_rejects_undated_destination() {
        let err = FileMapping::new("/in/a.mp3", "/out/misc/a.mp3").unwrap_err();
        assert!(matches!(err, LibraryError::UnparseableDateContext { .. }));

        let err = FileMapping::new("/in/a.mp3", "/out/2024/01 august/05/a.mp3").unwrap_err();
        assert!(err.to_string().contains("/out/2024/01 august/05/a.mp3"));
    }

    #[test]
    fn test_with_extension() {
        let mapping =
            FileMapping::new("/in/t.aiff", "/out/2024/01 january/05/t.aiff").unwrap();

        let mp3 = mapping.with_extension(".mp3");
        assert_eq!(
            mp3.destination(),
            Path::new("/out/2024/01 january/05/t.mp3")
        );
        assert_eq!(mp3.context(), mapping.context());
        assert_eq!(mapping.with_extension("mp3"), mp3);
    }

    #[test]
    fn test_remote_relative_path() {
        let mapping = FileMapping::new(
            "/in/t.aiff",
            "/data/tracks-output/2022/04 april/24/Gloria Jones/Single/t.mp3",
        )
        .unwrap();

        assert_eq!(
            mapping.remote_relative_path(),
            PathBuf::from("/data/tracks-output/./2022/04 april/24")
        );
        assert_eq!(
            mapping.remote_relative_path().to_string_lossy(),
            "/data/tracks-output/./2022/04 april/24"
        );
    }

    #[test]
    fn test_display_uses_delimiter() {
        let mapping = FileMapping::new("/in/t.mp3", "/out/2024/01 january/05/t.mp3").unwrap();
        assert_eq!(
            mapping.to_string(),
            "/in/t.mp3->/out/2024/01 january/05/t.mp3"
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: FileMapping = serde_json::from_str(
            r#"{"source": "/in/t.mp3", "destination": "/out/2024/01 january/05/t.mp3"}"#,
        )
        .unwrap();
        assert_eq!(ok.context().day(), 5);

        let bad = serde_json::from_str::<FileMapping>(
            r#"{"source": "/in/t.mp3", "destination": "/out/t.mp3"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment(Some("AC/DC"), UNKNOWN_ARTIST), "AC-DC");
        assert_eq!(sanitize_segment(Some("  "), UNKNOWN_ARTIST), UNKNOWN_ARTIST);
        assert_eq!(sanitize_segment(None, UNKNOWN_ALBUM), UNKNOWN_ALBUM);
        assert_eq!(sanitize_segment(Some(".."), UNKNOWN_ALBUM), UNKNOWN_ALBUM);
        assert_eq!(sanitize_segment(Some("京都コネクション"), UNKNOWN_ALBUM), "京都コネクション");
    }
}
