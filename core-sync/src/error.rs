use bridge_traits::error::BridgeError;
use core_library::{DateContext, LibraryError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No date context in path '{}'", path.display())]
    UnparseableDateContext { path: PathBuf },

    #[error("Library error: {0}")]
    Library(#[source] LibraryError),

    #[error("Remote store unreachable at {remote}: {message}")]
    HealthCheckFailed { remote: String, message: String },

    #[error("Cannot derive a remote-relative path from '{}'", path.display())]
    RemotePath { path: PathBuf },

    #[error("Transfer of {context} failed with exit code {exit_code}: {output}")]
    TransferFailed {
        context: DateContext,
        exit_code: i32,
        output: String,
    },

    #[error("Remote index error: {0}")]
    RemoteIndex(String),

    #[error("Remote scan still running after {waited_secs} seconds")]
    ScanTimeout { waited_secs: u64 },

    #[error("Progress marker error at '{}': {message}", path.display())]
    Progress { path: PathBuf, message: String },

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error(
        "Batch {context} failed (last committed: {}): {source}",
        display_marker(.last_committed)
    )]
    BatchFailed {
        context: DateContext,
        last_committed: Option<DateContext>,
        #[source]
        source: Box<SyncError>,
    },
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::UnparseableDateContext { path } => {
                SyncError::UnparseableDateContext { path }
            }
            other => SyncError::Library(other),
        }
    }
}

impl SyncError {
    /// Last committed date context carried by a batch failure.
    pub fn last_committed(&self) -> Option<DateContext> {
        match self {
            SyncError::BatchFailed { last_committed, .. } => *last_committed,
            _ => None,
        }
    }
}

fn display_marker(marker: &Option<DateContext>) -> String {
    marker
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

pub type Result<T> = std::result::Result<T, SyncError>;
