use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("No date context in path '{}'", path.display())]
    UnparseableDateContext { path: PathBuf },

    #[error("Invalid date '{value}': {message}")]
    InvalidDate { value: String, message: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LibraryError>;
