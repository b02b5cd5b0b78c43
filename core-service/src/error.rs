use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("No media server password: set remote_index.password or store one under '{key}'")]
    MissingCredential { key: String },

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),
}

impl CoreError {
    /// Last committed date context when a batch failed mid-run.
    pub fn last_committed(&self) -> Option<core_library::DateContext> {
        match self {
            CoreError::Sync(err) => err.last_committed(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
