//! # Host Bridge Traits
//!
//! Capability traits the sync core requires from its host.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync core and the concrete
//! platform implementations in `bridge-desktop`. Each trait represents a
//! capability whose real implementation touches the outside world (network,
//! child processes, the OS keychain) and which tests replace with fakes.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with retry
//! - [`ProcessRunner`](process::ProcessRunner) - External tool invocation (`ffmpeg`, `rsync`)
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Secret Service)
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Implementations should convert platform-specific errors to `BridgeError`
//! and include context such as the program name or URL.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across async tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod process;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use process::{CommandSpec, ProcessOutput, ProcessRunner};
pub use storage::SecureStore;
