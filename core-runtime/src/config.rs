//! # Core Configuration Module
//!
//! Provides configuration management for the sync pipeline.
//!
//! ## Overview
//!
//! A [`CoreConfig`] holds every setting the pipeline needs: where the mirror
//! tool sends files, how the remote index is reached, how files are encoded
//! and where the progress marker lives. It can be assembled with
//! [`CoreConfig::builder`] or loaded from a TOML file. Either way it goes
//! through [`CoreConfig::validate`] before use, so a bad value fails at
//! startup instead of halfway through a run.
//!
//! ## TOML layout
//!
//! ```toml
//! [transfer]
//! remote_url = "rsync://user@pi.local:12000"
//! module = "navidrome"
//!
//! [remote_index]
//! base_url = "https://music.example.com/rest"
//! username = "admin"
//!
//! [transcode]
//! target_extension = ".mp3"
//! concurrency = 28
//!
//! [progress]
//! state_file = "/var/lib/tracksync/sync_state.txt"
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .remote_url("rsync://user@pi.local:12000")
//!     .module("navidrome")
//!     .index_base_url("https://music.example.com/rest")
//!     .index_username("admin")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "tracksync";

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub transfer: TransferConfig,
    pub remote_index: RemoteIndexConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub library: LibraryConfig,
}

/// Mirror tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Remote daemon address, e.g. `rsync://user@host:12000`
    pub remote_url: String,
    /// Module name on the remote daemon
    pub module: String,
    /// Mirror executable
    #[serde(default = "default_rsync")]
    pub program: String,
}

/// Subsonic-compatible remote index settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIndexConfig {
    /// API root, e.g. `https://host/rest`
    pub base_url: String,
    pub username: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Secure store key holding the password
    #[serde(default = "default_password_key")]
    pub password_key: String,
    /// Inline password; takes precedence over the secure store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_quick_poll_ms")]
    pub quick_poll_interval_ms: u64,
    #[serde(default = "default_full_poll_ms")]
    pub full_poll_interval_ms: u64,
    /// Upper bound on waiting for a scan; absent means wait indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scan_wait_secs: Option<u64>,
}

impl fmt::Debug for RemoteIndexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteIndexConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("client_id", &self.client_id)
            .field("api_version", &self.api_version)
            .field("password_key", &self.password_key)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("quick_poll_interval_ms", &self.quick_poll_interval_ms)
            .field("full_poll_interval_ms", &self.full_poll_interval_ms)
            .field("max_scan_wait_secs", &self.max_scan_wait_secs)
            .finish()
    }
}

impl RemoteIndexConfig {
    /// Sleep between status polls for the given scan kind.
    pub fn poll_interval(&self, full_scan: bool) -> Duration {
        if full_scan {
            Duration::from_millis(self.full_poll_interval_ms)
        } else {
            Duration::from_millis(self.quick_poll_interval_ms)
        }
    }

    pub fn max_scan_wait(&self) -> Option<Duration> {
        self.max_scan_wait_secs.map(Duration::from_secs)
    }
}

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Extension given to every output file, with leading dot
    pub target_extension: String,
    /// Encodes launched per group
    pub concurrency: usize,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            target_extension: ".mp3".to_string(),
            concurrency: 28,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// File holding the last committed date context
    pub state_file: PathBuf,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            state_file: base.join(APP_DIR).join("sync_state.txt"),
        }
    }
}

/// Manifest interpretation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// URI prefix stripped from manifest locations
    pub collection_prefix: String,
    /// Insert `artist/album` segments before the file name
    pub metadata_path: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            collection_prefix: "file://localhost".to_string(),
            metadata_path: true,
        }
    }
}

fn default_rsync() -> String {
    "rsync".to_string()
}

fn default_client_id() -> String {
    "tracksync".to_string()
}

fn default_api_version() -> String {
    "1.16.1".to_string()
}

fn default_password_key() -> String {
    "subsonic_password".to_string()
}

fn default_quick_poll_ms() -> u64 {
    1000
}

fn default_full_poll_ms() -> u64 {
    5000
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.remote_url.trim().is_empty() {
            return Err(Error::Config(
                "transfer.remote_url is required. Use .remote_url() to set it.".to_string(),
            ));
        }
        if self.transfer.module.trim().is_empty() {
            return Err(Error::Config(
                "transfer.module is required. Use .module() to set it.".to_string(),
            ));
        }
        if self.remote_index.base_url.trim().is_empty() {
            return Err(Error::Config(
                "remote_index.base_url is required. Use .index_base_url() to set it.".to_string(),
            ));
        }
        if self.remote_index.username.trim().is_empty() {
            return Err(Error::Config(
                "remote_index.username is required. Use .index_username() to set it."
                    .to_string(),
            ));
        }
        if self.remote_index.quick_poll_interval_ms == 0
            || self.remote_index.full_poll_interval_ms == 0
        {
            return Err(Error::Config(
                "Poll intervals must be greater than 0ms".to_string(),
            ));
        }
        if self.remote_index.max_scan_wait_secs == Some(0) {
            return Err(Error::Config(
                "remote_index.max_scan_wait_secs must be greater than 0 when set".to_string(),
            ));
        }
        if self.transcode.concurrency == 0 {
            return Err(Error::Config(
                "transcode.concurrency must be at least 1".to_string(),
            ));
        }
        let ext = &self.transcode.target_extension;
        if ext.len() < 2 || !ext.starts_with('.') {
            return Err(Error::Config(format!(
                "transcode.target_extension must look like '.mp3', got '{}'",
                ext
            )));
        }
        if self.progress.state_file.as_os_str().is_empty() {
            return Err(Error::Config(
                "progress.state_file cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    remote_url: Option<String>,
    module: Option<String>,
    rsync_program: Option<String>,
    base_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    quick_poll_interval_ms: Option<u64>,
    full_poll_interval_ms: Option<u64>,
    max_scan_wait_secs: Option<u64>,
    transcode: Option<TranscodeConfig>,
    state_file: Option<PathBuf>,
    library: Option<LibraryConfig>,
}

impl CoreConfigBuilder {
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn rsync_program(mut self, program: impl Into<String>) -> Self {
        self.rsync_program = Some(program.into());
        self
    }

    pub fn index_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn index_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn index_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn poll_intervals_ms(mut self, quick: u64, full: u64) -> Self {
        self.quick_poll_interval_ms = Some(quick);
        self.full_poll_interval_ms = Some(full);
        self
    }

    pub fn max_scan_wait_secs(mut self, secs: u64) -> Self {
        self.max_scan_wait_secs = Some(secs);
        self
    }

    pub fn transcode(mut self, transcode: TranscodeConfig) -> Self {
        self.transcode = Some(transcode);
        self
    }

    pub fn state_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.state_file = Some(path.into());
        self
    }

    pub fn library(mut self, library: LibraryConfig) -> Self {
        self.library = Some(library);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<CoreConfig> {
        let remote_url = self.remote_url.ok_or_else(|| {
            Error::Config("Remote url is required. Use .remote_url() to set it.".to_string())
        })?;
        let module = self.module.ok_or_else(|| {
            Error::Config("Module is required. Use .module() to set it.".to_string())
        })?;
        let base_url = self.base_url.ok_or_else(|| {
            Error::Config(
                "Index base url is required. Use .index_base_url() to set it.".to_string(),
            )
        })?;
        let username = self.username.ok_or_else(|| {
            Error::Config(
                "Index username is required. Use .index_username() to set it.".to_string(),
            )
        })?;

        let config = CoreConfig {
            transfer: TransferConfig {
                remote_url,
                module,
                program: self.rsync_program.unwrap_or_else(default_rsync),
            },
            remote_index: RemoteIndexConfig {
                base_url,
                username,
                client_id: default_client_id(),
                api_version: default_api_version(),
                password_key: default_password_key(),
                password: self.password,
                quick_poll_interval_ms: self
                    .quick_poll_interval_ms
                    .unwrap_or_else(default_quick_poll_ms),
                full_poll_interval_ms: self
                    .full_poll_interval_ms
                    .unwrap_or_else(default_full_poll_ms),
                max_scan_wait_secs: self.max_scan_wait_secs,
            },
            transcode: self.transcode.unwrap_or_default(),
            progress: match self.state_file {
                Some(state_file) => ProgressConfig { state_file },
                None => ProgressConfig::default(),
            },
            library: self.library.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn minimal_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .remote_url("rsync://user@pi.local:12000")
            .module("navidrome")
            .index_base_url("https://music.example.com/rest")
            .index_username("admin")
    }

    #[test]
    fn test_builder_with_defaults() {
        let config = minimal_builder().state_file("/tmp/state.txt").build().unwrap();

        assert_eq!(config.transfer.program, "rsync");
        assert_eq!(config.remote_index.client_id, "tracksync");
        assert_eq!(config.remote_index.api_version, "1.16.1");
        assert_eq!(config.remote_index.password_key, "subsonic_password");
        assert_eq!(config.remote_index.max_scan_wait(), None);
        assert_eq!(
            config.remote_index.poll_interval(false),
            Duration::from_secs(1)
        );
        assert_eq!(config.remote_index.poll_interval(true), Duration::from_secs(5));
        assert_eq!(config.transcode.concurrency, 28);
        assert_eq!(config.transcode.target_extension, ".mp3");
        assert_eq!(config.progress.state_file, PathBuf::from("/tmp/state.txt"));
        assert_eq!(config.library.collection_prefix, "file://localhost");
        assert!(config.library.metadata_path);
    }

    #[test]
    fn test_builder_requires_remote_url() {
        let result = CoreConfig::builder()
            .module("navidrome")
            .index_base_url("https://music.example.com/rest")
            .index_username("admin")
            .build();

        let err = result.unwrap_err().to_string();
        assert!(err.contains("Remote url is required"));
    }

    #[test]
    fn test_builder_requires_username() {
        let result = CoreConfig::builder()
            .remote_url("rsync://host")
            .module("navidrome")
            .index_base_url("https://music.example.com/rest")
            .build();

        assert!(result.unwrap_err().to_string().contains("username"));
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let transcode = TranscodeConfig {
            concurrency: 0,
            ..Default::default()
        };
        let result = minimal_builder().transcode(transcode).build();
        assert!(result.unwrap_err().to_string().contains("concurrency"));
    }

    #[test]
    fn test_validation_rejects_bad_extension() {
        for ext in ["", ".", "mp3"] {
            let transcode = TranscodeConfig {
                target_extension: ext.to_string(),
                ..Default::default()
            };
            assert!(minimal_builder().transcode(transcode).build().is_err());
        }
    }

    #[test]
    fn test_validation_rejects_zero_poll_interval() {
        assert!(minimal_builder().poll_intervals_ms(0, 5000).build().is_err());
        assert!(minimal_builder().max_scan_wait_secs(0).build().is_err());
        assert!(minimal_builder().max_scan_wait_secs(600).build().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = CoreConfig::from_toml_str(
            r#"
            [transfer]
            remote_url = "rsync://user@pi.local:12000"
            module = "navidrome"

            [remote_index]
            base_url = "https://music.example.com/rest"
            username = "admin"
            full_poll_interval_ms = 2000
            max_scan_wait_secs = 900

            [transcode]
            concurrency = 4

            [progress]
            state_file = "/tmp/tracksync/state.txt"

            [library]
            metadata_path = false
            "#,
        )
        .unwrap();

        assert_eq!(config.transfer.module, "navidrome");
        assert_eq!(config.remote_index.full_poll_interval_ms, 2000);
        assert_eq!(config.remote_index.quick_poll_interval_ms, 1000);
        assert_eq!(
            config.remote_index.max_scan_wait(),
            Some(Duration::from_secs(900))
        );
        assert_eq!(config.transcode.concurrency, 4);
        assert_eq!(config.transcode.ffmpeg, "ffmpeg");
        assert!(!config.library.metadata_path);
        assert_eq!(config.library.collection_prefix, "file://localhost");
    }

    #[test]
    fn test_from_toml_str_missing_section() {
        let err = CoreConfig::from_toml_str("[transfer]\nremote_url = \"x\"\nmodule = \"m\"\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[transfer]\nremote_url = \"rsync://h\"\nmodule = \"m\"\n\n[remote_index]\nbase_url = \"http://h/rest\"\nusername = \"u\"\npassword = \"p\""
        )
        .unwrap();

        let config = CoreConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.remote_index.password.as_deref(), Some("p"));

        let missing = CoreConfig::from_toml_file("/definitely/not/here.toml");
        assert!(matches!(missing, Err(Error::ConfigFile { .. })));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = minimal_builder().index_password("hunter2").build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
