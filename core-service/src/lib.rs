//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, external
//! processes, secure storage) and a [`CoreConfig`] into a runnable
//! [`SyncService`]. Desktop hosts enable the `desktop-shims` feature (which
//! depends on `bridge-desktop`) and get [`CoreDependencies::desktop`].

pub mod error;

pub use error::{CoreError, Result};

use std::path::Path;
use std::sync::Arc;

use bridge_traits::{http::HttpClient, process::ProcessRunner, storage::SecureStore};
use core_library::{DateContext, DirectoryScanner, FileMapping, Manifest, MappingGenerator};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use core_sync::{
    retain_unprocessed, wait_for_scan, BatchScheduler, FileProgressStore, ProgressStore,
    RemoteIndex, ScanOutcome, SchedulerOptions, SubsonicClient, SyncReport, TransferAgent,
    Transcoder,
};
use tracing::{debug, info, instrument};

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub secure_store: Option<Arc<dyn SecureStore>>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        process_runner: Arc<dyn ProcessRunner>,
        secure_store: Option<Arc<dyn SecureStore>>,
    ) -> Self {
        Self {
            http_client,
            process_runner,
            secure_store,
        }
    }

    /// Desktop bridges: reqwest, tokio processes and, with the
    /// `secure-store` feature, the OS keychain.
    #[cfg(feature = "desktop-shims")]
    pub fn desktop() -> Result<Self> {
        let http_client = bridge_desktop::ReqwestHttpClient::new()
            .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;

        #[cfg(feature = "secure-store")]
        let secure_store: Option<Arc<dyn SecureStore>> =
            Some(Arc::new(bridge_desktop::KeyringSecureStore::new()));
        #[cfg(not(feature = "secure-store"))]
        let secure_store: Option<Arc<dyn SecureStore>> = None;

        Ok(Self::new(
            Arc::new(http_client),
            Arc::new(bridge_desktop::TokioProcessRunner::new()),
            secure_store,
        ))
    }
}

/// Primary façade exposed to host applications.
pub struct SyncService {
    config: CoreConfig,
    deps: CoreDependencies,
    progress: Arc<dyn ProgressStore>,
    event_bus: EventBus,
}

impl SyncService {
    /// Create a service; the configuration is validated first.
    pub fn new(config: CoreConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;
        let progress: Arc<dyn ProgressStore> =
            Arc::new(FileProgressStore::new(&config.progress.state_file));

        debug!(state_file = %config.progress.state_file.display(), "Sync service ready");
        Ok(Self {
            config,
            deps,
            progress,
            event_bus: EventBus::default(),
        })
    }

    /// Replace the file-backed progress store.
    pub fn with_progress_store(mut self, progress: Arc<dyn ProgressStore>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Stream of pipeline events from now on.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    // ------------------------------------------------------------------
    // Mapping sources
    // ------------------------------------------------------------------

    /// Mappings for every usable record of a manifest file.
    pub fn manifest_mappings(
        &self,
        manifest_path: &Path,
        output_root: &Path,
    ) -> Result<Vec<FileMapping>> {
        let manifest = Manifest::from_file(manifest_path)?;
        let library = &self.config.library;
        let generator = MappingGenerator::new(output_root)
            .with_collection_prefix(library.collection_prefix.as_str())
            .with_metadata_path(library.metadata_path);
        Ok(generator.generate(&manifest))
    }

    /// Mappings mirroring a date-structured input tree.
    pub fn directory_mappings(
        &self,
        input_root: &Path,
        output_root: &Path,
    ) -> Result<Vec<FileMapping>> {
        Ok(DirectoryScanner::audio().scan(input_root, output_root)?)
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    pub async fn sync_manifest(
        &self,
        manifest_path: &Path,
        output_root: &Path,
        full_scan: bool,
    ) -> Result<SyncReport> {
        let mappings = self.manifest_mappings(manifest_path, output_root)?;
        self.sync(mappings, full_scan).await
    }

    pub async fn sync_dir(
        &self,
        input_root: &Path,
        output_root: &Path,
        full_scan: bool,
    ) -> Result<SyncReport> {
        let mappings = self.directory_mappings(input_root, output_root)?;
        self.sync(mappings, full_scan).await
    }

    /// Runs the batch pipeline over every mapping not yet committed.
    #[instrument(skip(self, mappings), fields(mappings = mappings.len()))]
    pub async fn sync(&self, mappings: Vec<FileMapping>, full_scan: bool) -> Result<SyncReport> {
        let pending = retain_unprocessed(self.progress.as_ref(), mappings).await?;
        let index = self.remote_index().await?;

        let transcode = &self.config.transcode;
        let options = SchedulerOptions {
            target_extension: transcode.target_extension.clone(),
            full_scan,
            poll_interval: self.config.remote_index.poll_interval(full_scan),
            max_scan_wait: self.config.remote_index.max_scan_wait(),
        };

        let mut scheduler = BatchScheduler::new(
            self.transcoder(),
            self.transfer_agent(),
            index,
            Arc::clone(&self.progress),
        )
        .with_options(options)
        .with_event_bus(self.event_bus.clone());

        Ok(scheduler.run(pending).await?)
    }

    // ------------------------------------------------------------------
    // Single operations
    // ------------------------------------------------------------------

    /// Last committed date context.
    pub async fn status(&self) -> Result<Option<DateContext>> {
        Ok(self.progress.load().await?)
    }

    /// Whether the remote store answers.
    pub async fn healthcheck(&self) -> bool {
        self.transfer_agent().healthcheck().await
    }

    /// Checks the media server credentials.
    pub async fn ping(&self) -> Result<()> {
        Ok(self.subsonic_client().await?.ping().await?)
    }

    /// Triggers a remote scan and waits for it to finish.
    pub async fn scan(&self, full_scan: bool) -> Result<ScanOutcome> {
        let client = self.subsonic_client().await?;
        client.start_scan(full_scan).await?;

        let remote = &self.config.remote_index;
        let outcome = wait_for_scan(
            &client,
            remote.poll_interval(full_scan),
            remote.max_scan_wait(),
        )
        .await?;
        info!(polls = outcome.polls, "Scan finished");
        Ok(outcome)
    }

    /// Saves the media server password in the secure store.
    pub async fn set_password(&self, password: &str) -> Result<()> {
        let store = self.secure_store()?;
        store
            .set_secret(&self.config.remote_index.password_key, password)
            .await?;
        info!(key = %self.config.remote_index.password_key, "Stored media server password");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    fn transcoder(&self) -> Transcoder {
        let transcode = &self.config.transcode;
        Transcoder::new(Arc::clone(&self.deps.process_runner), transcode.concurrency)
            .with_programs(transcode.ffmpeg.as_str(), transcode.ffprobe.as_str())
    }

    fn transfer_agent(&self) -> TransferAgent {
        let transfer = &self.config.transfer;
        TransferAgent::new(
            Arc::clone(&self.deps.process_runner),
            transfer.remote_url.as_str(),
            transfer.module.as_str(),
        )
        .with_program(transfer.program.as_str())
    }

    async fn remote_index(&self) -> Result<Arc<dyn RemoteIndex>> {
        Ok(Arc::new(self.subsonic_client().await?))
    }

    async fn subsonic_client(&self) -> Result<SubsonicClient> {
        let remote = &self.config.remote_index;
        let password = self.resolve_password().await?;
        Ok(SubsonicClient::new(
            Arc::clone(&self.deps.http_client),
            remote.base_url.as_str(),
            remote.username.as_str(),
            password,
        )
        .with_client_id(remote.client_id.as_str())
        .with_api_version(remote.api_version.as_str()))
    }

    /// Inline configuration first, then the secure store.
    async fn resolve_password(&self) -> Result<String> {
        let remote = &self.config.remote_index;
        if let Some(password) = &remote.password {
            return Ok(password.clone());
        }

        let missing = || CoreError::MissingCredential {
            key: remote.password_key.clone(),
        };
        let store = self.secure_store().map_err(|_| missing())?;
        store
            .get_secret(&remote.password_key)
            .await?
            .ok_or_else(missing)
    }

    fn secure_store(&self) -> Result<&Arc<dyn SecureStore>> {
        self.deps
            .secure_store
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "secure_store".to_string(),
                message: "built without the secure-store feature".to_string(),
            })
    }
}
