//! Batch Scheduler
//!
//! Drives mappings through the pipeline one date context at a time:
//!
//! ```text
//! IDLE -> BUCKETING -> { TRANSCODE -> TRANSFER -> INDEX -> COMMIT }* -> DONE
//!                              \___________\_________\______________-> FAILED
//! ```
//!
//! Batches run strictly in ascending [`DateContext`] order and the progress
//! marker is written only after a batch clears every stage. The first
//! failing stage stops the run; nothing after it is attempted.

use crate::error::{Result, SyncError};
use crate::progress::ProgressStore;
use crate::remote_index::{wait_for_scan, RemoteIndex};
use crate::transcoder::{TranscodeFailure, Transcoder};
use crate::transfer::TransferAgent;
use core_library::{DateContext, FileMapping};
use core_runtime::events::{CoreEvent, EventBus, IndexEvent, SyncEvent};
use core_runtime::logging::format_duration;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Bucketing,
    Transcode,
    Transfer,
    Index,
    Commit,
    Done,
    Failed,
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerState::Done | SchedulerState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Bucketing => "bucketing",
            SchedulerState::Transcode => "transcode",
            SchedulerState::Transfer => "transfer",
            SchedulerState::Index => "index",
            SchedulerState::Commit => "commit",
            SchedulerState::Done => "done",
            SchedulerState::Failed => "failed",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Batches
// ============================================================================

/// All mappings sharing one date context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub context: DateContext,
    pub mappings: Vec<FileMapping>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Sorts mappings by date context and groups equal contexts.
///
/// The sort is stable, so mappings keep their input order inside a batch.
pub fn bucket(mut mappings: Vec<FileMapping>) -> Vec<Batch> {
    mappings.sort_by_key(FileMapping::context);

    let mut batches: Vec<Batch> = Vec::new();
    for mapping in mappings {
        match batches.last_mut() {
            Some(batch) if batch.context == mapping.context() => batch.mappings.push(mapping),
            _ => batches.push(Batch {
                context: mapping.context(),
                mappings: vec![mapping],
            }),
        }
    }
    batches
}

// ============================================================================
// Options and report
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Extension every output is encoded to, e.g. `.mp3`
    pub target_extension: String,
    /// Request a full rather than a quick remote scan
    pub full_scan: bool,
    /// Sleep between scan status polls
    pub poll_interval: Duration,
    /// Upper bound on a single scan wait; `None` waits indefinitely
    pub max_scan_wait: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            target_extension: ".mp3".to_string(),
            full_scan: false,
            poll_interval: Duration::from_secs(1),
            max_scan_wait: None,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub batches: usize,
    /// Mappings in committed batches
    pub processed: usize,
    pub total: usize,
    pub encoded: usize,
    pub skipped: usize,
    pub transcode_failures: Vec<TranscodeFailure>,
    pub last_committed: Option<DateContext>,
    pub duration: Duration,
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct BatchScheduler {
    transcoder: Transcoder,
    transfer: TransferAgent,
    index: Arc<dyn RemoteIndex>,
    progress: Arc<dyn ProgressStore>,
    event_bus: Option<EventBus>,
    options: SchedulerOptions,
    state: SchedulerState,
}

impl BatchScheduler {
    pub fn new(
        transcoder: Transcoder,
        transfer: TransferAgent,
        index: Arc<dyn RemoteIndex>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            transcoder,
            transfer,
            index,
            progress,
            event_bus: None,
            options: SchedulerOptions::default(),
            state: SchedulerState::Idle,
        }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Runs every batch in chronological order.
    ///
    /// # Errors
    ///
    /// - `HealthCheckFailed` before any batch when the remote is unreachable
    /// - `BatchFailed` wrapping the stage error otherwise; its
    ///   `last_committed` is the marker a rerun resumes after
    #[instrument(skip(self, mappings), fields(mappings = mappings.len()))]
    pub async fn run(&mut self, mappings: Vec<FileMapping>) -> Result<SyncReport> {
        let started = Instant::now();
        let last_committed = self.progress.load().await?;
        self.transition(SchedulerState::Bucketing)?;

        let total = mappings.len();
        let mut report = SyncReport {
            total,
            last_committed,
            ..SyncReport::default()
        };

        if total == 0 {
            info!("Nothing to sync");
            self.transition(SchedulerState::Done)?;
            return Ok(report);
        }

        if !self.transfer.healthcheck().await {
            self.transition(SchedulerState::Failed)?;
            let err = SyncError::HealthCheckFailed {
                remote: self.transfer.remote_url().to_string(),
                message: "remote store did not answer".to_string(),
            };
            self.emit(SyncEvent::Failed {
                context: None,
                message: err.to_string(),
            });
            return Err(err);
        }

        let batches = bucket(mappings);
        info!(batches = batches.len(), total, "Bucketed mappings by date context");
        self.emit(SyncEvent::Started { total });

        for batch in &batches {
            if let Err(source) = self.process_batch(batch, &mut report).await {
                return Err(self.fail(batch.context, source).await);
            }

            report.batches += 1;
            report.processed += batch.len();
            report.last_committed = Some(batch.context);

            info!(
                context = %batch.context,
                "Progress: {}/{}",
                report.processed,
                total
            );
            self.emit(SyncEvent::BatchCommitted {
                context: batch.context.to_string(),
                processed: report.processed,
                total,
            });
            self.emit(SyncEvent::Progress {
                processed: report.processed,
                total,
                percent: percent(report.processed, total),
            });
        }

        self.transition(SchedulerState::Done)?;
        report.duration = started.elapsed();
        info!(
            batches = report.batches,
            processed = report.processed,
            transcode_failures = report.transcode_failures.len(),
            "Sync finished in {}",
            format_duration(report.duration)
        );
        self.emit(SyncEvent::Completed {
            batches: report.batches,
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
        });
        Ok(report)
    }

    async fn process_batch(&mut self, batch: &Batch, report: &mut SyncReport) -> Result<()> {
        let context = batch.context;
        info!(context = %context, files = batch.len(), "Processing batch");
        self.emit(SyncEvent::BatchStarted {
            context: context.to_string(),
            files: batch.len(),
        });

        // TRANSCODE: per-file failures are reported, the batch carries on.
        self.transition(SchedulerState::Transcode)?;
        let encoded = self
            .transcoder
            .transcode(&batch.mappings, &self.options.target_extension)
            .await?;
        report.encoded += encoded.encoded.len();
        report.skipped += encoded.skipped.len();
        report.transcode_failures.extend(encoded.failed);

        // TRANSFER
        self.transition(SchedulerState::Transfer)?;
        let local = batch.mappings[0].remote_relative_path();
        let result = self.transfer.transfer(&local).await?;
        if !result.success() {
            return Err(SyncError::TransferFailed {
                context,
                exit_code: result.exit_code,
                output: result.output,
            });
        }

        // INDEX
        self.transition(SchedulerState::Index)?;
        self.index.start_scan(self.options.full_scan).await?;
        self.emit_index(IndexEvent::ScanStarted {
            full_scan: self.options.full_scan,
        });
        let outcome = wait_for_scan(
            self.index.as_ref(),
            self.options.poll_interval,
            self.options.max_scan_wait,
        )
        .await?;
        self.emit_index(IndexEvent::ScanFinished {
            polls: outcome.polls,
            items: outcome.count,
        });

        // COMMIT
        self.transition(SchedulerState::Commit)?;
        self.progress.save(context).await?;
        debug!(context = %context, "Batch committed");
        Ok(())
    }

    /// Moves to `Failed` and wraps `source` with the stored marker.
    async fn fail(&mut self, context: DateContext, source: SyncError) -> SyncError {
        self.state = SchedulerState::Failed;
        let last_committed = self.progress.load().await.ok().flatten();

        error!(
            context = %context,
            error = %source,
            last_committed = ?last_committed.map(|c| c.to_string()),
            "Batch failed, stopping"
        );
        self.emit(SyncEvent::Failed {
            context: Some(context.to_string()),
            message: source.to_string(),
        });

        SyncError::BatchFailed {
            context,
            last_committed,
            source: Box::new(source),
        }
    }

    fn transition(&mut self, to: SchedulerState) -> Result<()> {
        use SchedulerState::*;

        let valid = match (self.state, to) {
            // A new run starts from idle or after a previous one ended
            (Idle | Done | Failed, Bucketing) => true,

            (Bucketing, Transcode | Done | Failed) => true,
            (Transcode, Transfer | Failed) => true,
            (Transfer, Index | Failed) => true,
            (Index, Commit | Failed) => true,
            (Commit, Transcode | Done | Failed) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }

        debug!(from = %self.state, to = %to, "Scheduler transition");
        self.state = to;
        Ok(())
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }

    fn emit_index(&self, event: IndexEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Index(event)).ok();
        }
    }
}

fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed * 100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(dest: &str) -> FileMapping {
        FileMapping::new(format!("/in/{}", dest.rsplit('/').next().unwrap()), dest).unwrap()
    }

    #[test]
    fn test_bucket_sorts_and_groups() {
        let batches = bucket(vec![
            mapping("/out/2024/01 january/06/c.mp3"),
            mapping("/out/2023/12 december/31/z.mp3"),
            mapping("/out/2024/01 january/05/b.mp3"),
            mapping("/out/2024/01 january/06/a.mp3"),
            mapping("/out/2024/01 january/05/a.mp3"),
        ]);

        let contexts: Vec<String> = batches.iter().map(|b| b.context.to_string()).collect();
        assert_eq!(
            contexts,
            vec!["2023/12 december/31", "2024/01 january/05", "2024/01 january/06"]
        );
        assert_eq!(batches[1].len(), 2);
        // Stable within a batch
        assert_eq!(
            batches[2].mappings[0].destination().to_string_lossy(),
            "/out/2024/01 january/06/c.mp3"
        );
    }

    #[test]
    fn test_bucket_empty() {
        assert!(bucket(Vec::new()).is_empty());
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 3), 0);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_state_terminal() {
        assert!(SchedulerState::Done.is_terminal());
        assert!(SchedulerState::Failed.is_terminal());
        assert!(!SchedulerState::Commit.is_terminal());
        assert_eq!(SchedulerState::Transcode.to_string(), "transcode");
    }
}
