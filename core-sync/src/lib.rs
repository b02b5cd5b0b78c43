//! # Batch Sync Module
//!
//! Moves a date-structured music library to a remote media server, one day
//! at a time.
//!
//! ## Overview
//!
//! For every date context, in chronological order, the pipeline:
//! - Encodes the batch's files with `ffmpeg` (bounded fan-out)
//! - Mirrors the day directory to the remote store with `rsync`
//! - Asks the media server to rescan and waits until it is done
//! - Advances the progress marker so a rerun resumes after this day
//!
//! ## Components
//!
//! - **Transcoder** (`transcoder`): Encode profiles, cover-art detection, batched fan-out
//! - **Transfer Agent** (`transfer`): Mirror command and remote health check
//! - **Remote Index** (`remote_index`): Subsonic API client and scan polling
//! - **Progress Store** (`progress`): Monotonic high-water mark of committed days
//! - **Batch Scheduler** (`scheduler`): Bucketing and the per-batch state machine

pub mod error;
pub mod progress;
pub mod remote_index;
pub mod scheduler;
pub mod transcoder;
pub mod transfer;

pub use error::{Result, SyncError};
pub use progress::{retain_unprocessed, FileProgressStore, ProgressStore, MARKER_KEY};
pub use remote_index::{wait_for_scan, RemoteIndex, ScanOutcome, ScanStatus, SubsonicClient};
pub use scheduler::{bucket, Batch, BatchScheduler, SchedulerOptions, SchedulerState, SyncReport};
pub use transcoder::{EncodeProfile, TranscodeFailure, TranscodeReport, Transcoder};
pub use transfer::{TransferAgent, TransferResult};
