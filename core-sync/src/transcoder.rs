//! Transcoder
//!
//! Encodes the files of a batch with `ffmpeg`. Encodes are launched in groups
//! of at most `concurrency`; each group is awaited in full before the next
//! one starts. A failed encode is logged, its partial output removed, and the
//! file reported; it is never raised.

use crate::error::Result;
use bridge_traits::process::{CommandSpec, ProcessRunner};
use core_library::FileMapping;
use core_runtime::logging::strip_path;
use futures::future::join_all;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Sample rate every output is normalised to.
pub const SAMPLE_RATE: &str = "44100";

/// Streams wider or taller than this ratio are banners, not covers.
const MAX_COVER_ASPECT: f64 = 3.0;

/// How a target format is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeProfile {
    /// 16-bit big-endian PCM; used for AIFF and WAV targets
    Lossless,
    /// Constant bitrate, audio plus best-guess cover art
    Lossy { bitrate_kbps: u32 },
}

impl EncodeProfile {
    /// Picks the profile for a target extension.
    pub fn for_extension(extension: &str) -> Self {
        match extension
            .trim_start_matches('.')
            .to_ascii_lowercase()
            .as_str()
        {
            "aiff" | "aif" | "wav" => EncodeProfile::Lossless,
            _ => EncodeProfile::Lossy { bitrate_kbps: 320 },
        }
    }
}

// ============================================================================
// Cover art detection
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

/// A video stream as reported by `ffprobe`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeStream {
    pub index: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub tags: Option<ProbeTags>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeTags {
    #[serde(default)]
    pub comment: Option<String>,
}

/// Picks the stream most likely to be the cover image: the most square one,
/// ignoring banner-shaped streams and ones tagged as logotypes.
pub fn guess_cover_stream(streams: &[ProbeStream]) -> Option<u32> {
    streams
        .iter()
        .filter(|s| {
            if s.width == 0 || s.height == 0 {
                return false;
            }
            let (w, h) = (f64::from(s.width), f64::from(s.height));
            if w / h > MAX_COVER_ASPECT || h / w > MAX_COVER_ASPECT {
                debug!(index = s.index, "Skipping non-square video stream");
                return false;
            }
            let logotype = s
                .tags
                .as_ref()
                .and_then(|t| t.comment.as_deref())
                .is_some_and(|c| c.to_lowercase().contains("logotype"));
            !logotype
        })
        .min_by_key(|s| s.width.abs_diff(s.height))
        .map(|s| s.index)
}

// ============================================================================
// Report
// ============================================================================

/// A file that did not encode.
#[derive(Debug, Clone)]
pub struct TranscodeFailure {
    pub mapping: FileMapping,
    pub exit_code: Option<i32>,
    pub message: String,
}

/// Outcome of one `transcode` call.
#[derive(Debug, Clone, Default)]
pub struct TranscodeReport {
    /// Mappings (with the target extension) that were encoded
    pub encoded: Vec<FileMapping>,
    /// Mappings whose destination already existed
    pub skipped: Vec<FileMapping>,
    pub failed: Vec<TranscodeFailure>,
}

impl TranscodeReport {
    pub fn attempted(&self) -> usize {
        self.encoded.len() + self.failed.len()
    }
}

enum Outcome {
    Encoded(FileMapping),
    Skipped(FileMapping),
    Failed(TranscodeFailure),
}

async fn remove_partial_output(destination: &Path) {
    match tokio::fs::remove_file(destination).await {
        Ok(()) => debug!(file = %strip_path(&destination.to_string_lossy()), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, file = %destination.display(), "Could not remove partial output"),
    }
}

// ============================================================================
// Transcoder
// ============================================================================

pub struct Transcoder {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: String,
    ffprobe: String,
    concurrency: usize,
}

impl Transcoder {
    pub fn new(runner: Arc<dyn ProcessRunner>, concurrency: usize) -> Self {
        Self {
            runner,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_programs(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Encodes every mapping to `target_extension`.
    ///
    /// Outputs that already exist are skipped before grouping, so only
    /// launched encodes count against `concurrency`.
    pub async fn transcode(
        &self,
        mappings: &[FileMapping],
        target_extension: &str,
    ) -> Result<TranscodeReport> {
        let profile = EncodeProfile::for_extension(target_extension);
        let mut report = TranscodeReport::default();

        let mut pending = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            match self.prepare(mapping.with_extension(target_extension)).await {
                Ok(m) => pending.push(m),
                Err(Outcome::Skipped(m)) => report.skipped.push(m),
                Err(Outcome::Failed(f)) => report.failed.push(f),
                Err(Outcome::Encoded(m)) => report.encoded.push(m),
            }
        }

        for group in pending.chunks(self.concurrency) {
            let tasks = group
                .iter()
                .cloned()
                .map(|m| self.encode_one(m, profile));
            let outcomes = join_all(tasks).await;
            debug!(tasks = outcomes.len(), "Encode group finished");

            for outcome in outcomes {
                match outcome {
                    Outcome::Encoded(m) => report.encoded.push(m),
                    Outcome::Skipped(m) => report.skipped.push(m),
                    Outcome::Failed(f) => report.failed.push(f),
                }
            }
        }

        info!(
            encoded = report.encoded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Finished encoding"
        );
        Ok(report)
    }

    /// Creates the destination directory and returns the mapping if it still
    /// needs encoding, or the settled outcome if it does not.
    async fn prepare(&self, mapping: FileMapping) -> std::result::Result<FileMapping, Outcome> {
        let destination = mapping.destination();

        if let Some(parent) = destination.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Err(self.failure(mapping, None, format!("create directory: {}", e)));
            }
        }

        if tokio::fs::try_exists(destination).await.unwrap_or(false) {
            debug!(file = %strip_path(&destination.to_string_lossy()), "Output exists, skipping");
            return Err(Outcome::Skipped(mapping));
        }

        Ok(mapping)
    }

    async fn encode_one(&self, mapping: FileMapping, profile: EncodeProfile) -> Outcome {
        let destination = mapping.destination();

        let command = match profile {
            EncodeProfile::Lossless => self.lossless_command(mapping.source(), destination),
            EncodeProfile::Lossy { bitrate_kbps } => {
                let cover = self.probe_cover(mapping.source()).await;
                self.lossy_command(mapping.source(), destination, bitrate_kbps, cover)
            }
        };

        let (exit_code, message) = match self.runner.run(&command).await {
            Ok(output) if output.success() => return Outcome::Encoded(mapping),
            Ok(output) => (Some(output.exit_code), output.stderr.trim().to_string()),
            Err(e) => (None, e.to_string()),
        };

        // A partial output must not survive to be mirrored or skipped later.
        remove_partial_output(destination).await;
        self.failure(mapping, exit_code, message)
    }

    fn failure(&self, mapping: FileMapping, exit_code: Option<i32>, message: String) -> Outcome {
        error!(
            source = %mapping.source().display(),
            exit_code = ?exit_code,
            error = %message,
            "Encode failed"
        );
        Outcome::Failed(TranscodeFailure {
            mapping,
            exit_code,
            message,
        })
    }

    fn base_command(&self, source: &Path) -> CommandSpec {
        CommandSpec::new(&self.ffmpeg)
            .arg("-i")
            .arg(source.to_string_lossy())
            .args(["-ar", SAMPLE_RATE, "-write_id3v2", "1"])
    }

    /// `ffmpeg -i <src> -ar 44100 -write_id3v2 1 -c:a pcm_s16be -y <dest>`
    pub fn lossless_command(&self, source: &Path, destination: &Path) -> CommandSpec {
        self.base_command(source)
            .args(["-c:a", "pcm_s16be", "-y"])
            .arg(destination.to_string_lossy())
    }

    /// `ffmpeg -i <src> -ar 44100 -write_id3v2 1 -b:a 320k -map 0:0 [-map 0:<cover>] <dest>`
    pub fn lossy_command(
        &self,
        source: &Path,
        destination: &Path,
        bitrate_kbps: u32,
        cover_stream: Option<u32>,
    ) -> CommandSpec {
        let mut command = self
            .base_command(source)
            .arg("-b:a")
            .arg(format!("{}k", bitrate_kbps))
            .args(["-map", "0:0"]);
        if let Some(index) = cover_stream {
            command = command.arg("-map").arg(format!("0:{}", index));
        }
        command.arg(destination.to_string_lossy())
    }

    /// `ffprobe -v error -select_streams v -show_entries stream=index,width,height,:tags=comment -of json <src>`
    pub fn probe_command(&self, source: &Path) -> CommandSpec {
        CommandSpec::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v",
                "-show_entries",
                "stream=index,width,height,:tags=comment",
                "-of",
                "json",
            ])
            .arg(source.to_string_lossy())
    }

    async fn probe_cover(&self, source: &Path) -> Option<u32> {
        let output = match self.runner.run(&self.probe_command(source)).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                warn!(exit_code = output.exit_code, source = %source.display(), "ffprobe failed");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "ffprobe unavailable");
                return None;
            }
        };

        let probe: ProbeOutput = match serde_json::from_str(&output.stdout) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, source = %source.display(), "Unreadable ffprobe output");
                return None;
            }
        };

        let cover = guess_cover_stream(&probe.streams);
        match cover {
            Some(index) => debug!(index, "Guessed cover stream"),
            None => info!(file = %strip_path(&source.to_string_lossy()), "No cover image found"),
        }
        cover
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::process::ProcessOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn stream(index: u32, width: u32, height: u32, comment: Option<&str>) -> ProbeStream {
        ProbeStream {
            index,
            width,
            height,
            tags: comment.map(|c| ProbeTags {
                comment: Some(c.to_string()),
            }),
        }
    }

    /// Records every command; ffmpeg fails for sources containing "broken".
    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<CommandSpec>>,
        probe_json: String,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(&self, command: &CommandSpec) -> BridgeResult<ProcessOutput> {
            self.commands.lock().unwrap().push(command.clone());
            let broken = command.args.iter().any(|a| a.contains("broken"));
            Ok(match command.program.as_str() {
                "ffprobe" => ProcessOutput {
                    exit_code: 0,
                    stdout: self.probe_json.clone(),
                    stderr: String::new(),
                },
                _ if broken => ProcessOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "Invalid data found when processing input\n".to_string(),
                },
                _ => ProcessOutput {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                },
            })
        }
    }

    /// ffmpeg that writes half a file and then exits 1.
    struct PartialWriter;

    #[async_trait]
    impl ProcessRunner for PartialWriter {
        async fn run(&self, command: &CommandSpec) -> BridgeResult<ProcessOutput> {
            if let Some(output) = command.args.last() {
                std::fs::write(output, b"partial").unwrap();
            }
            Ok(ProcessOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Conversion failed!\n".to_string(),
            })
        }
    }

    /// ffmpeg that takes 60ms for sources containing "slow" and 5ms otherwise,
    /// logging when each encode starts and ends.
    #[derive(Default)]
    struct TimedRunner {
        events: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TimedRunner {
        fn position(&self, event: &str) -> usize {
            let events = self.events.lock().unwrap();
            events
                .iter()
                .position(|e| e == event)
                .unwrap_or_else(|| panic!("no {event} in {events:?}"))
        }
    }

    #[async_trait]
    impl ProcessRunner for TimedRunner {
        async fn run(&self, command: &CommandSpec) -> BridgeResult<ProcessOutput> {
            let name = Path::new(&command.args[1])
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            self.events.lock().unwrap().push(format!("start {name}"));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = if name.contains("slow") { 60 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("end {name}"));
            Ok(ProcessOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn day_mapping(root: &Path, name: &str) -> FileMapping {
        FileMapping::new(
            format!("/in/{name}.aiff"),
            root.join(format!("2024/01 january/05/{name}.aiff")),
        )
        .unwrap()
    }

    #[test]
    fn test_profile_for_extension() {
        assert_eq!(EncodeProfile::for_extension(".aiff"), EncodeProfile::Lossless);
        assert_eq!(EncodeProfile::for_extension("WAV"), EncodeProfile::Lossless);
        assert_eq!(
            EncodeProfile::for_extension(".mp3"),
            EncodeProfile::Lossy { bitrate_kbps: 320 }
        );
    }

    #[test]
    fn test_guess_cover_prefers_most_square() {
        let streams = vec![
            stream(1, 600, 500, None),
            stream(2, 500, 500, None),
            stream(3, 250, 1500, None),
        ];
        assert_eq!(guess_cover_stream(&streams), Some(2));
    }

    #[test]
    fn test_guess_cover_skips_banners_and_logotypes() {
        let streams = vec![
            stream(1, 1500, 250, None),
            stream(2, 500, 500, Some("Label LOGOTYPE")),
        ];
        assert_eq!(guess_cover_stream(&streams), None);
        assert_eq!(guess_cover_stream(&[]), None);

        let with_cover = vec![stream(2, 500, 500, Some("Logotype")), stream(3, 640, 600, None)];
        assert_eq!(guess_cover_stream(&with_cover), Some(3));
    }

    #[test]
    fn test_probe_output_parsing() {
        let probe: ProbeOutput = serde_json::from_str(
            r#"{"programs": [], "streams": [{"index": 1, "width": 500, "height": 500, "tags": {"comment": "Cover (front)"}}]}"#,
        )
        .unwrap();
        assert_eq!(probe.streams.len(), 1);
        assert_eq!(guess_cover_stream(&probe.streams), Some(1));

        let empty: ProbeOutput = serde_json::from_str("{}").unwrap();
        assert!(empty.streams.is_empty());
    }

    #[test]
    fn test_command_lines() {
        let transcoder = Transcoder::new(Arc::new(RecordingRunner::default()), 4);
        let src = Path::new("/in/a b.aiff");
        let dst = Path::new("/out/2024/01 january/05/a b.mp3");

        assert_eq!(
            transcoder.lossy_command(src, dst, 320, Some(1)).args,
            vec![
                "-i", "/in/a b.aiff", "-ar", "44100", "-write_id3v2", "1", "-b:a", "320k",
                "-map", "0:0", "-map", "0:1", "/out/2024/01 january/05/a b.mp3"
            ]
        );
        assert_eq!(
            transcoder.lossless_command(src, Path::new("/o/a.aiff")).args,
            vec![
                "-i", "/in/a b.aiff", "-ar", "44100", "-write_id3v2", "1", "-c:a", "pcm_s16be",
                "-y", "/o/a.aiff"
            ]
        );
        assert_eq!(transcoder.probe_command(src).program, "ffprobe");
    }

    #[tokio::test]
    async fn test_transcode_reports_failures_without_aborting() {
        let out = TempDir::new().unwrap();
        let root = out.path().join("lib");
        let runner = Arc::new(RecordingRunner {
            probe_json: r#"{"streams": [{"index": 1, "width": 500, "height": 500}]}"#.to_string(),
            ..Default::default()
        });
        let transcoder = Transcoder::new(runner.clone(), 2);

        let mappings = vec![
            FileMapping::new("/in/a.aiff", root.join("2024/01 january/05/a.aiff")).unwrap(),
            FileMapping::new("/in/broken.aiff", root.join("2024/01 january/05/broken.aiff"))
                .unwrap(),
            FileMapping::new("/in/c.flac", root.join("2024/01 january/05/c.flac")).unwrap(),
        ];

        let report = transcoder.transcode(&mappings, ".mp3").await.unwrap();

        assert_eq!(report.encoded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].exit_code, Some(1));
        assert!(report.failed[0].message.contains("Invalid data"));
        assert_eq!(report.attempted(), 3);
        assert!(report
            .encoded
            .iter()
            .all(|m| m.destination().extension().unwrap() == "mp3"));
        assert!(root.join("2024/01 january/05").is_dir());

        let commands = runner.commands.lock().unwrap();
        let encodes: Vec<_> = commands.iter().filter(|c| c.program == "ffmpeg").collect();
        assert_eq!(encodes.len(), 3);
        assert!(encodes.iter().all(|c| c.args.contains(&"0:1".to_string())));
    }

    #[tokio::test]
    async fn test_existing_outputs_are_skipped() {
        let out = TempDir::new().unwrap();
        let dest = out.path().join("2024/01 january/05/a.mp3");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"done").unwrap();

        let runner = Arc::new(RecordingRunner::default());
        let transcoder = Transcoder::new(runner.clone(), 4);
        let mappings =
            vec![FileMapping::new("/in/a.aiff", out.path().join("2024/01 january/05/a.aiff"))
                .unwrap()];

        let report = transcoder.transcode(&mappings, ".mp3").await.unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert!(report.encoded.is_empty());
        assert!(runner.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_encode_removes_partial_output() {
        let out = TempDir::new().unwrap();
        let transcoder = Transcoder::new(Arc::new(PartialWriter), 2);
        let mappings = vec![day_mapping(out.path(), "a")];
        let dest = out.path().join("2024/01 january/05/a.aiff");

        let report = transcoder.transcode(&mappings, ".aiff").await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].exit_code, Some(1));
        assert!(!dest.exists());

        // The rerun tries again instead of treating the file as done.
        let rerun = transcoder.transcode(&mappings, ".aiff").await.unwrap();
        assert!(rerun.skipped.is_empty());
        assert_eq!(rerun.failed.len(), 1);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_next_group_waits_for_slowest_encode() {
        let out = TempDir::new().unwrap();
        let runner = Arc::new(TimedRunner::default());
        let transcoder = Transcoder::new(runner.clone(), 2);
        let mappings: Vec<_> = ["slow", "quick", "third", "fourth"]
            .iter()
            .map(|name| day_mapping(out.path(), name))
            .collect();

        let report = transcoder.transcode(&mappings, ".aiff").await.unwrap();
        assert_eq!(report.encoded.len(), 4);

        let slow_done = runner.position("end slow");
        assert!(runner.position("end quick") < slow_done);
        assert!(runner.position("start third") > slow_done);
        assert!(runner.position("start fourth") > slow_done);
    }

    #[tokio::test]
    async fn test_existing_outputs_do_not_take_encode_slots() {
        let out = TempDir::new().unwrap();
        for name in ["done1", "done2"] {
            let dest = out.path().join(format!("2024/01 january/05/{name}.aiff"));
            std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
            std::fs::write(&dest, b"done").unwrap();
        }
        let runner = Arc::new(TimedRunner::default());
        let transcoder = Transcoder::new(runner.clone(), 2);
        let mappings: Vec<_> = ["done1", "a", "done2", "b"]
            .iter()
            .map(|name| day_mapping(out.path(), name))
            .collect();

        let report = transcoder.transcode(&mappings, ".aiff").await.unwrap();

        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.encoded.len(), 2);
        // a and b share one group
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
        assert!(runner.position("start b") < runner.position("end a"));
    }
}
