//! tracksync - chronological batch sync of a music library
//!
//! Entry point for the CLI application.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventStream, SyncEvent};
use core_runtime::logging::{format_duration, init_logging, LogFormat, LogLevel, LoggingConfig};
use core_service::{CoreDependencies, SyncService};
use core_sync::SyncReport;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How long the progress printer may take to drain after a sync returns.
const PRINTER_DRAIN: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(cli: &Cli) -> Result<()> {
    let level: LogLevel = cli.log_level.parse().context("Invalid --log-level")?;
    let mut config = LoggingConfig::default().with_level(level);

    if let Some(format) = &cli.log_format {
        let format: LogFormat = format.parse().context("Invalid --log-format")?;
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_log_file(path);
    }

    init_logging(config).context("Failed to initialize logging")
}

async fn run(cli: Cli) -> Result<()> {
    let service = build_service(&cli)?;

    match cli.command {
        Command::Sync {
            manifest,
            output_root,
            full_scan,
        } => {
            let printer = spawn_progress_printer(service.subscribe());
            let result = service
                .sync_manifest(&manifest, &output_root, full_scan)
                .await;
            // Closes the event bus so the printer drains and exits.
            drop(service);
            wait_for_printer(printer).await;
            finish(result)
        }

        Command::SyncDir {
            input_root,
            output_root,
            full_scan,
        } => {
            let printer = spawn_progress_printer(service.subscribe());
            let result = service.sync_dir(&input_root, &output_root, full_scan).await;
            drop(service);
            wait_for_printer(printer).await;
            finish(result)
        }

        Command::Mappings {
            manifest,
            output_root,
        } => {
            let mappings = service
                .manifest_mappings(&manifest, &output_root)
                .context("Failed to generate mappings")?;
            for mapping in &mappings {
                println!("{}", mapping);
            }
            info!(count = mappings.len(), "Printed mappings");
            Ok(())
        }

        Command::Status => {
            match service.status().await.context("Failed to read progress")? {
                Some(context) => println!("Last committed: {}", context),
                None => println!("Nothing committed yet"),
            }
            Ok(())
        }

        Command::Healthcheck { index } => {
            if !service.healthcheck().await {
                bail!(
                    "Remote store {} is unreachable",
                    service.config().transfer.remote_url
                );
            }
            println!("Remote store reachable");

            if index {
                service.ping().await.context("Media server check failed")?;
                println!("Media server reachable");
            }
            Ok(())
        }

        Command::Scan { full } => {
            let outcome = service.scan(full).await.context("Remote scan failed")?;
            match outcome.count {
                Some(count) => println!("Scan complete: {} items indexed", count),
                None => println!("Scan complete"),
            }
            Ok(())
        }

        Command::SetPassword { password } => {
            service
                .set_password(&password)
                .await
                .context("Failed to store password")?;
            println!("Password stored");
            Ok(())
        }
    }
}

fn build_service(cli: &Cli) -> Result<SyncService> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => CoreConfig::default_path()
            .context("No configuration directory on this platform; pass --config")?,
    };

    let config = CoreConfig::from_toml_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    let deps = CoreDependencies::desktop().context("Failed to initialize platform bridges")?;

    SyncService::new(config, deps).context("Invalid configuration")
}

fn spawn_progress_printer(events: EventStream) -> JoinHandle<std::io::Stdout> {
    tokio::spawn(print_progress(events, std::io::stdout()))
}

async fn wait_for_printer<W>(printer: JoinHandle<W>) {
    if tokio::time::timeout(PRINTER_DRAIN, printer).await.is_err() {
        debug!("Progress printer did not drain in time");
    }
}

/// Prints batch progress until every event sender is gone.
async fn print_progress<W: Write>(mut events: EventStream, mut out: W) -> W {
    loop {
        let line = match events.recv().await {
            Ok(CoreEvent::Sync(SyncEvent::BatchStarted { context, files })) => {
                format!("==> {} ({} files)", context, files)
            }
            Ok(CoreEvent::Sync(SyncEvent::Progress {
                processed,
                total,
                percent,
            })) => format!("    {}/{} ({}%)", processed, total, percent),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        if writeln!(out, "{}", line).is_err() {
            break;
        }
    }
    out
}

fn finish(result: core_service::Result<SyncReport>) -> Result<()> {
    match result {
        Ok(report) => {
            println!(
                "Synced {} files in {} batches ({} encoded, {} already present, {} failed) in {}",
                report.processed,
                report.batches,
                report.encoded,
                report.skipped,
                report.transcode_failures.len(),
                format_duration(report.duration)
            );
            for failure in &report.transcode_failures {
                println!("    not encoded: {}", failure.mapping.source().display());
            }
            if let Some(context) = report.last_committed {
                println!("Last committed: {}", context);
            }
            Ok(())
        }
        Err(err) => {
            match err.last_committed() {
                Some(context) => eprintln!("Last committed: {}; a rerun resumes after it", context),
                None => eprintln!("No date context committed yet"),
            }
            Err(err).context("Sync failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::events::EventBus;

    #[tokio::test]
    async fn test_printer_drains_events_sent_before_close() {
        let bus = EventBus::default();
        let printer = tokio::spawn(print_progress(EventStream::new(bus.subscribe()), Vec::new()));

        bus.emit(CoreEvent::Sync(SyncEvent::BatchStarted {
            context: "2024/01 january/05".to_string(),
            files: 2,
        }))
        .unwrap();
        bus.emit(CoreEvent::Sync(SyncEvent::Progress {
            processed: 2,
            total: 2,
            percent: 100,
        }))
        .unwrap();
        drop(bus);

        let out = tokio::time::timeout(Duration::from_secs(1), printer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "==> 2024/01 january/05 (2 files)\n    2/2 (100%)\n"
        );
    }
}
