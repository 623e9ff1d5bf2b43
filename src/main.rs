use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use overlay_dispatcher::{BatchDispatcher, Config, LogSink, ProgressSink, TerminalSink};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("overlay-dispatcher")
        .version("0.1.0")
        .author("TigreRoll")
        .about("Composite avatar videos onto screen recordings, several folders at a time")
        .arg(
            Arg::new("root-dir")
                .short('d')
                .long("root-dir")
                .value_name("DIR")
                .help("Directory containing numbered profile folders")
                .required(true)
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Output directory (default: 'Final Video' next to the root directory)")
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Number of concurrent FFmpeg jobs")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .help("Kill a job running longer than this (0 disables)")
                .value_parser(clap::value_parser!(u64))
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_name("FILE")
                .help("Write a JSON batch report to this file")
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Show what would be processed without running FFmpeg")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .help("Log progress lines instead of drawing progress bars")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let default_filter = if verbose { "overlay_dispatcher=debug,info" } else { "overlay_dispatcher=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let root_dir = matches
        .get_one::<String>("root-dir")
        .map(PathBuf::from)
        .context("--root-dir is required")?;

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from(&PathBuf::from(path))?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    if let Some(dir) = matches.get_one::<String>("output-dir") {
        config.layout.output_dir = Some(PathBuf::from(dir));
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.dispatch.max_workers = *workers;
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.dispatch.job_timeout_secs = *timeout;
    }

    info!("🚀 Overlay Dispatcher starting...");
    if verbose {
        info!("{}", config.summary());
    }

    if !root_dir.is_dir() {
        error!("Root directory does not exist: {}", root_dir.display());
        return Err(anyhow::anyhow!("Root directory not found"));
    }

    let dispatcher = BatchDispatcher::with_ffmpeg(config)?;

    if matches.get_flag("dry-run") {
        let plan = dispatcher.plan(&root_dir).await?;
        info!("📂 Output directory: {}", plan.output_dir.display());
        for (unit_id, command) in dispatcher.planned_commands(&plan) {
            println!("{}:\n  {}", unit_id, command);
        }
        return Ok(());
    }

    let sink: Box<dyn ProgressSink> = if matches.get_flag("no-progress") || !std::io::stderr().is_terminal() {
        Box::new(LogSink::new())
    } else {
        Box::new(TerminalSink::new())
    };

    let (report, _board) = match dispatcher.run(&root_dir, sink).await {
        Ok(result) => result,
        Err(e) => {
            if e.is_fatal() {
                error!("🛑 Batch aborted before any unit ran: {}", e);
            } else {
                error!("❌ Batch failed: {}", e);
            }
            return Err(e.into());
        }
    };

    info!("🎉 Batch completed in {:.2}s", report.total_time.as_secs_f64());
    info!("✅ Successful: {}", report.succeeded);
    info!("❌ Failed: {}", report.failed);
    for unit in report.units.iter().filter(|u| u.error.is_some()) {
        warn!("   {}: {}", unit.unit_id, unit.error.as_deref().unwrap_or_default());
    }

    if let Some(path) = matches.get_one::<String>("report") {
        report.save(&PathBuf::from(path)).await?;
    }

    Ok(())
}
