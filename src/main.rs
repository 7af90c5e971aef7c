mod batch;
mod cli;
mod command;
mod convert;
mod error;
mod ffmpeg;
mod logging;
mod outcome;
mod probe;
mod progress;
mod tui;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{AppConfig, Cli, Mode};
use convert::{Job, RunOptions, convert_file};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&cli.log_file, cli.verbose)?;
    info!(version = env!("CARGO_PKG_VERSION"), "h265_converter starting");

    run(cli).inspect_err(log_failure)
}

/// Everything that fails after logging is up ends in the log file too.
fn log_failure(err: &anyhow::Error) {
    error!("{err:#}");
}

fn run(cli: Cli) -> Result<()> {
    let cfg = cli.into_config()?;
    let cancel = install_cancel_handler()?;

    let tools = match ffmpeg::resolve_tools(cfg.ffmpeg.clone()) {
        Ok(tools) => tools,
        Err(e) => {
            error!("Install ffmpeg first:");
            error!("  macOS:   brew install ffmpeg");
            error!("  Windows: https://ffmpeg.org/download.html");
            error!("  Linux:   sudo apt-get install ffmpeg");
            return Err(e);
        }
    };

    match cfg.mode.clone() {
        Mode::Check => run_check(&tools),
        Mode::Single { input, output } => {
            let job = Job { input, output };
            run_single(&tools, &job, &cfg, &cancel)
        }
        Mode::Interactive => {
            let Some((job, settings)) = tui::interactive_job(&cfg.settings)? else {
                info!("conversion declined");
                return Ok(());
            };
            let cfg = AppConfig { settings, ..cfg };
            run_single(&tools, &job, &cfg, &cancel)
        }
        Mode::Batch {
            directory,
            recursive,
        } => {
            let summary = batch::run_batch(
                &tools,
                &directory,
                recursive,
                &cfg.settings,
                run_options(&cfg),
                &cancel,
            );
            println!();
            println!("Batch summary");
            println!("  directory: {}", directory.display());
            println!("  recursive: {}", if recursive { "yes" } else { "no" });
            println!("  found:     {}", summary.found);
            println!("  converted: {}", summary.converted);
            println!("  skipped:   {} (already H.265)", summary.skipped);
            println!("  failed:    {}", summary.failed);
            if summary.cancelled {
                warn!("batch cancelled");
            }
            if summary.converted == 0 {
                bail!("no files were converted, see the log for details");
            }
            Ok(())
        }
    }
}

fn run_options(cfg: &AppConfig) -> RunOptions {
    RunOptions {
        progress: cfg.progress,
        verbose: cfg.verbose,
    }
}

fn run_single(
    tools: &ffmpeg::Tools,
    job: &Job,
    cfg: &AppConfig,
    cancel: &AtomicBool,
) -> Result<()> {
    let report = convert_file(tools, job, &cfg.settings, run_options(cfg), cancel)
        .with_context(|| format!("converting {}", job.input.display()))?;
    println!();
    println!("Conversion succeeded");
    println!("  input:  {}", report.input.display());
    println!("  output: {}", report.output.display());
    println!("  {}", report.summary());
    Ok(())
}

fn run_check(tools: &ffmpeg::Tools) -> Result<()> {
    let check = ffmpeg::self_check(tools)?;
    println!("ffmpeg:        {} ({:?})", tools.ffmpeg.display(), tools.source);
    println!("version:       {}", check.version);
    println!(
        "ffprobe:       {}",
        tools
            .ffprobe
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".into())
    );
    println!("libx265:       {}", yes_no(check.has_libx265));
    println!("test encode:   {}", yes_no(check.test_encode_ok));
    if !check.passed() {
        bail!("ffmpeg cannot encode H.265 on this machine");
    }
    Ok(())
}

fn yes_no(ok: bool) -> &'static str {
    if ok { "ok" } else { "FAILED" }
}

/// First Ctrl-C terminates the running ffmpeg, a second one exits at once.
fn install_cancel_handler() -> Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\nCtrl-C received, stopping ffmpeg...");
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(cancel)
}
