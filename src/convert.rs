use crate::command::{EncodeSettings, build_args, render_command};
use crate::error::ConvertError;
use crate::ffmpeg::{FfmpegSession, Tools, spawn_ffmpeg, wait_for_exit};
use crate::outcome::{ConversionReport, classify, human_size};
use crate::probe::{MediaInfo, media_info};
use crate::progress::{ProgressUi, pump_progress};
use anyhow::{Context, Result};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Parse `-progress` output on a reader thread and draw a bar.
    pub progress: bool,
    pub verbose: bool,
}

pub fn convert_file(
    tools: &Tools,
    job: &Job,
    settings: &EncodeSettings,
    opts: RunOptions,
    cancel: &AtomicBool,
) -> Result<ConversionReport> {
    let input = &job.input;
    if !input.is_file() {
        error!(input = %input.display(), "input file does not exist");
        return Err(ConvertError::InputNotFound(input.clone()).into());
    }
    let input_info = media_info(tools, input)?;
    convert_probed(tools, job, &input_info, settings, opts, cancel)
}

/// Same as [`convert_file`] for an input the caller has already probed.
pub fn convert_probed(
    tools: &Tools,
    job: &Job,
    input_info: &MediaInfo,
    settings: &EncodeSettings,
    opts: RunOptions,
    cancel: &AtomicBool,
) -> Result<ConversionReport> {
    let Job { input, output } = job;
    ensure_parent_dir(output)?;
    info!(input = %input.display(), info = %input_info.describe(), "input");

    let args = build_args(settings, input, output, opts.progress);
    info!(
        input = %input.display(),
        output = %output.display(),
        settings = %settings.summary(),
        "starting conversion"
    );
    info!(command = %render_command(&tools.ffmpeg, &args), "ffmpeg command");

    let started = Instant::now();
    let FfmpegSession {
        mut child,
        stdout,
        stderr_tail,
    } = spawn_ffmpeg(tools, &args, opts.verbose)?;

    let reader = if opts.progress {
        let ui = ProgressUi::new(input_info.duration_ms(), &display_name(input));
        Reader::Progress(pump_progress(stdout, ui))
    } else {
        Reader::Plain(thread::spawn(move || discard(stdout)))
    };

    let waited = wait_for_exit(&mut child, cancel);
    let elapsed = started.elapsed();
    let tail = stderr_tail.join().unwrap_or_default();
    let ui = reader.finish();

    let status = match waited {
        Ok(status) => status,
        Err(e) => {
            let cancelled = matches!(e, ConvertError::Cancelled);
            if let Some(ui) = &ui {
                ui.abandon(if cancelled { "Cancelled" } else { "Failed" });
            }
            if cancelled {
                warn!(output = %output.display(), "{e}");
                remove_partial(output);
            } else {
                error!(output = %output.display(), "{e}");
            }
            return Err(e.into());
        }
    };

    if let Err(e) = classify(status.success(), status.code(), &tail, output) {
        if let Some(ui) = &ui {
            ui.abandon("Failed");
        }
        error!(
            code = ?status.code(),
            elapsed_secs = elapsed.as_secs_f64(),
            "{e}"
        );
        return Err(e.into());
    }

    let output_size = std::fs::metadata(output)
        .with_context(|| format!("cannot stat {}", output.display()))?
        .len();
    let report = ConversionReport {
        input: input.clone(),
        output: output.clone(),
        input_size: input_info.size_bytes,
        output_size,
        elapsed,
    };
    info!(
        output = %output.display(),
        size = %human_size(output_size),
        "conversion finished: {}",
        report.summary()
    );
    Ok(report)
}

enum Reader {
    Progress(thread::JoinHandle<Result<(crate::progress::ProgressState, ProgressUi)>>),
    Plain(thread::JoinHandle<io::Result<u64>>),
}

impl Reader {
    fn finish(self) -> Option<ProgressUi> {
        match self {
            Reader::Progress(handle) => match handle.join() {
                Ok(Ok((state, ui))) => {
                    if !state.ended {
                        warn!(frame = state.frame, "progress stream ended early");
                    }
                    Some(ui)
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "progress reader failed");
                    None
                }
                Err(_) => {
                    warn!("progress reader panicked");
                    None
                }
            },
            Reader::Plain(handle) => {
                let _ = handle.join();
                None
            }
        }
    }
}

fn remove_partial(output: &Path) {
    match std::fs::remove_file(output) {
        Ok(()) => info!(output = %output.display(), "removed partial output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(output = %output.display(), error = %e, "could not remove partial output"),
    }
}

fn discard<R: Read>(mut reader: R) -> io::Result<u64> {
    io::copy(&mut reader, &mut io::sink())
}

fn ensure_parent_dir(output: &Path) -> Result<()> {
    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create output directory {}", dir.display()))?;
            info!(dir = %dir.display(), "created output directory");
        }
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
