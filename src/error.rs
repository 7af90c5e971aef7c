use std::path::PathBuf;
use thiserror::Error;

/// Failures a single conversion can end in.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("`ffmpeg` not found (bundled dir {}, then PATH)", .bundled.display())]
    FfmpegNotFound { bundled: PathBuf },

    #[error("ffmpeg binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("ffmpeg binary is not executable: {}", .0.display())]
    NotExecutable(PathBuf),

    #[error("ffmpeg failed with {}: {stderr_tail}", exit_label(.code))]
    Ffmpeg {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Output file was not produced: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("conversion cancelled")]
    Cancelled,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
