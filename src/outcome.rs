use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Decides whether a finished ffmpeg run produced a usable output.
/// A failed exit wins over a missing file.
pub fn classify(
    success: bool,
    code: Option<i32>,
    stderr_tail: &str,
    output: &Path,
) -> Result<(), ConvertError> {
    if !success {
        return Err(ConvertError::Ffmpeg {
            code,
            stderr_tail: stderr_tail.to_string(),
        });
    }
    if !output.is_file() {
        return Err(ConvertError::OutputMissing(output.to_path_buf()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_size: u64,
    pub output_size: u64,
    pub elapsed: Duration,
}

impl ConversionReport {
    /// Space saved relative to the input, in percent. Negative when the
    /// output grew.
    pub fn compression_ratio(&self) -> f64 {
        if self.input_size == 0 {
            return 0.0;
        }
        (1.0 - self.output_size as f64 / self.input_size as f64) * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "took {:.2}s, {} -> {}, saved {:.2}%",
            self.elapsed.as_secs_f64(),
            human_size(self.input_size),
            human_size(self.output_size),
            self.compression_ratio()
        )
    }
}

pub fn human_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}
