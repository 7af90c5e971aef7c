use crate::ffmpeg::Tools;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInfo {
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
    pub size_bytes: u64,
}

impl MediaInfo {
    pub fn is_hevc(&self) -> bool {
        matches!(self.codec.as_deref(), Some("hevc" | "h265"))
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_secs
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * 1000.0).round() as u64)
    }

    pub fn describe(&self) -> String {
        let codec = self.codec.as_deref().unwrap_or("unknown");
        let dims = match (self.width, self.height) {
            (Some(w), Some(h)) => format!("{w}x{h}"),
            _ => "?x?".to_string(),
        };
        format!(
            "{codec}, {dims}, {}",
            crate::outcome::human_size(self.size_bytes)
        )
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    // ffprobe prints numbers as strings here
    duration: Option<String>,
}

pub fn parse_probe_json(bytes: &[u8], size_bytes: u64) -> Result<MediaInfo> {
    let parsed: ProbeOutput =
        serde_json::from_slice(bytes).context("failed to parse ffprobe JSON")?;
    let stream = parsed.streams.into_iter().next();
    let duration_secs = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok());

    Ok(MediaInfo {
        codec: stream.as_ref().and_then(|s| s.codec_name.clone()),
        width: stream.as_ref().and_then(|s| s.width),
        height: stream.as_ref().and_then(|s| s.height),
        duration_secs,
        size_bytes,
    })
}

pub fn ffprobe_json(ffprobe: &Path, input: &Path) -> Result<Vec<u8>> {
    let out = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name,width,height:format=duration",
            "-of",
            "json",
        ])
        .arg(input)
        .output()
        .context("failed to run ffprobe")?;
    if !out.status.success() {
        bail!(
            "ffprobe error (status {}): {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(out.stdout)
}

/// Probes `path`; without a working ffprobe only the file size is known.
pub fn media_info(tools: &Tools, path: &Path) -> Result<MediaInfo> {
    let size_bytes = std::fs::metadata(path)
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();

    let Some(ffprobe) = &tools.ffprobe else {
        return Ok(MediaInfo {
            size_bytes,
            ..MediaInfo::default()
        });
    };

    match ffprobe_json(ffprobe, path).and_then(|json| parse_probe_json(&json, size_bytes)) {
        Ok(info) => {
            debug!(path = %path.display(), info = %info.describe(), "probed");
            Ok(info)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ffprobe unavailable, using basic file info");
            Ok(MediaInfo {
                size_bytes,
                ..MediaInfo::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "programs": [],
        "streams": [
            { "codec_name": "h264", "width": 1920, "height": 1080 }
        ],
        "format": { "duration": "12.480000" }
    }"#;

    #[test]
    fn parses_stream_and_duration() {
        let info = parse_probe_json(SAMPLE.as_bytes(), 4_000_000).unwrap();
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.duration_ms(), Some(12_480));
        assert_eq!(info.size_bytes, 4_000_000);
        assert!(!info.is_hevc());
    }

    #[test]
    fn audio_only_file_has_no_stream_info() {
        let json = r#"{ "streams": [], "format": { "duration": "3.0" } }"#;
        let info = parse_probe_json(json.as_bytes(), 10).unwrap();
        assert_eq!(info.codec, None);
        assert_eq!(info.duration_ms(), Some(3000));
    }

    #[test]
    fn unparseable_duration_is_unknown() {
        let json = r#"{ "streams": [{ "codec_name": "hevc" }], "format": { "duration": "N/A" } }"#;
        let info = parse_probe_json(json.as_bytes(), 0).unwrap();
        assert!(info.is_hevc());
        assert_eq!(info.duration_ms(), None);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_probe_json(b"not json", 0).is_err());
    }

    #[test]
    fn describe_formats_dimensions_and_size() {
        let info = MediaInfo {
            codec: Some("h264".into()),
            width: Some(1280),
            height: Some(720),
            duration_secs: None,
            size_bytes: 5 * 1024 * 1024,
        };
        assert_eq!(info.describe(), "h264, 1280x720, 5.00 MB");
    }

    #[test]
    fn missing_ffprobe_falls_back_to_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, vec![0u8; 2048]).unwrap();
        let tools = Tools {
            ffmpeg: "ffmpeg".into(),
            ffprobe: None,
            source: crate::ffmpeg::ToolSource::System,
        };
        let info = media_info(&tools, &file).unwrap();
        assert_eq!(info.size_bytes, 2048);
        assert_eq!(info.codec, None);
    }
}
