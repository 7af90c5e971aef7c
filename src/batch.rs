use crate::cli::{OUTPUT_SUFFIX, with_suffix};
use crate::command::EncodeSettings;
use crate::convert::{Job, RunOptions, convert_probed};
use crate::error::ConvertError;
use crate::ffmpeg::Tools;
use crate::probe::media_info;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "wmv", "flv", "webm"];

pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|v| v.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Video files under `dir`, sorted. Only the top level unless `recursive`.
pub fn collect_videos(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| is_video(path))
        .collect();
    files.sort();
    files
}

/// `<base>_h265<ext>`, or `<base>_h265_<n><ext>` with the first free `n`.
pub fn unique_output(input: &Path) -> PathBuf {
    let first = with_suffix(input, OUTPUT_SUFFIX, None);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| with_suffix(input, &format!("{OUTPUT_SUFFIX}_{n}"), None))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub found: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub fn run_batch(
    tools: &Tools,
    dir: &Path,
    recursive: bool,
    settings: &EncodeSettings,
    opts: RunOptions,
    cancel: &AtomicBool,
) -> BatchSummary {
    let files = collect_videos(dir, recursive);
    let mut summary = BatchSummary {
        found: files.len(),
        ..BatchSummary::default()
    };
    info!(dir = %dir.display(), recursive, found = files.len(), "batch scan finished");

    let total = files.len();
    for (idx, input) in files.into_iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            summary.cancelled = true;
            break;
        }

        let input_info = match media_info(tools, &input) {
            Ok(info) if info.is_hevc() => {
                info!(input = %input.display(), "already H.265, skipping");
                summary.skipped += 1;
                continue;
            }
            Ok(info) => info,
            Err(e) => {
                error!(input = %input.display(), "{e:#}");
                summary.failed += 1;
                continue;
            }
        };

        let job = Job {
            output: unique_output(&input),
            input,
        };
        info!("[{}/{}] {}", idx + 1, total, job.input.display());
        match convert_probed(tools, &job, &input_info, settings, opts, cancel) {
            Ok(_) => summary.converted += 1,
            Err(e) => {
                if matches!(e.downcast_ref::<ConvertError>(), Some(ConvertError::Cancelled)) {
                    summary.cancelled = true;
                    break;
                }
                error!(input = %job.input.display(), "{e:#}");
                summary.failed += 1;
            }
        }
    }

    info!(
        converted = summary.converted,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch finished: {}/{} converted",
        summary.converted,
        summary.found
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn recognises_extensions_case_insensitively() {
        assert!(is_video(Path::new("a.MP4")));
        assert!(is_video(Path::new("dir/b.webm")));
        assert!(!is_video(Path::new("notes.txt")));
        assert!(!is_video(Path::new("noext")));
    }

    #[test]
    fn top_level_scan_ignores_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.mov"));
        touch(&dir.path().join("a.mp4"));
        touch(&dir.path().join("readme.md"));
        touch(&dir.path().join("nested/c.mkv"));

        let flat = collect_videos(dir.path(), false);
        assert_eq!(
            flat,
            vec![dir.path().join("a.mp4"), dir.path().join("b.mov")]
        );

        let deep = collect_videos(dir.path(), true);
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&dir.path().join("nested/c.mkv")));
    }

    #[test]
    fn unique_output_avoids_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        touch(&input);

        assert_eq!(unique_output(&input), dir.path().join("clip_h265.mp4"));
        touch(&dir.path().join("clip_h265.mp4"));
        assert_eq!(unique_output(&input), dir.path().join("clip_h265_1.mp4"));
        touch(&dir.path().join("clip_h265_1.mp4"));
        assert_eq!(unique_output(&input), dir.path().join("clip_h265_2.mp4"));
    }

    #[test]
    fn cancelled_batch_stops_before_first_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"));
        let tools = Tools {
            ffmpeg: dir.path().join("no-ffmpeg"),
            ffprobe: None,
            source: crate::ffmpeg::ToolSource::Override,
        };
        let summary = run_batch(
            &tools,
            dir.path(),
            false,
            &EncodeSettings::default(),
            RunOptions::default(),
            &AtomicBool::new(true),
        );
        assert_eq!(
            summary,
            BatchSummary {
                found: 1,
                cancelled: true,
                ..BatchSummary::default()
            }
        );
    }

    #[test]
    fn spawn_failures_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"));
        touch(&dir.path().join("b.mkv"));
        let tools = Tools {
            ffmpeg: dir.path().join("no-ffmpeg"),
            ffprobe: None,
            source: crate::ffmpeg::ToolSource::Override,
        };
        let summary = run_batch(
            &tools,
            dir.path(),
            false,
            &EncodeSettings::default(),
            RunOptions::default(),
            &AtomicBool::new(false),
        );
        assert_eq!(summary.found, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.converted, 0);
        assert!(!summary.cancelled);
    }

    #[cfg(unix)]
    #[test]
    fn unique_output_keeps_non_utf8_stem() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join(OsStr::from_bytes(b"caf\xe9.mkv"));
        touch(&input);
        touch(&dir.path().join(OsStr::from_bytes(b"caf\xe9_h265.mkv")));
        assert_eq!(
            unique_output(&input),
            dir.path().join(OsStr::from_bytes(b"caf\xe9_h265_1.mkv"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn each_file_is_probed_once() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let videos = dir.path().join("videos");
        touch(&videos.join("a.mp4"));
        touch(&videos.join("b.mp4"));

        let calls = dir.path().join("probe-calls");
        let exe = |name: &str, body: String| {
            let path = dir.path().join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        let ffprobe = exe(
            "fake-ffprobe",
            format!(
                "echo x >> '{}'\necho '{{\"streams\":[{{\"codec_name\":\"h264\"}}],\"format\":{{\"duration\":\"1.0\"}}}}'",
                calls.display()
            ),
        );
        let ffmpeg = exe(
            "fake-ffmpeg",
            r#"for a; do out="$a"; done
printf 'x' > "$out""#
                .to_string(),
        );
        let tools = Tools {
            ffmpeg,
            ffprobe: Some(ffprobe),
            source: crate::ffmpeg::ToolSource::Override,
        };
        let summary = run_batch(
            &tools,
            &videos,
            false,
            &EncodeSettings::default(),
            RunOptions::default(),
            &AtomicBool::new(false),
        );
        assert_eq!(summary.converted, 2);
        assert_eq!(fs::read_to_string(&calls).unwrap().lines().count(), 2);
    }
}
