use crate::cli::{Preset, Profile};
use std::ffi::{OsStr, OsString};
use std::path::Path;

pub const VIDEO_CODEC: &str = "libx265";
pub const HEVC_TAG: &str = "hvc1";

/// Everything the user picks for one conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub crf: u8,
    pub preset: Preset,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub threads: u16,
    pub profile: Profile,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            crf: crate::cli::DEFAULT_CRF,
            preset: Preset::Medium,
            audio_codec: "aac".into(),
            audio_bitrate: crate::cli::DEFAULT_AUDIO_BITRATE.into(),
            threads: 0,
            profile: Profile::Standard,
        }
    }
}

impl EncodeSettings {
    pub fn summary(&self) -> String {
        format!(
            "CRF={}, preset={}, audio={}@{}, profile={}",
            self.crf, self.preset, self.audio_codec, self.audio_bitrate, self.profile
        )
    }
}

/// ffmpeg arguments (program name excluded) for one input/output pair.
/// With `progress` set, ffmpeg writes key=value status lines to stdout.
pub fn build_args(
    settings: &EncodeSettings,
    input: &Path,
    output: &Path,
    progress: bool,
) -> Vec<OsString> {
    let quicktime = settings.profile == Profile::Quicktime;
    let mut args: Vec<OsString> = Vec::new();

    push_all(&mut args, &["-hide_banner"]);
    if progress {
        push_all(&mut args, &["-nostats", "-progress", "pipe:1"]);
    }
    push_all(&mut args, &["-y", "-i"]);
    args.push(input.as_os_str().to_owned());

    if quicktime {
        push_all(&mut args, &["-map", "0:v", "-map", "0:a?"]);
    }

    let crf = settings.crf.to_string();
    push_all(
        &mut args,
        &["-c:v", VIDEO_CODEC, "-crf", &crf, "-preset", settings.preset.as_str()],
    );

    if quicktime {
        push_all(
            &mut args,
            &[
                "-pix_fmt",
                "yuv420p",
                "-color_range",
                "tv",
                "-colorspace",
                "bt709",
                "-color_trc",
                "bt709",
                "-color_primaries",
                "bt709",
            ],
        );
    }

    // quicktime always pins the thread count, standard only when asked
    if settings.threads > 0 || quicktime {
        let threads = settings.threads.to_string();
        push_all(&mut args, &["-threads", &threads]);
    }

    push_all(
        &mut args,
        &[
            "-c:a",
            settings.audio_codec.as_str(),
            "-b:a",
            settings.audio_bitrate.as_str(),
        ],
    );
    if quicktime {
        push_all(&mut args, &["-ac", "2", "-ar", "44100", "-movflags", "+faststart"]);
    }

    push_all(&mut args, &["-tag:v", HEVC_TAG]);
    args.push(output.as_os_str().to_owned());
    args
}

fn push_all(args: &mut Vec<OsString>, items: &[&str]) {
    args.extend(items.iter().map(OsString::from));
}

/// One-line rendering of a command for the log; quotes arguments containing whitespace.
pub fn render_command(program: &Path, args: &[OsString]) -> String {
    std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(quote)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s.into_owned()
    }
}
