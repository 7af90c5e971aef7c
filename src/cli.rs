use crate::command::EncodeSettings;
use anyhow::{Result, bail};
use clap::{ArgAction, ArgGroup, Parser, ValueEnum, ValueHint};
use regex::Regex;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_CRF: u8 = 28;
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
pub const OUTPUT_SUFFIX: &str = "_h265";

#[derive(Parser, Debug)]
#[command(
    name = "h265_converter",
    version,
    about = "Convert H.264 videos to H.265 (HEVC) with ffmpeg"
)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["input", "directory", "interactive", "check"])
))]
pub struct Cli {
    /// Input video file
    #[arg(short = 'i', long, value_hint = ValueHint::FilePath)]
    pub input: Option<PathBuf>,

    /// Directory to batch convert
    #[arg(short = 'd', long, value_hint = ValueHint::DirPath)]
    pub directory: Option<PathBuf>,

    /// Prompt for every setting instead of reading flags
    #[arg(long, action = ArgAction::SetTrue)]
    pub interactive: bool,

    /// Check that ffmpeg is usable and can encode H.265, then exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub check: bool,

    /// Output file (default: <input>_h265.<ext>, single-file mode only)
    #[arg(short = 'o', long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Recurse into subdirectories (batch mode only)
    #[arg(short = 'r', long, action = ArgAction::SetTrue)]
    pub recursive: bool,

    /// Constant rate factor 0..51 (lower = better quality, bigger file)
    #[arg(long, default_value_t = DEFAULT_CRF, value_parser = clap::value_parser!(u8).range(0..=51))]
    pub crf: u8,

    /// x265 encoding preset
    #[arg(long, value_enum, default_value_t = Preset::Medium)]
    pub preset: Preset,

    /// Audio encoder
    #[arg(long, default_value = "aac")]
    pub audio_codec: String,

    /// Audio bitrate, e.g. 128k
    #[arg(long, default_value = DEFAULT_AUDIO_BITRATE, value_parser = validate_audio_bitrate)]
    pub audio_bitrate: String,

    /// Threads to allow ffmpeg (0 = auto)
    #[arg(long, default_value = "0")]
    pub threads: u16,

    /// Argument profile (quicktime adds color/pixel-format/faststart flags)
    #[arg(long, value_enum, default_value_t = Profile::Standard)]
    pub profile: Profile,

    /// Path to ffmpeg binary (overrides bundled and PATH lookup)
    #[arg(long, env = "H265_FFMPEG", value_hint = ValueHint::ExecutablePath)]
    pub ffmpeg: Option<PathBuf>,

    /// Append log lines to this file
    #[arg(long, env = "H265_LOG_FILE", default_value = "video_conversion.log", value_hint = ValueHint::FilePath)]
    pub log_file: PathBuf,

    /// Run ffmpeg without the progress display
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_progress: bool,

    /// Debug logging, including raw ffmpeg stderr
    #[arg(short = 'v', long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub const ALL: [Preset; 9] = [
        Preset::Ultrafast,
        Preset::Superfast,
        Preset::Veryfast,
        Preset::Faster,
        Preset::Fast,
        Preset::Medium,
        Preset::Slow,
        Preset::Slower,
        Preset::Veryslow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which argument template to hand ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    Standard,
    Quicktime,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Standard => f.write_str("standard"),
            Profile::Quicktime => f.write_str("quicktime"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Single { input: PathBuf, output: PathBuf },
    Batch { directory: PathBuf, recursive: bool },
    Interactive,
    Check,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: Mode,
    pub settings: EncodeSettings,
    pub ffmpeg: Option<PathBuf>,
    pub progress: bool,
    pub verbose: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<AppConfig> {
        if self.output.is_some() && self.input.is_none() {
            bail!("--output is only valid together with --input");
        }
        if self.recursive && self.directory.is_none() {
            bail!("--recursive is only valid together with --directory");
        }

        let mode = if let Some(input) = self.input {
            if !input.is_file() {
                bail!("Input not found: {}", input.display());
            }
            let output = self.output.unwrap_or_else(|| default_output(&input));
            Mode::Single { input, output }
        } else if let Some(directory) = self.directory {
            if !directory.is_dir() {
                bail!("Directory not found: {}", directory.display());
            }
            Mode::Batch {
                directory,
                recursive: self.recursive,
            }
        } else if self.interactive {
            Mode::Interactive
        } else {
            Mode::Check
        };

        Ok(AppConfig {
            mode,
            settings: EncodeSettings {
                crf: self.crf,
                preset: self.preset,
                audio_codec: self.audio_codec,
                audio_bitrate: self.audio_bitrate,
                threads: self.threads,
                profile: self.profile,
            },
            ffmpeg: self.ffmpeg,
            progress: !self.no_progress,
            verbose: self.verbose,
        })
    }
}

pub fn validate_audio_bitrate(raw: &str) -> Result<String, String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[0-9]+(\.[0-9]+)?[kKmM]?$").unwrap());
    let trimmed = raw.trim();
    if re.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(format!("`{raw}` is not a bitrate (expected e.g. 128k, 1.5M, 96000)"))
    }
}

pub fn validate_crf(raw: &str) -> Result<u8, String> {
    let parsed: u8 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` must be an integer between 0 and 51"))?;
    if parsed > 51 {
        return Err("CRF must be between 0 and 51".into());
    }
    Ok(parsed)
}

/// `<dir>/<stem>_h265.<ext>`; `.mp4` when the input has no extension.
pub fn default_output(input: &Path) -> PathBuf {
    with_suffix(input, OUTPUT_SUFFIX, Some("mp4"))
}

/// `<dir>/<stem><suffix>.<ext>`, keeping the raw OS bytes of the stem.
/// `fallback_ext` is used when the input has no extension.
pub fn with_suffix(input: &Path, suffix: &str, fallback_ext: Option<&str>) -> PathBuf {
    let mut name = input
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| OsString::from("output"));
    name.push(suffix);
    if let Some(ext) = input.extension().or(fallback_ext.map(OsStr::new)) {
        name.push(".");
        name.push(ext);
    }
    input.parent().unwrap_or(Path::new(".")).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_output_keeps_extension() {
        let out = default_output(Path::new("/videos/holiday.mov"));
        assert_eq!(out, PathBuf::from("/videos/holiday_h265.mov"));
    }

    #[test]
    fn default_output_without_extension_uses_mp4() {
        let out = default_output(Path::new("clips/raw"));
        assert_eq!(out, PathBuf::from("clips/raw_h265.mp4"));
    }

    #[cfg(unix)]
    #[test]
    fn default_output_keeps_non_utf8_stem() {
        use std::os::unix::ffi::OsStrExt;

        let input = Path::new("/videos").join(OsStr::from_bytes(b"clip\xff.mov"));
        let out = default_output(&input);
        assert_eq!(out.file_name().unwrap().as_bytes(), b"clip\xff_h265.mov");
    }

    #[test]
    fn audio_bitrate_validation() {
        assert_eq!(validate_audio_bitrate("128k").unwrap(), "128k");
        assert_eq!(validate_audio_bitrate(" 1.5M ").unwrap(), "1.5M");
        assert!(validate_audio_bitrate("96000").is_ok());
        assert!(validate_audio_bitrate("fast").is_err());
        assert!(validate_audio_bitrate("128kb").is_err());
        assert!(validate_audio_bitrate("").is_err());
    }

    #[test]
    fn crf_validation() {
        assert_eq!(validate_crf("0").unwrap(), 0);
        assert_eq!(validate_crf("51").unwrap(), 51);
        assert!(validate_crf("52").is_err());
        assert!(validate_crf("-1").is_err());
    }

    #[test]
    fn crf_out_of_range_is_rejected_by_parser() {
        let res = Cli::try_parse_from(["h265_converter", "--check", "--crf", "60"]);
        assert!(res.is_err());
    }

    #[test]
    fn defaults_match_original_tool() {
        let cli = Cli::try_parse_from(["h265_converter", "--check"]).unwrap();
        assert_eq!(cli.crf, 28);
        assert_eq!(cli.preset, Preset::Medium);
        assert_eq!(cli.audio_codec, "aac");
        assert_eq!(cli.audio_bitrate, "128k");
        assert_eq!(cli.threads, 0);
        assert_eq!(cli.profile, Profile::Standard);
    }

    #[test]
    fn preset_names_round_trip_through_clap() {
        for preset in Preset::ALL {
            let parsed = Preset::from_str(preset.as_str(), false).unwrap();
            assert_eq!(parsed, preset);
        }
    }

    #[test]
    fn mode_flags_are_exclusive() {
        let res = Cli::try_parse_from(["h265_converter", "--check", "--interactive"]);
        assert!(res.is_err());
        let res = Cli::try_parse_from(["h265_converter"]);
        assert!(res.is_err());
    }

    #[test]
    fn single_mode_builds_default_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"not really a video").unwrap();

        let args: Vec<std::ffi::OsString> = vec![
            "h265_converter".into(),
            "-i".into(),
            input.clone().into_os_string(),
            "--crf".into(),
            "23".into(),
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        let cfg = cli.into_config().unwrap();
        assert_eq!(
            cfg.mode,
            Mode::Single {
                input: input.clone(),
                output: dir.path().join("clip_h265.mp4"),
            }
        );
        assert_eq!(cfg.settings.crf, 23);
        assert!(cfg.progress);
    }

    #[test]
    fn missing_input_is_rejected() {
        let cli =
            Cli::try_parse_from(["h265_converter", "-i", "/definitely/not/here.mp4"]).unwrap();
        let err = cli.into_config().unwrap_err();
        assert!(err.to_string().contains("Input not found"));
    }

    #[test]
    fn output_requires_input() {
        let dir = tempfile::tempdir().unwrap();
        let args: Vec<std::ffi::OsString> = vec![
            "h265_converter".into(),
            "-d".into(),
            dir.path().as_os_str().to_owned(),
            "-o".into(),
            "x.mp4".into(),
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        let err = cli.into_config().unwrap_err();
        assert!(err.to_string().contains("--output"), "{err}");
    }

    #[test]
    fn recursive_requires_directory() {
        let cli = Cli::try_parse_from(["h265_converter", "--check", "-r"]).unwrap();
        assert!(cli.into_config().is_err());
    }
}
