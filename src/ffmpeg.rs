use crate::error::ConvertError;
use anyhow::{Context, Result, anyhow, bail};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use which::which;

pub const STDERR_TAIL_LINES: usize = 20;
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
pub const SELF_TEST_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    MacOs,
    Windows,
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Arm64,
    X64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn current() -> Self {
        Self::from_consts(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn from_consts(os: &str, arch: &str) -> Self {
        let os = match os {
            "macos" => Os::MacOs,
            "windows" => Os::Windows,
            _ => Os::Linux,
        };
        let arch = match arch {
            "aarch64" | "arm64" => Arch::Arm64,
            _ => Arch::X64,
        };
        Self { os, arch }
    }

    pub fn bundle_dir_name(self) -> &'static str {
        match (self.os, self.arch) {
            (Os::MacOs, Arch::Arm64) => "ffmpeg_macos_arm64",
            (Os::MacOs, Arch::X64) => "ffmpeg_macos_x64",
            (Os::Windows, _) => "ffmpeg_windows_x64",
            (Os::Linux, _) => "ffmpeg_linux_x64",
        }
    }

    pub fn exe_name(self, tool: &str) -> String {
        match self.os {
            Os::Windows => format!("{tool}.exe"),
            _ => tool.to_string(),
        }
    }
}

/// Where bundled binaries live relative to the running executable.
pub fn bundle_root(exe_dir: &Path) -> PathBuf {
    if exe_dir.ends_with("Contents/MacOS") {
        if let Some(contents) = exe_dir.parent() {
            return contents.join("Resources").join("ffmpeg");
        }
    }
    exe_dir.join("ffmpeg_bin")
}

pub fn bundled_binary(root: &Path, platform: Platform, tool: &str) -> PathBuf {
    root.join(platform.bundle_dir_name())
        .join(platform.exe_name(tool))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    Override,
    Bundled,
    System,
}

#[derive(Debug, Clone)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: Option<PathBuf>,
    pub source: ToolSource,
}

pub fn resolve_tools(ffmpeg: Option<PathBuf>) -> Result<Tools> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let root = bundle_root(&exe_dir);
    let platform = Platform::current();

    let (ffmpeg, source) =
        resolve_ffmpeg_with(ffmpeg, &root, platform, |name| which(name).ok())?;
    let ffprobe = sibling_ffprobe(&ffmpeg, platform).or_else(|| which("ffprobe").ok());
    match &ffprobe {
        Some(p) => debug!(ffprobe = %p.display(), "ffprobe located"),
        None => warn!("ffprobe not found; media info limited to file sizes"),
    }
    info!(ffmpeg = %ffmpeg.display(), ?source, "using ffmpeg");

    Ok(Tools {
        ffmpeg,
        ffprobe,
        source,
    })
}

/// Override first, then the bundled binary for `platform`, then `lookup` (PATH).
pub fn resolve_ffmpeg_with<F>(
    override_path: Option<PathBuf>,
    bundle_root: &Path,
    platform: Platform,
    lookup: F,
) -> Result<(PathBuf, ToolSource), ConvertError>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    if let Some(path) = override_path {
        if !path.is_file() {
            return Err(ConvertError::BinaryNotFound(path));
        }
        if !is_executable(&path) {
            return Err(ConvertError::NotExecutable(path));
        }
        return Ok((path, ToolSource::Override));
    }

    let bundled = bundled_binary(bundle_root, platform, "ffmpeg");
    if bundled.is_file() {
        if is_executable(&bundled) {
            return Ok((bundled, ToolSource::Bundled));
        }
        warn!(path = %bundled.display(), "bundled ffmpeg is not executable, trying PATH");
    } else {
        debug!(path = %bundled.display(), "no bundled ffmpeg");
    }

    lookup("ffmpeg")
        .or_else(|| {
            if platform.os == Os::Windows {
                lookup("ffmpeg.exe")
            } else {
                None
            }
        })
        .map(|p| (p, ToolSource::System))
        .ok_or(ConvertError::FfmpegNotFound { bundled })
}

fn sibling_ffprobe(ffmpeg: &Path, platform: Platform) -> Option<PathBuf> {
    let candidate = ffmpeg.parent()?.join(platform.exe_name("ffprobe"));
    (candidate.is_file() && is_executable(&candidate)).then_some(candidate)
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Runs `program args` to completion, killing it after `timeout`.
pub fn run_with_timeout(program: &Path, args: &[&str], timeout: Duration) -> Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run {}", program.display()))?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!(
                "{} did not finish within {}s",
                program.display(),
                timeout.as_secs()
            );
        }
        thread::sleep(POLL_INTERVAL);
    };

    let join = |h: Option<thread::JoinHandle<Vec<u8>>>| {
        h.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    Ok(Output {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

/// First line of `ffmpeg -version`.
pub fn ffmpeg_version(tools: &Tools) -> Result<String> {
    let out = run_with_timeout(&tools.ffmpeg, &["-version"], VERSION_TIMEOUT)?;
    if !out.status.success() {
        bail!("ffmpeg -version failed (status {})", out.status);
    }
    let text = String::from_utf8_lossy(&out.stdout);
    text.lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("ffmpeg -version printed nothing"))
}

#[derive(Debug, Clone)]
pub struct SelfCheck {
    pub version: String,
    pub has_libx265: bool,
    pub test_encode_ok: bool,
}

impl SelfCheck {
    pub fn passed(&self) -> bool {
        self.has_libx265 && self.test_encode_ok
    }
}

/// Version, encoder list and a one-second synthetic H.265 encode.
pub fn self_check(tools: &Tools) -> Result<SelfCheck> {
    let version = ffmpeg_version(tools)?;
    info!(%version, "ffmpeg version");

    let encoders = run_with_timeout(
        &tools.ffmpeg,
        &["-hide_banner", "-encoders"],
        VERSION_TIMEOUT,
    )?;
    let has_libx265 = String::from_utf8_lossy(&encoders.stdout).contains("libx265");
    info!(has_libx265, "encoder list checked");

    let test = run_with_timeout(&tools.ffmpeg, &self_test_args(), SELF_TEST_TIMEOUT)?;
    let test_encode_ok = test.status.success();
    if test_encode_ok {
        info!("synthetic H.265 encode succeeded");
    } else {
        warn!(
            status = %test.status,
            stderr = %tail_of(&String::from_utf8_lossy(&test.stderr), STDERR_TAIL_LINES),
            "synthetic H.265 encode failed"
        );
    }

    Ok(SelfCheck {
        version,
        has_libx265,
        test_encode_ok,
    })
}

pub fn self_test_args() -> [&'static str; 17] {
    [
        "-hide_banner",
        "-f",
        "lavfi",
        "-i",
        "color=c=black:s=128x72:d=1",
        "-c:v",
        "libx265",
        "-preset",
        "ultrafast",
        "-crf",
        "30",
        "-f",
        "null",
        "-y",
        "-loglevel",
        "error",
        "-",
    ]
}

#[derive(Debug)]
pub struct FfmpegSession {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr_tail: thread::JoinHandle<String>,
}

pub fn spawn_ffmpeg(tools: &Tools, args: &[OsString], verbose: bool) -> Result<FfmpegSession> {
    let mut child = Command::new(&tools.ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn ffmpeg")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stderr"))?;

    let stderr_tail = thread::spawn(move || collect_tail(stderr, STDERR_TAIL_LINES, verbose));

    Ok(FfmpegSession {
        child,
        stdout,
        stderr_tail,
    })
}

/// Keeps the last `keep` lines; echoes every line at debug when `verbose`.
pub fn collect_tail<R: Read>(reader: R, keep: usize, verbose: bool) -> String {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(keep);
    for line in BufReader::new(reader).lines() {
        let Ok(line) = line else { break };
        if verbose {
            debug!(target: "ffmpeg", "{line}");
        }
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

fn tail_of(text: &str, keep: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(keep)..].join("\n")
}

/// Waits for the child, killing it once `cancel` is raised. Once the flag is
/// set the run is `Cancelled` even if ffmpeg already quit on the same SIGINT.
pub fn wait_for_exit(child: &mut Child, cancel: &AtomicBool) -> Result<ExitStatus, ConvertError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if cancel.load(Ordering::SeqCst) {
                    warn!(%status, "ffmpeg stopped after cancel request");
                    return Err(ConvertError::Cancelled);
                }
                return Ok(status);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "failed to poll ffmpeg, terminating it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ConvertError::Ffmpeg {
                    code: None,
                    stderr_tail: e.to_string(),
                });
            }
        }
        if cancel.load(Ordering::SeqCst) {
            warn!("cancel requested, terminating ffmpeg");
            let _ = child.kill();
            let _ = child.wait();
            return Err(ConvertError::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
