use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use regex::Regex;
use std::io::{BufRead, BufReader, Read};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;
use tracing::trace;

/// One recognised line of ffmpeg's `-progress` output.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    OutTime(u64),
    Frame(u64),
    Speed(f64),
    Continue,
    End,
}

fn kv_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)=\s*([\w\-\.:]+)$").unwrap())
}

/// Parses a `key=value` status line. Anything unknown or unparsable
/// (`N/A` timestamps before the first frame) yields `None`.
pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    let caps = kv_regex().captures(line.trim())?;
    let key = caps.get(1)?.as_str();
    let val = caps.get(2)?.as_str();
    match key {
        // both are microseconds despite the name
        "out_time_us" | "out_time_ms" => val
            .parse::<i64>()
            .ok()
            .map(|us| ProgressEvent::OutTime(us.max(0) as u64 / 1000)),
        "frame" => val.parse().ok().map(ProgressEvent::Frame),
        "speed" => val
            .trim_end_matches('x')
            .parse()
            .ok()
            .map(ProgressEvent::Speed),
        "progress" => match val {
            "continue" => Some(ProgressEvent::Continue),
            "end" => Some(ProgressEvent::End),
            _ => None,
        },
        _ => None,
    }
}

/// Share of `total_ms` covered by `pos_ms`, clamped to 0..=100.
pub fn percent(pos_ms: u64, total_ms: u64) -> u8 {
    if total_ms == 0 {
        return 0;
    }
    ((pos_ms.min(total_ms) as f64 / total_ms as f64) * 100.0).round() as u8
}

/// Latest values seen on the progress stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    pub out_ms: u64,
    pub frame: u64,
    pub speed: Option<f64>,
    pub ended: bool,
}

impl ProgressState {
    pub fn apply(&mut self, event: &ProgressEvent) {
        match *event {
            ProgressEvent::OutTime(ms) => self.out_ms = ms,
            ProgressEvent::Frame(n) => self.frame = n,
            ProgressEvent::Speed(s) => self.speed = Some(s),
            ProgressEvent::Continue => {}
            ProgressEvent::End => self.ended = true,
        }
    }
}

pub struct ProgressUi {
    _multi: MultiProgress,
    bar: ProgressBar,
    total_ms: Option<u64>,
}

impl ProgressUi {
    /// A bar sized to `total_ms`, or a spinner counting frames when the
    /// duration could not be probed.
    pub fn new(total_ms: Option<u64>, label: &str) -> Self {
        let multi = MultiProgress::new();
        let bar = match total_ms {
            Some(total) => {
                let bar = multi.add(ProgressBar::new(total.max(1)));
                bar.set_style(
                    ProgressStyle::with_template(
                        "[{elapsed_precise}]  [{bar:50.cyan/bright-black}] {percent:>3}%  ETA:{eta_precise}\n{wide_msg}",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
                );
                bar
            }
            None => {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.enable_steady_tick(Duration::from_millis(80));
                bar.set_style(
                    ProgressStyle::with_template("{spinner} [{elapsed_precise}] {wide_msg}")
                        .unwrap()
                        .tick_strings(&["-", "\\", "|", "/", "-"]),
                );
                bar
            }
        };
        bar.set_message(format!("Encoding {label}..."));

        Self {
            _multi: multi,
            bar,
            total_ms,
        }
    }

    #[cfg(test)]
    pub fn hidden(total_ms: Option<u64>) -> Self {
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let bar = multi.add(ProgressBar::new(total_ms.unwrap_or(0).max(1)));
        Self {
            _multi: multi,
            bar,
            total_ms,
        }
    }

    fn update(&self, state: &ProgressState) {
        let speed = state
            .speed
            .map(|s| format!("  speed {s:.2}x"))
            .unwrap_or_default();
        match self.total_ms {
            Some(total) => {
                self.bar.set_position(state.out_ms.min(total));
                self.bar.set_message(format!(
                    "{}%  frame {}{speed}",
                    percent(state.out_ms, total),
                    state.frame
                ));
            }
            None => self.bar.set_message(format!("frame {}{speed}", state.frame)),
        }
    }

    pub fn finish(&self) {
        if let Some(total) = self.total_ms {
            self.bar.set_position(total);
        }
        self.bar.finish_with_message("Done");
    }

    pub fn abandon(&self, reason: &str) {
        self.bar.abandon_with_message(reason.to_string());
    }
}

/// Reads the progress stream on a background thread; the handle yields the
/// last state seen.
pub fn pump_progress<R: Read + Send + 'static>(
    reader: R,
    ui: ProgressUi,
) -> thread::JoinHandle<Result<(ProgressState, ProgressUi)>> {
    thread::spawn(move || {
        let mut state = ProgressState::default();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            if let Some(event) = parse_line(&line) {
                state.apply(&event);
                match event {
                    ProgressEvent::Continue => ui.update(&state),
                    ProgressEvent::End => {
                        ui.update(&state);
                        ui.finish();
                    }
                    _ => {}
                }
            } else {
                trace!(target: "ffmpeg::progress", "{line}");
            }
        }
        Ok((state, ui))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_known_keys() {
        assert_eq!(parse_line("out_time_ms=1500000"), Some(ProgressEvent::OutTime(1500)));
        assert_eq!(parse_line("out_time_us=2000000"), Some(ProgressEvent::OutTime(2000)));
        assert_eq!(parse_line("frame=42"), Some(ProgressEvent::Frame(42)));
        assert_eq!(parse_line("speed=1.25x"), Some(ProgressEvent::Speed(1.25)));
        assert_eq!(parse_line("progress=continue"), Some(ProgressEvent::Continue));
        assert_eq!(parse_line("progress=end"), Some(ProgressEvent::End));
    }

    #[test]
    fn skips_unparseable_lines() {
        assert_eq!(parse_line("out_time_ms=N/A"), None);
        assert_eq!(parse_line("speed=N/A"), None);
        assert_eq!(parse_line("bitrate=1234.5kbits/s"), None);
        assert_eq!(parse_line("garbage"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("progress=paused"), None);
    }

    #[test]
    fn negative_out_time_clamps_to_zero() {
        assert_eq!(parse_line("out_time_us=-23220"), Some(ProgressEvent::OutTime(0)));
    }

    #[test]
    fn tolerates_padded_frame_values() {
        assert_eq!(parse_line("frame=  120"), Some(ProgressEvent::Frame(120)));
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(percent(0, 10_000), 0);
        assert_eq!(percent(2_500, 10_000), 25);
        assert_eq!(percent(20_000, 10_000), 100);
        assert_eq!(percent(5, 0), 0);
    }

    #[test]
    fn last_value_wins() {
        let mut state = ProgressState::default();
        for line in ["out_time_ms=1000000", "frame=10", "out_time_ms=3000000", "frame=30"] {
            state.apply(&parse_line(line).unwrap());
        }
        assert_eq!(state.out_ms, 3000);
        assert_eq!(state.frame, 30);
        assert!(!state.ended);
    }

    #[test]
    fn pump_reads_stream_to_end() {
        let stream = "frame=1\nout_time_ms=N/A\nprogress=continue\n\
                      frame=50\nout_time_us=2000000\nspeed=2.0x\nprogress=continue\n\
                      frame=75\nout_time_us=3000000\nprogress=end\n";
        let handle = pump_progress(Cursor::new(stream.as_bytes().to_vec()), ProgressUi::hidden(Some(3000)));
        let (state, _ui) = handle.join().unwrap().unwrap();
        assert_eq!(
            state,
            ProgressState {
                out_ms: 3000,
                frame: 75,
                speed: Some(2.0),
                ended: true,
            }
        );
    }
}
