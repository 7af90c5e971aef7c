use crate::cli::{Preset, Profile, default_output, validate_crf};
use crate::command::EncodeSettings;
use crate::convert::Job;
use anyhow::Result;
use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};
use std::path::PathBuf;

pub const AUDIO_BITRATES: [&str; 6] = ["64k", "96k", "128k", "192k", "256k", "320k"];

/// Collects a job and its settings from prompts, defaulting to `base`.
/// `Ok(None)` when the user declines the final confirmation.
pub fn interactive_job(base: &EncodeSettings) -> Result<Option<(Job, EncodeSettings)>> {
    println!("H.264 -> H.265 converter");
    println!("Press Enter to accept defaults.\n");

    let theme = ColorfulTheme::default();
    let input = loop {
        let raw: String = Input::with_theme(&theme)
            .with_prompt("Input video file")
            .interact_text()?;
        let path = PathBuf::from(raw.trim());
        if path.is_file() {
            break path;
        }
        println!("Please choose an existing video file.");
    };

    let default_out = default_output(&input);
    let raw_out: String = Input::with_theme(&theme)
        .with_prompt(format!("Output file [{}]", default_out.display()))
        .allow_empty(true)
        .interact_text()?;
    let output = if raw_out.trim().is_empty() {
        default_out
    } else {
        PathBuf::from(raw_out.trim())
    };

    let crf = prompt_crf(&theme, base.crf)?;

    let preset_names: Vec<&str> = Preset::ALL.iter().map(|p| p.as_str()).collect();
    let preset_idx = Select::with_theme(&theme)
        .with_prompt("Encoding preset (slower = smaller file)")
        .items(preset_names.as_slice())
        .default(position_of(&Preset::ALL, &base.preset))
        .interact()?;

    let bitrates = bitrate_choices(&base.audio_bitrate);
    let bitrate_idx = Select::with_theme(&theme)
        .with_prompt("Audio bitrate")
        .items(bitrates.as_slice())
        .default(position_of(&bitrates, &base.audio_bitrate))
        .interact()?;

    let profiles = [Profile::Standard, Profile::Quicktime];
    let profile_idx = Select::with_theme(&theme)
        .with_prompt("Compatibility profile")
        .items(&["standard", "quicktime (Apple players)"])
        .default(position_of(&profiles, &base.profile))
        .interact()?;

    let settings = EncodeSettings {
        crf,
        preset: Preset::ALL[preset_idx],
        audio_bitrate: bitrates[bitrate_idx].clone(),
        profile: profiles[profile_idx],
        ..base.clone()
    };

    let confirmed = Confirm::with_theme(&theme)
        .with_prompt(format!(
            "Convert to H.265?\n  input:  {}\n  output: {}\n",
            file_label(&input),
            file_label(&output)
        ))
        .default(true)
        .interact()?;
    if !confirmed {
        return Ok(None);
    }

    Ok(Some((Job { input, output }, settings)))
}

/// The fixed bitrate list, plus `current` when it is not one of them.
fn bitrate_choices(current: &str) -> Vec<String> {
    let mut choices: Vec<String> = AUDIO_BITRATES.iter().map(|b| b.to_string()).collect();
    if !choices.iter().any(|b| b == current) {
        choices.push(current.to_string());
    }
    choices
}

fn prompt_crf(theme: &ColorfulTheme, default: u8) -> Result<u8> {
    loop {
        let raw: String = Input::with_theme(theme)
            .with_prompt("Video quality CRF (0-51, lower = better)")
            .default(default.to_string())
            .interact_text()?;
        match validate_crf(&raw) {
            Ok(crf) => return Ok(crf),
            Err(err) => println!("Invalid value: {err}."),
        }
    }
}

fn position_of<T: PartialEq>(items: &[T], wanted: &T) -> usize {
    items.iter().position(|i| i == wanted).unwrap_or(0)
}

fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
