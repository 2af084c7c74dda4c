//! Piper voice discovery and locale matching.
//!
//! Installed voices are found by scanning a directory for Piper
//! `*.onnx.json` model configs and reading the language code each one
//! declares. Locale tags are normalized to the `en-US` shape so they can be
//! compared against user configuration regardless of how the model file
//! spells them (`en_US`, `en-us`, ...).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One installed narration voice.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    /// Normalized locale tag, e.g. `en-US`.
    pub locale: String,
    /// Dataset name from the model config, e.g. `ryan`.
    pub name: String,
    /// Path to the `.onnx.json` config loadable by piper-rs.
    pub config_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PiperVoiceConfig {
    #[serde(default)]
    language: Option<PiperLanguage>,
    #[serde(default)]
    dataset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PiperLanguage {
    #[serde(default)]
    code: Option<String>,
}

/// Scan `dir` (one level of subdirectories deep) for Piper voice configs.
/// Unreadable or malformed configs are skipped with a warning.
pub fn discover_voices(dir: &Path) -> Vec<Voice> {
    let mut voices = Vec::new();
    collect_voices(dir, 0, &mut voices);
    voices.sort_by(|a, b| (&a.locale, &a.name).cmp(&(&b.locale, &b.name)));
    debug!(dir = %dir.display(), count = voices.len(), "Discovered Piper voices");
    voices
}

fn collect_voices(dir: &Path, depth: usize, out: &mut Vec<Voice>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), "Skipping unreadable voices dir: {err}");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            // Piper installs voices as <lang>/<dataset>/<quality>/ trees.
            if depth < 3 {
                collect_voices(&path, depth + 1, out);
            }
        } else if path.to_string_lossy().ends_with(".onnx.json") {
            match load_voice(&path) {
                Ok(voice) => out.push(voice),
                Err(err) => warn!(path = %path.display(), "Skipping voice config: {err}"),
            }
        }
    }
}

fn load_voice(config_path: &Path) -> Result<Voice> {
    let data = fs::read_to_string(config_path).context("Reading voice config")?;
    let config: PiperVoiceConfig =
        serde_json::from_str(&data).context("Parsing voice config JSON")?;
    let code = config
        .language
        .and_then(|l| l.code)
        .context("Voice config has no language code")?;
    let name = config.dataset.unwrap_or_else(|| {
        config_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    Ok(Voice {
        locale: normalize_locale(&code),
        name,
        config_path: config_path.to_path_buf(),
    })
}

/// Normalize `en_US` / `en-us` / `EN_us` to `en-US`. A bare primary subtag
/// (`cmn`, `fr`) is lowercased unchanged.
pub fn normalize_locale(tag: &str) -> String {
    match tag.replace('_', "-").split_once('-') {
        Some((lang, region)) => format!("{}-{}", lang.to_lowercase(), region.to_uppercase()),
        None => tag.to_lowercase(),
    }
}

fn primary_subtag(tag: &str) -> String {
    let normalized = normalize_locale(tag);
    normalized
        .split_once('-')
        .map(|(lang, _)| lang.to_string())
        .unwrap_or(normalized)
}

/// Pick the best voice for a locale tag: exact match first, then any voice
/// sharing the primary language subtag. `None` means the engine should use
/// its default voice.
pub fn pick_voice(voices: &[Voice], locale: &str) -> Option<Voice> {
    let wanted = normalize_locale(locale);
    if let Some(exact) = voices.iter().find(|v| v.locale == wanted) {
        return Some(exact.clone());
    }
    let lang = primary_subtag(locale);
    voices
        .iter()
        .find(|v| primary_subtag(&v.locale) == lang)
        .cloned()
}
