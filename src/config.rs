//! Configuration loading for the read-aloud tool.
//!
//! All user-tunable settings are centralized here and loaded from
//! `conf/config.toml` if present. Any missing or invalid entries fall back to
//! sensible defaults so the tool can still launch.

use crate::controller::{MAX_SPEED, MIN_SPEED, NarrationSettings, RepeatMode};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// High-level app configuration; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AppConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_sentence_count")]
    pub sentence_count: usize,
    #[serde(default)]
    pub repeat_mode: RepeatMode,
    #[serde(default = "default_gap_after_sentence_ms")]
    pub gap_after_sentence_ms: u64,
    #[serde(default = "default_tts_model")]
    pub tts_model_path: String,
    #[serde(default = "default_tts_espeak_path")]
    pub tts_espeak_path: String,
    #[serde(default = "default_tts_voices_dir")]
    pub tts_voices_dir: String,
    #[serde(default = "default_tts_volume")]
    pub tts_volume: f32,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            language: default_language(),
            speed: default_speed(),
            sentence_count: default_sentence_count(),
            repeat_mode: RepeatMode::default(),
            gap_after_sentence_ms: default_gap_after_sentence_ms(),
            tts_model_path: default_tts_model(),
            tts_espeak_path: default_tts_espeak_path(),
            tts_voices_dir: default_tts_voices_dir(),
            tts_volume: default_tts_volume(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// The subset of settings the playback controller owns.
    pub fn narration_settings(&self) -> NarrationSettings {
        NarrationSettings {
            speed: self.speed.clamp(MIN_SPEED, MAX_SPEED),
            language: self.language.clone(),
            sentence_count: self.sentence_count.max(1),
            repeat_mode: self.repeat_mode,
            gap_after_sentence: Duration::from_millis(self.gap_after_sentence_ms),
        }
    }

    /// Fold controller-owned settings back in before persisting.
    pub fn absorb_narration_settings(&mut self, settings: &NarrationSettings) {
        self.speed = settings.speed;
        self.language = settings.language.clone();
        self.sentence_count = settings.sentence_count;
        self.repeat_mode = settings.repeat_mode;
        self.gap_after_sentence_ms = settings.gap_after_sentence.as_millis() as u64;
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Load configuration from the given path, falling back to defaults when the
/// file is missing or malformed.
pub fn load_config(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(data) => parse_config(&data),
        Err(err) => {
            info!(path = %path.display(), "No config file ({err}); using defaults");
            AppConfig::default()
        }
    }
}

/// Parse TOML into a config, recovering with defaults on malformed input.
pub fn parse_config(data: &str) -> AppConfig {
    match toml::from_str::<AppConfig>(data) {
        Ok(config) => {
            debug!("Parsed configuration");
            config
        }
        Err(err) => {
            warn!("Invalid config file ({err}); using defaults");
            AppConfig::default()
        }
    }
}

pub fn serialize_config(config: &AppConfig) -> Option<String> {
    toml::to_string(config).ok()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_sentence_count() -> usize {
    5
}

fn default_gap_after_sentence_ms() -> u64 {
    300
}

fn default_tts_model() -> String {
    "/usr/share/piper-voices/en/en_US/ryan/high/en_US-ryan-high.onnx".to_string()
}

fn default_tts_espeak_path() -> String {
    "/usr/share".to_string()
}

fn default_tts_voices_dir() -> String {
    "/usr/share/piper-voices".to_string()
}

fn default_tts_volume() -> f32 {
    1.0
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_defaults() {
        let config = parse_config("");
        assert_eq!(config.language, "en-US");
        assert_eq!(config.speed, 1.0);
        assert_eq!(config.sentence_count, 5);
        assert_eq!(config.repeat_mode, RepeatMode::Continue);
        assert_eq!(config.gap_after_sentence_ms, 300);
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let config = parse_config("language = \"zh-HK\"\nrepeat_mode = \"repeat\"\n");
        assert_eq!(config.language, "zh-HK");
        assert_eq!(config.repeat_mode, RepeatMode::Repeat);
        assert_eq!(config.sentence_count, 5);
    }

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let config = parse_config("speed = \"not a number\"");
        assert_eq!(config.speed, 1.0);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = AppConfig::default();
        config.sentence_count = 9;
        config.repeat_mode = RepeatMode::Repeat;
        let serialized = serialize_config(&config).expect("config should serialize");
        let parsed = parse_config(&serialized);
        assert_eq!(parsed.sentence_count, 9);
        assert_eq!(parsed.repeat_mode, RepeatMode::Repeat);
    }

    #[test]
    fn narration_settings_clamp_out_of_range_values() {
        let mut config = AppConfig::default();
        config.speed = 50.0;
        config.sentence_count = 0;
        let settings = config.narration_settings();
        assert_eq!(settings.speed, MAX_SPEED);
        assert_eq!(settings.sentence_count, 1);
        assert_eq!(settings.gap_after_sentence, Duration::from_millis(300));
    }
}
