//! Entry point for the read-aloud tool.
//!
//! Responsibilities here are intentionally minimal:
//! - Parse command-line arguments.
//! - Load user configuration from `conf/config.toml`, merged with any
//!   settings previously saved for this document.
//! - Load the document text and hand control to the interactive runtime.

mod app;
mod cache;
mod config;
mod controller;
mod locate;
mod narrator;
mod segment;
mod tts;
mod voices;

use crate::app::run_app;
use crate::cache::load_doc_config;
use crate::config::load_config;
use anyhow::{Context, Result, anyhow};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let doc_path = parse_args()?;
    let base_config = load_config(Path::new("conf/config.toml"));
    let mut config = base_config.clone();
    if let Some(mut overrides) = load_doc_config(&doc_path) {
        info!("Loaded per-document overrides from cache");
        // Always honor the base config's log level so user changes take effect.
        overrides.log_level = base_config.log_level;
        // Engine paths come from the base config too; cached copies go stale
        // when voices are reinstalled.
        overrides.tts_model_path = base_config.tts_model_path.clone();
        overrides.tts_espeak_path = base_config.tts_espeak_path.clone();
        overrides.tts_voices_dir = base_config.tts_voices_dir.clone();
        config = overrides;
    }
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        path = %doc_path.display(),
        level = %config.log_level,
        "Starting read-aloud session"
    );
    info!(
        model = %config.tts_model_path,
        espeak = %config.tts_espeak_path,
        voices_dir = %config.tts_voices_dir,
        "Active TTS configuration"
    );
    let text = fs::read_to_string(&doc_path)
        .with_context(|| format!("Reading document {}", doc_path.display()))?;
    run_app(text, config, doc_path).context("Runtime failed")?;
    Ok(())
}

fn parse_args() -> Result<PathBuf> {
    let mut args = env::args().skip(1);
    let path = args
        .next()
        .ok_or_else(|| anyhow!("Usage: readaloud <path-to-text-file>"))?;

    let path = PathBuf::from(path);
    if !path.exists() {
        return Err(anyhow!("File not found: {}", path.as_path().display()));
    }
    Ok(path)
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
