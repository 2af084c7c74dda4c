//! Per-document cache under `.cache/`.
//!
//! Each document gets a directory keyed by a hash of its path, holding the
//! synthesized-audio cache and a `config.toml` with the settings last used
//! for that document. Write failures are ignored; the cache is a convenience.

use crate::config::AppConfig;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const CACHE_DIR: &str = ".cache";

pub fn hash_dir(doc_path: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(doc_path.as_os_str().to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    Path::new(CACHE_DIR).join(hash)
}

/// Where synthesized WAV files for this document live.
pub fn audio_dir(doc_path: &Path) -> PathBuf {
    hash_dir(doc_path).join("audio")
}

/// Settings last used for this document, if any were saved.
pub fn load_doc_config(doc_path: &Path) -> Option<AppConfig> {
    let path = hash_dir(doc_path).join("config.toml");
    let data = fs::read_to_string(path).ok()?;
    toml::from_str(&data).ok()
}

pub fn save_doc_config(doc_path: &Path, config: &AppConfig) {
    let path = hash_dir(doc_path).join("config.toml");
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Some(contents) = crate::config::serialize_config(config) {
        let _ = fs::write(path, contents);
    }
}
