//! Piper-backed narration engine with WAV caching in `.cache`.
//!
//! Audio is synthesized per sentence and stored for reuse, then played
//! through rodio on a worker thread. The engine reports completion or
//! failure through the event callback it was built with; cancellation bumps
//! a generation counter so an orphaned worker falls silent instead of
//! delivering a late event.

use crate::narrator::{NarrationEvent, NarrationOutcome, Narrator, SpeechRequest};
use crate::voices::{Voice, discover_voices};
use anyhow::{Context, Result};
use piper_rs::from_config_path;
use piper_rs::synth::{AudioOutputConfig, PiperSpeechSynthesizer};
use rodio::{Decoder, OutputStream, Sink};
use sha2::{Digest, Sha256};
use std::env;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

type EventCallback = Arc<dyn Fn(NarrationEvent) + Send + Sync>;

pub struct PiperNarrator {
    default_model: PathBuf,
    voices_dir: PathBuf,
    cache_root: PathBuf,
    volume: f32,
    on_event: EventCallback,
    /// Current generation; workers born under an older value are orphaned.
    live: Arc<AtomicU64>,
    active_sink: Arc<Mutex<Option<Arc<Sink>>>>,
}

impl PiperNarrator {
    pub fn new(
        default_model: PathBuf,
        espeak_path: PathBuf,
        voices_dir: PathBuf,
        cache_root: PathBuf,
        volume: f32,
        on_event: impl Fn(NarrationEvent) + Send + Sync + 'static,
    ) -> Result<Self> {
        let espeak_path = sanitize_espeak_root(espeak_path);
        if env::var_os("PIPER_ESPEAKNG_DATA_DIRECTORY").is_none() {
            // Safe because we set a deterministic value early in process startup.
            unsafe {
                env::set_var("PIPER_ESPEAKNG_DATA_DIRECTORY", &espeak_path);
            }
        }
        info!(
            model = %default_model.display(),
            espeak_root = %espeak_path.display(),
            voices_dir = %voices_dir.display(),
            "Initializing Piper narrator"
        );
        Ok(Self {
            default_model,
            voices_dir,
            cache_root,
            volume,
            on_event: Arc::new(on_event),
            live: Arc::new(AtomicU64::new(0)),
            active_sink: Arc::new(Mutex::new(None)),
        })
    }

    fn emit(on_event: &EventCallback, request_id: u64, outcome: NarrationOutcome) {
        on_event(NarrationEvent {
            request_id,
            outcome,
        });
    }
}

impl Narrator for PiperNarrator {
    /// Queue one utterance. Synthesis and playback happen on a worker
    /// thread; the call returns once the worker is spawned.
    fn speak(&mut self, request: SpeechRequest) -> Result<()> {
        let generation = self.live.load(Ordering::Acquire);
        let config_path = match &request.voice {
            Some(voice) => voice.config_path.clone(),
            None => resolve_piper_config(&self.default_model),
        };
        let wav_path = cache_path(&self.cache_root, &config_path, &request.text, request.rate);
        let live = Arc::clone(&self.live);
        let active_sink = Arc::clone(&self.active_sink);
        let on_event = Arc::clone(&self.on_event);
        let volume = self.volume;

        debug!(
            request_id = request.request_id,
            voice = request.voice.as_ref().map(|v| v.name.as_str()),
            chars = request.text.len(),
            "Queueing utterance"
        );

        thread::spawn(move || {
            let request_id = request.request_id;
            let result = (|| -> Result<bool> {
                if !wav_path.exists() {
                    synthesize_cached(&config_path, &wav_path, &request.text, request.rate)?;
                }
                if live.load(Ordering::Acquire) != generation {
                    return Ok(false);
                }

                let (_stream, handle) =
                    OutputStream::try_default().context("Opening audio output")?;
                let sink = Arc::new(Sink::try_new(&handle).context("Creating sink")?);
                sink.set_volume(volume);

                let reader = BufReader::new(File::open(&wav_path)?);
                sink.append(Decoder::new(reader)?);
                if let Ok(mut slot) = active_sink.lock() {
                    *slot = Some(Arc::clone(&sink));
                }
                // A cancel may have raced the hand-off above.
                if live.load(Ordering::Acquire) != generation {
                    sink.stop();
                    return Ok(false);
                }

                sink.sleep_until_end();
                Ok(live.load(Ordering::Acquire) == generation)
            })();

            match result {
                Ok(true) => {
                    debug!(request_id, "Utterance finished");
                    Self::emit(&on_event, request_id, NarrationOutcome::Finished);
                }
                Ok(false) => debug!(request_id, "Utterance cancelled; staying silent"),
                Err(err) => {
                    if live.load(Ordering::Acquire) == generation {
                        warn!(request_id, "Utterance failed: {err:#}");
                        Self::emit(
                            &on_event,
                            request_id,
                            NarrationOutcome::Failed(format!("{err:#}")),
                        );
                    }
                }
            }
        });
        Ok(())
    }

    /// Silence the engine. Safe to call at any time, repeatedly; in-flight
    /// workers notice the generation bump and never report back.
    fn cancel_all(&mut self) {
        self.live.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut slot) = self.active_sink.lock() {
            if let Some(sink) = slot.take() {
                debug!("Stopping active utterance");
                sink.stop();
            }
        }
    }

    fn voices(&self) -> Vec<Voice> {
        discover_voices(&self.voices_dir)
    }
}

fn synthesize_cached(config_path: &Path, wav_path: &Path, text: &str, rate: f32) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!("Piper config not found at {}", config_path.display());
    }
    if let Some(parent) = wav_path.parent() {
        fs::create_dir_all(parent).context("Creating audio cache directory")?;
    }
    debug!(path = %wav_path.display(), rate, chars = text.len(), "Synthesizing sentence");
    let model = from_config_path(config_path).context("Loading Piper model")?;
    let piper =
        PiperSpeechSynthesizer::new(Arc::clone(&model)).context("Preparing Piper synthesizer")?;
    let output_config = if (rate - 1.0).abs() <= f32::EPSILON {
        None
    } else {
        Some(AudioOutputConfig {
            rate: Some(rate_to_percent(rate)),
            volume: None,
            pitch: None,
            appended_silence_ms: None,
        })
    };
    piper
        .synthesize_to_file(wav_path, text.to_string(), output_config)
        .context("Synthesizing audio")?;
    Ok(())
}

fn cache_path(base: &Path, config_path: &Path, sentence: &str, rate: f32) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(config_path.as_os_str().to_string_lossy().as_bytes());
    hasher.update(sentence.as_bytes());
    hasher.update(rate.to_le_bytes());
    let hash = format!("{:x}", hasher.finalize());
    base.join(format!("utt-{hash}.wav"))
}

/// Piper expects the parent directory that contains `espeak-ng-data/phonindex`.
/// Users often point directly at `.../espeak-ng-data`; trim that to avoid
/// duplicated segments like `/espeak-ng-data/espeak-ng-data/phonindex`.
fn sanitize_espeak_root(path: PathBuf) -> PathBuf {
    if path
        .file_name()
        .map(|n| n == "espeak-ng-data")
        .unwrap_or(false)
    {
        if let Some(parent) = path.parent() {
            debug!(
                original = %path.display(),
                sanitized = %parent.display(),
                "Trimming espeak-ng-data suffix"
            );
            return parent.to_path_buf();
        }
    }
    path
}

fn resolve_piper_config(model_path: &Path) -> PathBuf {
    if model_path
        .extension()
        .map(|ext| ext == "onnx")
        .unwrap_or(false)
    {
        return model_path.with_extension("onnx.json");
    }
    model_path.to_path_buf()
}

/// Map the user-facing rate multiplier onto Piper's 0-100 percent scale.
fn rate_to_percent(rate: f32) -> u8 {
    let clamped = rate.clamp(0.5, 5.5);
    let percent = ((clamped - 0.5) / 5.0) * 100.0;
    percent.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_is_stable_and_keyed_on_inputs() {
        let base = Path::new(".cache/audio");
        let model = Path::new("voice.onnx.json");
        let a = cache_path(base, model, "Hello", 1.0);
        assert_eq!(a, cache_path(base, model, "Hello", 1.0));
        assert_ne!(a, cache_path(base, model, "Hello", 1.5));
        assert_ne!(a, cache_path(base, model, "World", 1.0));
    }

    #[test]
    fn espeak_data_suffix_is_trimmed() {
        assert_eq!(
            sanitize_espeak_root(PathBuf::from("/usr/share/espeak-ng-data")),
            PathBuf::from("/usr/share")
        );
        assert_eq!(
            sanitize_espeak_root(PathBuf::from("/usr/share")),
            PathBuf::from("/usr/share")
        );
    }

    #[test]
    fn onnx_model_paths_resolve_to_json_configs() {
        assert_eq!(
            resolve_piper_config(Path::new("voice.onnx")),
            PathBuf::from("voice.onnx.json")
        );
        assert_eq!(
            resolve_piper_config(Path::new("voice.onnx.json")),
            PathBuf::from("voice.onnx.json")
        );
    }

    #[test]
    fn rate_multiplier_maps_onto_percent_scale() {
        assert_eq!(rate_to_percent(0.5), 0);
        assert_eq!(rate_to_percent(3.0), 50);
        assert_eq!(rate_to_percent(5.5), 100);
        // Out-of-range values clamp instead of wrapping.
        assert_eq!(rate_to_percent(9.0), 100);
        assert_eq!(rate_to_percent(0.1), 0);
    }
}
