//! Sentence-level playback controller.
//!
//! This is a pure state machine: every operation returns immediately and
//! pushes the work that must happen outside the reducer (submitting an
//! utterance, cancelling the engine, arming the inter-sentence gap timer,
//! persisting settings) into an [`Effect`] list for the runtime to execute.
//! Completion events from the narration engine come back tagged with the
//! request id they answer; anything carrying a stale id is ignored, which is
//! what makes rapid stop/restart and cancellation-during-gap safe.

use crate::locate::find_sentence;
use crate::narrator::SpeechRequest;
use crate::segment::split_sentences;
use crate::voices::{Voice, pick_voice};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MIN_SPEED: f32 = 0.1;
pub const MAX_SPEED: f32 = 3.0;

/// Work the runtime must perform on the controller's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Cancel whatever the engine is doing. Always emitted before a new
    /// `Speak`, and safe when nothing is outstanding.
    CancelNarration,
    Speak(SpeechRequest),
    /// Arm a one-shot timer; when it fires the runtime calls
    /// [`Controller::gap_elapsed`] with the same id.
    ScheduleGap { request_id: u64, delay: Duration },
    SaveSettings,
}

/// How a session treats a finished sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepeatMode {
    /// Advance to the next sentence.
    Continue,
    /// Re-read the same sentence.
    Repeat,
}

impl Default for RepeatMode {
    fn default() -> Self {
        RepeatMode::Continue
    }
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RepeatMode::Continue => "continue",
            RepeatMode::Repeat => "repeat",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    /// An utterance is outstanding at the engine.
    Speaking { request_id: u64 },
    /// Between sentences; nothing outstanding, a gap timer is armed.
    GapWait { request_id: u64, next_idx: usize },
}

/// Narration settings for one controller instance. Loaded from config at
/// startup and persisted through [`Effect::SaveSettings`] on change.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationSettings {
    pub speed: f32,
    pub language: String,
    /// Sentences read per session before auto-stop.
    pub sentence_count: usize,
    pub repeat_mode: RepeatMode,
    /// Gap between consecutive sentences, so transitions are not clipped.
    pub gap_after_sentence: Duration,
}

impl Default for NarrationSettings {
    fn default() -> Self {
        NarrationSettings {
            speed: 1.0,
            language: "en-US".to_string(),
            sentence_count: 5,
            repeat_mode: RepeatMode::Continue,
            gap_after_sentence: Duration::from_millis(300),
        }
    }
}

/// One document view's playback state. No process-wide singletons; each view
/// owns its controller and the engine events routed to it.
pub struct Controller {
    sentences: Vec<String>,
    cursor: usize,
    lifecycle: Lifecycle,
    /// Sentences completed in the current session.
    read_in_session: usize,
    /// Where the current session began, for diagnostics.
    session_start: usize,
    request_id: u64,
    voices: Vec<Voice>,
    settings: NarrationSettings,
}

impl Controller {
    pub fn new(settings: NarrationSettings) -> Self {
        Controller {
            sentences: Vec::new(),
            cursor: 0,
            lifecycle: Lifecycle::Idle,
            read_in_session: 0,
            session_start: 0,
            request_id: 0,
            voices: Vec::new(),
            settings,
        }
    }

    /// Replace the voice inventory the controller picks from.
    pub fn set_voices(&mut self, voices: Vec<Voice>) {
        self.voices = voices;
    }

    // ---- observable state ------------------------------------------------

    pub fn is_playing(&self) -> bool {
        !matches!(self.lifecycle, Lifecycle::Idle)
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn current_index(&self) -> usize {
        self.cursor
    }

    pub fn current_sentence(&self) -> &str {
        self.sentences
            .get(self.cursor)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Human-readable `N/total` position, or a placeholder before any text
    /// is loaded.
    pub fn position_indicator(&self) -> String {
        if self.sentences.is_empty() {
            "Ready".to_string()
        } else {
            format!("{}/{}", self.cursor + 1, self.sentences.len())
        }
    }

    pub fn settings(&self) -> &NarrationSettings {
        &self.settings
    }

    // ---- commands --------------------------------------------------------

    /// Load new source text. Any running session is forcibly stopped so a
    /// stale sentence is never narrated over the new document.
    pub fn load_text(&mut self, text: &str, effects: &mut Vec<Effect>) {
        self.stop(effects);
        self.sentences = split_sentences(text);
        self.cursor = 0;
        self.read_in_session = 0;
        self.session_start = 0;
        info!(sentence_count = self.sentences.len(), "Loaded text for narration");
    }

    /// Start a session from the current cursor. No-op when nothing is
    /// loaded.
    pub fn play(&mut self, effects: &mut Vec<Effect>) {
        if self.sentences.is_empty() {
            debug!("Play requested with no sentences loaded");
            return;
        }
        self.read_in_session = 0;
        self.session_start = self.cursor;
        info!(start_idx = self.session_start, "Starting narration session");
        self.speak_at(self.cursor, effects);
    }

    /// End the session. Idempotent; safe from any state, including mid-gap.
    pub fn stop(&mut self, effects: &mut Vec<Effect>) {
        if self.is_playing() {
            debug!("Stopping narration session");
        }
        self.lifecycle = Lifecycle::Idle;
        effects.push(Effect::CancelNarration);
    }

    /// Stop and step the cursor back one sentence, clamped at the start.
    pub fn prev_sentence(&mut self, effects: &mut Vec<Effect>) {
        self.stop(effects);
        self.cursor = self.cursor.saturating_sub(1);
        debug!(cursor = self.cursor, "Moved to previous sentence");
    }

    /// Stop and step the cursor forward one sentence, clamped at the end.
    pub fn next_sentence(&mut self, effects: &mut Vec<Effect>) {
        self.stop(effects);
        if !self.sentences.is_empty() {
            self.cursor = (self.cursor + 1).min(self.sentences.len() - 1);
        }
        debug!(cursor = self.cursor, "Moved to next sentence");
    }

    /// Jump the cursor to `idx`, clamped into range. Does not start playback.
    pub fn seek_to(&mut self, idx: usize, effects: &mut Vec<Effect>) {
        self.stop(effects);
        if !self.sentences.is_empty() {
            self.cursor = idx.min(self.sentences.len() - 1);
        }
    }

    /// Locate the sentence matching an on-screen selection and start a new
    /// session pinned there. Returns whether a match was found; on `false`
    /// nothing changes and the caller may fall back to a plain [`play`].
    ///
    /// [`play`]: Controller::play
    pub fn play_from_selection(&mut self, selection: &str, effects: &mut Vec<Effect>) -> bool {
        let Some(idx) = find_sentence(&self.sentences, selection) else {
            debug!("No sentence matched the selection");
            return false;
        };
        info!(idx, "Selection matched; starting session there");
        self.lifecycle = Lifecycle::Idle;
        self.cursor = idx;
        self.read_in_session = 0;
        self.session_start = idx;
        self.speak_at(idx, effects);
        true
    }

    // ---- settings --------------------------------------------------------

    pub fn set_speed(&mut self, speed: f32, effects: &mut Vec<Effect>) {
        self.settings.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        info!(speed = self.settings.speed, "Adjusted narration speed");
        effects.push(Effect::SaveSettings);
    }

    pub fn set_language(&mut self, language: String, effects: &mut Vec<Effect>) {
        info!(%language, "Changed narration language");
        self.settings.language = language;
        effects.push(Effect::SaveSettings);
    }

    pub fn set_sentence_count(&mut self, count: usize, effects: &mut Vec<Effect>) {
        self.settings.sentence_count = count.max(1);
        info!(count = self.settings.sentence_count, "Changed session sentence cap");
        effects.push(Effect::SaveSettings);
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode, effects: &mut Vec<Effect>) {
        self.settings.repeat_mode = mode;
        info!(%mode, "Changed repeat mode");
        effects.push(Effect::SaveSettings);
    }

    // ---- engine events ---------------------------------------------------

    /// An utterance finished cleanly. Decides, per session policy, whether
    /// to stop, repeat the sentence, or advance — the follow-up request is
    /// only issued after the gap timer fires and only if the session is
    /// still current.
    pub fn narration_finished(&mut self, request_id: u64, effects: &mut Vec<Effect>) {
        let Lifecycle::Speaking { request_id: current } = self.lifecycle else {
            debug!(request_id, "Ignoring completion outside a speaking state");
            return;
        };
        if request_id != current {
            debug!(request_id, current, "Ignoring stale narration completion");
            return;
        }

        self.read_in_session += 1;
        if self.read_in_session >= self.settings.sentence_count {
            info!(
                read = self.read_in_session,
                start_idx = self.session_start,
                "Session sentence cap reached"
            );
            self.stop(effects);
            return;
        }

        let next_idx = match self.settings.repeat_mode {
            RepeatMode::Repeat => self.cursor,
            RepeatMode::Continue => {
                let next = self.cursor + 1;
                if next >= self.sentences.len() {
                    info!("Reached end of text");
                    self.stop(effects);
                    return;
                }
                // Cursor advances now; the utterance itself waits for the gap.
                self.cursor = next;
                next
            }
        };
        self.lifecycle = Lifecycle::GapWait {
            request_id,
            next_idx,
        };
        effects.push(Effect::ScheduleGap {
            request_id,
            delay: self.settings.gap_after_sentence,
        });
    }

    /// An utterance failed. Narration is a convenience, not a correctness
    /// path: end the session, never retry.
    pub fn narration_failed(&mut self, request_id: u64, reason: &str, effects: &mut Vec<Effect>) {
        match self.lifecycle {
            Lifecycle::Speaking { request_id: current } if request_id == current => {
                warn!(request_id, reason, "Narration failed; stopping session");
                self.stop(effects);
            }
            _ => debug!(request_id, "Ignoring stale narration failure"),
        }
    }

    /// The inter-sentence gap timer fired. Issues the pending utterance,
    /// unless a stop or a newer session arrived during the window.
    pub fn gap_elapsed(&mut self, request_id: u64, effects: &mut Vec<Effect>) {
        match self.lifecycle {
            Lifecycle::GapWait {
                request_id: current,
                next_idx,
            } if request_id == current => {
                self.speak_at(next_idx, effects);
            }
            _ => debug!(request_id, "Ignoring stale gap timer"),
        }
    }

    // ---- internals -------------------------------------------------------

    fn speak_at(&mut self, idx: usize, effects: &mut Vec<Effect>) {
        let Some(text) = self.sentences.get(idx) else {
            self.stop(effects);
            return;
        };
        self.cursor = idx;
        self.request_id = self.request_id.wrapping_add(1);
        let request_id = self.request_id;
        self.lifecycle = Lifecycle::Speaking { request_id };

        // Cancel-before-start: the engine is a single shared capability.
        effects.push(Effect::CancelNarration);
        effects.push(Effect::Speak(SpeechRequest {
            request_id,
            text: text.clone(),
            rate: self.settings.speed,
            locale: self.settings.language.clone(),
            voice: pick_voice(&self.voices, &self.settings.language),
        }));
        debug!(request_id, idx, "Issued narration request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_with(text: &str) -> (Controller, Vec<Effect>) {
        let mut effects = Vec::new();
        let mut controller = Controller::new(NarrationSettings::default());
        controller.load_text(text, &mut effects);
        effects.clear();
        (controller, effects)
    }

    /// The request id of the last `Speak` effect, panicking if none exists.
    fn last_request_id(effects: &[Effect]) -> u64 {
        effects
            .iter()
            .rev()
            .find_map(|e| match e {
                Effect::Speak(req) => Some(req.request_id),
                _ => None,
            })
            .expect("a Speak effect should have been emitted")
    }

    fn last_gap_id(effects: &[Effect]) -> u64 {
        effects
            .iter()
            .rev()
            .find_map(|e| match e {
                Effect::ScheduleGap { request_id, .. } => Some(*request_id),
                _ => None,
            })
            .expect("a gap should have been scheduled")
    }

    #[test]
    fn load_text_resets_cursor_and_is_not_playing() {
        let (controller, _) = controller_with("One. Two. Three.");
        assert_eq!(controller.current_index(), 0);
        assert!(!controller.is_playing());
        assert_eq!(controller.sentences().len(), 3);
    }

    #[test]
    fn load_text_cancels_running_narration() {
        let (mut controller, mut effects) = controller_with("One. Two.");
        controller.play(&mut effects);
        assert!(controller.is_playing());

        effects.clear();
        controller.load_text("Fresh. Text.", &mut effects);
        assert!(!controller.is_playing());
        assert!(effects.contains(&Effect::CancelNarration));
    }

    #[test]
    fn play_with_no_text_is_a_no_op() {
        let mut effects = Vec::new();
        let mut controller = Controller::new(NarrationSettings::default());
        controller.play(&mut effects);
        assert!(effects.is_empty());
        assert!(!controller.is_playing());
        assert_eq!(controller.position_indicator(), "Ready");
    }

    #[test]
    fn play_cancels_before_speaking() {
        let (mut controller, mut effects) = controller_with("One. Two.");
        controller.play(&mut effects);
        assert_eq!(effects[0], Effect::CancelNarration);
        assert!(matches!(effects[1], Effect::Speak(_)));
        assert!(controller.is_playing());
    }

    #[test]
    fn speak_requests_carry_rate_and_locale() {
        let settings = NarrationSettings {
            speed: 1.5,
            language: "zh-HK".to_string(),
            ..NarrationSettings::default()
        };
        let mut controller = Controller::new(settings);
        let mut effects = Vec::new();
        controller.load_text("你好。", &mut effects);
        effects.clear();
        controller.play(&mut effects);
        let Effect::Speak(req) = &effects[1] else {
            panic!("expected a Speak effect");
        };
        assert_eq!(req.rate, 1.5);
        assert_eq!(req.locale, "zh-HK");
        assert_eq!(req.text, "你好");
    }

    #[test]
    fn stop_before_completion_keeps_stale_callback_inert() {
        let (mut controller, mut effects) = controller_with("One. Two.");
        controller.play(&mut effects);
        let id = last_request_id(&effects);

        effects.clear();
        controller.stop(&mut effects);
        assert!(!controller.is_playing());

        // The engine's late completion must not restart anything.
        effects.clear();
        controller.narration_finished(id, &mut effects);
        assert!(!controller.is_playing());
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut controller, mut effects) = controller_with("One.");
        controller.stop(&mut effects);
        controller.stop(&mut effects);
        assert!(!controller.is_playing());
    }

    #[test]
    fn prev_and_next_clamp_at_the_edges() {
        let (mut controller, mut effects) = controller_with("One. Two.");
        controller.prev_sentence(&mut effects);
        assert_eq!(controller.current_index(), 0);

        controller.next_sentence(&mut effects);
        assert_eq!(controller.current_index(), 1);
        controller.next_sentence(&mut effects);
        assert_eq!(controller.current_index(), 1);
    }

    #[test]
    fn prev_next_stop_playback_without_resuming() {
        let (mut controller, mut effects) = controller_with("One. Two.");
        controller.play(&mut effects);
        effects.clear();
        controller.next_sentence(&mut effects);
        assert!(!controller.is_playing());
        assert!(!effects.iter().any(|e| matches!(e, Effect::Speak(_))));
    }

    #[test]
    fn seek_to_clamps_out_of_range_indices() {
        let (mut controller, mut effects) = controller_with("One. Two. Three.");
        controller.seek_to(99, &mut effects);
        assert_eq!(controller.current_index(), 2);
    }

    #[test]
    fn continue_mode_advances_after_the_gap() {
        let (mut controller, mut effects) = controller_with("One. Two. Three.");
        controller.play(&mut effects);
        let id = last_request_id(&effects);

        effects.clear();
        controller.narration_finished(id, &mut effects);
        // Cursor advanced immediately; the request waits for the gap.
        assert_eq!(controller.current_index(), 1);
        assert_eq!(last_gap_id(&effects), id);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Speak(_))));

        effects.clear();
        controller.gap_elapsed(id, &mut effects);
        let Effect::Speak(req) = &effects[1] else {
            panic!("expected a Speak effect");
        };
        assert_eq!(req.text, "Two");
    }

    #[test]
    fn session_auto_stops_at_sentence_cap() {
        let settings = NarrationSettings {
            sentence_count: 2,
            ..NarrationSettings::default()
        };
        let mut controller = Controller::new(settings);
        let mut effects = Vec::new();
        controller.load_text("One. Two. Three. Four.", &mut effects);
        effects.clear();

        controller.play(&mut effects);
        let first = last_request_id(&effects);
        effects.clear();
        controller.narration_finished(first, &mut effects);
        controller.gap_elapsed(first, &mut effects);
        let second = last_request_id(&effects);

        effects.clear();
        controller.narration_finished(second, &mut effects);
        // Two sentences read; no third request, no gap.
        assert!(!controller.is_playing());
        assert!(effects.iter().all(|e| *e == Effect::CancelNarration));
        assert_eq!(controller.current_index(), 1);
    }

    #[test]
    fn repeat_mode_re_reads_the_same_sentence() {
        let settings = NarrationSettings {
            repeat_mode: RepeatMode::Repeat,
            sentence_count: 3,
            ..NarrationSettings::default()
        };
        let mut controller = Controller::new(settings);
        let mut effects = Vec::new();
        controller.load_text("One. Two.", &mut effects);
        effects.clear();

        controller.play(&mut effects);
        let mut id = last_request_id(&effects);
        for _ in 0..2 {
            effects.clear();
            controller.narration_finished(id, &mut effects);
            assert_eq!(controller.current_index(), 0);
            controller.gap_elapsed(id, &mut effects);
            let Effect::Speak(req) = effects.last().expect("speak effect") else {
                panic!("expected a Speak effect");
            };
            assert_eq!(req.text, "One");
            id = req.request_id;
        }

        effects.clear();
        controller.narration_finished(id, &mut effects);
        assert!(!controller.is_playing());
    }

    #[test]
    fn continue_mode_stops_at_end_of_text() {
        let settings = NarrationSettings {
            sentence_count: 10,
            ..NarrationSettings::default()
        };
        let mut controller = Controller::new(settings);
        let mut effects = Vec::new();
        controller.load_text("Only one sentence.", &mut effects);
        effects.clear();

        controller.play(&mut effects);
        let id = last_request_id(&effects);
        effects.clear();
        controller.narration_finished(id, &mut effects);
        assert!(!controller.is_playing());
        assert_eq!(controller.current_index(), 0);
    }

    #[test]
    fn stop_during_gap_suppresses_the_pending_request() {
        let (mut controller, mut effects) = controller_with("One. Two.");
        controller.play(&mut effects);
        let id = last_request_id(&effects);
        effects.clear();
        controller.narration_finished(id, &mut effects);
        assert!(controller.is_playing());

        controller.stop(&mut effects);
        effects.clear();
        controller.gap_elapsed(id, &mut effects);
        assert!(effects.is_empty());
        assert!(!controller.is_playing());
    }

    #[test]
    fn new_session_during_gap_invalidates_the_old_timer() {
        let (mut controller, mut effects) = controller_with("One. Two. Three.");
        controller.play(&mut effects);
        let id = last_request_id(&effects);
        effects.clear();
        controller.narration_finished(id, &mut effects);

        // User restarts from the top before the gap fires.
        controller.seek_to(0, &mut effects);
        controller.play(&mut effects);
        let new_id = last_request_id(&effects);
        assert_ne!(id, new_id);

        effects.clear();
        controller.gap_elapsed(id, &mut effects);
        assert!(effects.is_empty());
    }

    #[test]
    fn narration_failure_ends_the_session() {
        let (mut controller, mut effects) = controller_with("One. Two.");
        controller.play(&mut effects);
        let id = last_request_id(&effects);
        effects.clear();
        controller.narration_failed(id, "voice unavailable", &mut effects);
        assert!(!controller.is_playing());
        assert!(!effects.iter().any(|e| matches!(e, Effect::Speak(_))));
    }

    #[test]
    fn stale_failure_is_ignored() {
        let (mut controller, mut effects) = controller_with("One. Two.");
        controller.play(&mut effects);
        let id = last_request_id(&effects);
        effects.clear();
        controller.narration_failed(id.wrapping_add(7), "stale", &mut effects);
        assert!(controller.is_playing());
    }

    #[test]
    fn selection_seek_preempts_a_running_session() {
        let (mut controller, mut effects) = controller_with("Alpha one. Beta two. Gamma three.");
        controller.play(&mut effects);
        effects.clear();

        assert!(controller.play_from_selection("Gamma three", &mut effects));
        assert_eq!(controller.current_index(), 2);
        assert!(controller.is_playing());
        assert_eq!(effects[0], Effect::CancelNarration);
        let Effect::Speak(req) = &effects[1] else {
            panic!("expected a Speak effect");
        };
        assert_eq!(req.text, "Gamma three");
    }

    #[test]
    fn unmatched_selection_changes_nothing() {
        let (mut controller, mut effects) = controller_with("Alpha one. Beta two.");
        assert!(!controller.play_from_selection("0123456789", &mut effects));
        assert!(effects.is_empty());
        assert!(!controller.is_playing());
        assert_eq!(controller.current_index(), 0);
    }

    #[test]
    fn selection_session_resets_the_read_counter() {
        let settings = NarrationSettings {
            sentence_count: 2,
            ..NarrationSettings::default()
        };
        let mut controller = Controller::new(settings);
        let mut effects = Vec::new();
        controller.load_text("One. Two. Three. Four.", &mut effects);
        effects.clear();

        controller.play(&mut effects);
        let id = last_request_id(&effects);
        effects.clear();
        controller.narration_finished(id, &mut effects);

        // One sentence into the session, seek by selection: counter restarts,
        // so two more sentences play before the cap.
        effects.clear();
        assert!(controller.play_from_selection("Three", &mut effects));
        let id = last_request_id(&effects);
        effects.clear();
        controller.narration_finished(id, &mut effects);
        assert!(controller.is_playing());
        controller.gap_elapsed(id, &mut effects);
        let id = last_request_id(&effects);
        effects.clear();
        controller.narration_finished(id, &mut effects);
        assert!(!controller.is_playing());
    }

    #[test]
    fn position_indicator_tracks_the_cursor() {
        let (mut controller, mut effects) = controller_with("One. Two. Three.");
        assert_eq!(controller.position_indicator(), "1/3");
        controller.next_sentence(&mut effects);
        assert_eq!(controller.position_indicator(), "2/3");
    }

    #[test]
    fn speed_setting_clamps_and_persists() {
        let (mut controller, mut effects) = controller_with("One.");
        controller.set_speed(99.0, &mut effects);
        assert_eq!(controller.settings().speed, MAX_SPEED);
        assert!(effects.contains(&Effect::SaveSettings));

        controller.set_sentence_count(0, &mut effects);
        assert_eq!(controller.settings().sentence_count, 1);
    }
}
