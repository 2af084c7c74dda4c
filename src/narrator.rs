//! The narration engine seam.
//!
//! The controller never talks to audio hardware directly; it emits
//! [`SpeechRequest`]s and consumes [`NarrationEvent`]s tagged with the
//! request id they answer. Anything implementing [`Narrator`] can sit on the
//! other side: the Piper-backed engine in `tts.rs`, or a mock in tests.

use crate::voices::Voice;
use anyhow::Result;

/// One utterance handed to the engine. At most one request is in flight at a
/// time; the id ties the eventual completion event back to its request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub request_id: u64,
    pub text: String,
    /// Rate multiplier, 1.0 = the voice's native pace.
    pub rate: f32,
    /// BCP-47-style locale tag, e.g. `en-US` or `zh-HK`.
    pub locale: String,
    /// Voice picked for the locale; `None` means the engine default.
    pub voice: Option<Voice>,
}

/// How an utterance ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationOutcome {
    Finished,
    Failed(String),
}

/// Delivered asynchronously, at an unpredictable time after `speak`.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationEvent {
    pub request_id: u64,
    pub outcome: NarrationOutcome,
}

/// An asynchronous text-to-speech capability.
///
/// `speak` returns as soon as the utterance is queued; completion or failure
/// arrives later through the event callback the engine was built with.
/// `cancel_all` silences the engine and guarantees that events from already
/// queued utterances are suppressed or ignorable (stale ids).
pub trait Narrator {
    fn speak(&mut self, request: SpeechRequest) -> Result<()>;
    fn cancel_all(&mut self);
    fn voices(&self) -> Vec<Voice>;
}
