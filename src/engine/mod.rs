//! Synthesis dispatcher.
//!
//! This module coordinates the prompt cache, the selected backend and the
//! task registry to turn a generation request into audio.

mod dispatcher;
mod locks;
mod request;

pub use dispatcher::{
    DispatchError, HealthReport, PromptLookup, SpeechOutput, SynthesisDispatcher,
};
pub use locks::{KeyGuard, KeyedLocks};
pub use request::{
    GenerationOutcome, GenerationRequest, MAX_INSTRUCTIONS_LEN, SUPPORTED_LANGUAGES,
    VoiceReference, wav_duration_secs,
};
