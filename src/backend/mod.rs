//! Inference backends for voice-prompt creation and speech synthesis.
//!
//! Two implementations of [`VoiceBackend`] exist: an accelerated one for
//! Apple silicon ([`MlxBackend`]) and a portable one ([`PyTorchBackend`]) that
//! runs on a discrete GPU when present and on the CPU otherwise. Exactly one
//! is active per process, chosen by [`BackendSelector`].

mod client;
mod mlx;
mod platform;
mod pytorch;
mod selector;
mod types;

pub use client::{ModelServerClient, ModelSlot};
pub use mlx::MlxBackend;
pub use platform::Platform;
pub use pytorch::PyTorchBackend;
pub use selector::{
    BackendSelector, ResolvedVariant, VariantFallback, resolve_variant, select_backend,
    select_backend_kind,
};
pub use types::{
    BackendError, BackendKind, Device, ModelVariant, PromptPayload, ServerHealth, SynthesisParams,
};

/// Capability contract shared by both backends.
///
/// Implementations synchronize internally; every method takes `&self` and may
/// be called from many request threads at once.
#[cfg_attr(test, mockall::automock)]
pub trait VoiceBackend: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Device the model runs on.
    fn device(&self) -> Device;

    /// Variants this backend has native artifacts for.
    fn native_variants(&self) -> Vec<ModelVariant>;

    /// Load model weights for `variant`. Idempotent.
    fn load(&self, variant: ModelVariant) -> Result<(), BackendError>;

    /// Free model memory. Idempotent.
    fn unload(&self) -> Result<(), BackendError>;

    /// Currently loaded variant, if any.
    fn loaded_variant(&self) -> Option<ModelVariant>;

    /// Check the inference server.
    fn health(&self) -> Result<ServerHealth, BackendError>;

    /// Compute a voice prompt from reference audio samples.
    ///
    /// # Arguments
    /// * `samples` - Raw bytes of each reference sample, in profile order
    /// * `reference_text` - Transcript of the samples
    /// * `variant` - Model variant the prompt is computed for
    fn create_voice_prompt(
        &self,
        samples: &[Vec<u8>],
        reference_text: &str,
        variant: ModelVariant,
    ) -> Result<PromptPayload, BackendError>;

    /// Synthesize speech from a voice prompt.
    ///
    /// # Returns
    /// Raw WAV audio data
    fn synthesize(
        &self,
        prompt: &PromptPayload,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>, BackendError>;
}
