//! Accelerated backend for Apple silicon.

use super::VoiceBackend;
use super::client::{ModelServerClient, ModelSlot};
use super::types::{
    BackendError, BackendKind, Device, ModelVariant, PromptPayload, ServerHealth, SynthesisParams,
};

/// Backend driving an MLX inference server on Metal.
///
/// Only variants with a converted MLX artifact are served natively.
pub struct MlxBackend {
    slot: ModelSlot,
    native: Vec<ModelVariant>,
}

impl MlxBackend {
    pub fn new(base_url: &str, native: Vec<ModelVariant>) -> Result<Self, BackendError> {
        let client = ModelServerClient::new(base_url)?;
        Ok(Self {
            slot: ModelSlot::new(client, Device::Metal),
            native,
        })
    }

    pub fn base_url(&self) -> &str {
        self.slot.client().base_url()
    }

    fn check_native(&self, variant: ModelVariant) -> Result<(), BackendError> {
        if self.native.contains(&variant) {
            Ok(())
        } else {
            Err(BackendError::UnsupportedVariant(format!(
                "{variant} has no MLX artifact"
            )))
        }
    }
}

impl VoiceBackend for MlxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mlx
    }

    fn device(&self) -> Device {
        self.slot.device()
    }

    fn native_variants(&self) -> Vec<ModelVariant> {
        self.native.clone()
    }

    fn load(&self, variant: ModelVariant) -> Result<(), BackendError> {
        self.check_native(variant)?;
        self.slot.load(variant)
    }

    fn unload(&self) -> Result<(), BackendError> {
        self.slot.unload()
    }

    fn loaded_variant(&self) -> Option<ModelVariant> {
        self.slot.loaded()
    }

    fn health(&self) -> Result<ServerHealth, BackendError> {
        self.slot.client().health()
    }

    fn create_voice_prompt(
        &self,
        samples: &[Vec<u8>],
        reference_text: &str,
        variant: ModelVariant,
    ) -> Result<PromptPayload, BackendError> {
        self.check_native(variant)?;
        self.slot.with_model(variant, |client| {
            client.voice_prompt(samples, reference_text, variant)
        })
    }

    fn synthesize(
        &self,
        prompt: &PromptPayload,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>, BackendError> {
        self.check_native(params.variant)?;
        self.slot
            .with_model(params.variant, |client| client.synthesize(prompt, params))
    }
}
