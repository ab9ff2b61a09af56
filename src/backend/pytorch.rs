//! Portable backend: PyTorch on a discrete GPU when present, CPU otherwise.

use super::VoiceBackend;
use super::client::{ModelServerClient, ModelSlot};
use super::types::{
    BackendError, BackendKind, Device, ModelVariant, PromptPayload, ServerHealth, SynthesisParams,
};

/// Backend driving a PyTorch inference server.
pub struct PyTorchBackend {
    slot: ModelSlot,
    native: Vec<ModelVariant>,
}

impl PyTorchBackend {
    /// Create a portable backend. `has_cuda` picks the device.
    pub fn new(
        base_url: &str,
        native: Vec<ModelVariant>,
        has_cuda: bool,
    ) -> Result<Self, BackendError> {
        let client = ModelServerClient::new(base_url)?;
        let device = if has_cuda { Device::Cuda } else { Device::Cpu };

        Ok(Self {
            slot: ModelSlot::new(client, device),
            native,
        })
    }

    pub fn base_url(&self) -> &str {
        self.slot.client().base_url()
    }
}

impl VoiceBackend for PyTorchBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PyTorch
    }

    fn device(&self) -> Device {
        self.slot.device()
    }

    fn native_variants(&self) -> Vec<ModelVariant> {
        self.native.clone()
    }

    fn load(&self, variant: ModelVariant) -> Result<(), BackendError> {
        if !self.native.contains(&variant) {
            return Err(BackendError::UnsupportedVariant(variant.to_string()));
        }
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
        self.slot.with_model(variant, |client| {
            client.voice_prompt(samples, reference_text, variant)
        })
    }

    fn synthesize(
        &self,
        prompt: &PromptPayload,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>, BackendError> {
        self.slot
            .with_model(params.variant, |client| client.synthesize(prompt, params))
    }
}
