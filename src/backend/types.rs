//! Backend request/response types.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when talking to an inference backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Unsupported model variant: {0}")]
    UnsupportedVariant(String),

    #[error("Inference error: {0}")]
    Inference(String),
}

/// Named configuration of the speech model.
///
/// Variants differ in hidden dimension, so voice prompts computed by one
/// variant can never be fed to another.
#[derive(
    ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ModelVariant {
    /// 1.7B parameter base model
    #[default]
    #[value(name = "1.7B")]
    #[serde(rename = "1.7B")]
    Large,

    /// 0.6B parameter base model
    #[value(name = "0.6B")]
    #[serde(rename = "0.6B")]
    Small,
}

impl ModelVariant {
    /// Every variant this build knows about.
    pub const ALL: [ModelVariant; 2] = [ModelVariant::Large, ModelVariant::Small];

    /// Identifier used in cache keys and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Large => "1.7B",
            ModelVariant::Small => "0.6B",
        }
    }

    /// Approximate parameter count in millions.
    pub fn params_millions(&self) -> u32 {
        match self {
            ModelVariant::Large => 1700,
            ModelVariant::Small => 600,
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVariant {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelVariant::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BackendError::UnsupportedVariant(s.to_string()))
    }
}

/// Which backend implementation is serving this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Accelerated backend for Apple silicon (MLX)
    Mlx,
    /// Portable backend (PyTorch on CUDA or CPU)
    PyTorch,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Mlx => "mlx",
            BackendKind::PyTorch => "pytorch",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute device a backend runs its model on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Metal,
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Metal => "metal",
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, backend-specific precomputed voice representation.
///
/// The bytes are shared, so handing the same cached prompt to many
/// waiting callers does not copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    bytes: Arc<[u8]>,
}

impl PromptPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for PromptPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Health check response from a model server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHealth {
    pub status: String,
    pub model_loaded: bool,
    /// Whether the weights are already on local disk; `false` means the next
    /// load has to fetch them first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_downloaded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_size: Option<String>,
    pub gpu_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
}

/// Parameters for speech synthesis from a voice prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisParams {
    pub text: String,
    pub language: String,
    pub variant: ModelVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Free-text delivery guidance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl SynthesisParams {
    /// Create synthesis parameters with English and the default variant.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: "en".to_string(),
            variant: ModelVariant::default(),
            seed: None,
            instructions: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_variant(mut self, variant: ModelVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_params_builder() {
        let params = SynthesisParams::new("Hello world")
            .with_language("de")
            .with_variant(ModelVariant::Small)
            .with_seed(42)
            .with_instructions("whisper");

        assert_eq!(params.text, "Hello world");
        assert_eq!(params.language, "de");
        assert_eq!(params.variant, ModelVariant::Small);
        assert_eq!(params.seed, Some(42));
        assert_eq!(params.instructions.as_deref(), Some("whisper"));
    }

    #[test]
    fn test_synthesis_params_defaults() {
        let params = SynthesisParams::new("Hello");

        assert_eq!(params.language, "en");
        assert_eq!(params.variant, ModelVariant::Large);
        assert_eq!(params.seed, None);
        assert_eq!(params.instructions, None);
    }

    #[test]
    fn test_model_variant_parse() {
        assert_eq!("1.7B".parse::<ModelVariant>().unwrap(), ModelVariant::Large);
        assert_eq!("0.6b".parse::<ModelVariant>().unwrap(), ModelVariant::Small);
        assert!(matches!(
            "7B".parse::<ModelVariant>(),
            Err(BackendError::UnsupportedVariant(_))
        ));
    }

    #[test]
    fn test_model_variant_serde_uses_size_names() {
        let json = serde_json::to_string(&ModelVariant::Small).unwrap();
        assert_eq!(json, "\"0.6B\"");

        let parsed: ModelVariant = serde_json::from_str("\"1.7B\"").unwrap();
        assert_eq!(parsed, ModelVariant::Large);
    }

    #[test]
    fn test_server_health_deserialize() {
        let json = r#"{
            "status": "healthy",
            "model_loaded": true,
            "model_size": "1.7B",
            "gpu_available": true,
            "gpu_type": "CUDA"
        }"#;

        let health: ServerHealth = serde_json::from_str(json).unwrap();
        assert!(health.model_loaded);
        assert_eq!(health.model_size.as_deref(), Some("1.7B"));
        assert_eq!(health.gpu_type.as_deref(), Some("CUDA"));
        assert_eq!(health.model_downloaded, None);
    }

    #[test]
    fn test_server_health_reports_missing_weights() {
        let json = r#"{
            "status": "healthy",
            "model_loaded": false,
            "model_downloaded": false,
            "gpu_available": false
        }"#;

        let health: ServerHealth = serde_json::from_str(json).unwrap();
        assert_eq!(health.model_downloaded, Some(false));
    }

    #[test]
    fn test_prompt_payload_clone_shares_bytes() {
        let payload = PromptPayload::new(vec![1u8, 2, 3]);
        let copy = payload.clone();

        assert_eq!(payload, copy);
        assert_eq!(copy.as_bytes(), &[1, 2, 3]);
        assert_eq!(copy.len(), 3);
        assert!(!copy.is_empty());
    }
}
