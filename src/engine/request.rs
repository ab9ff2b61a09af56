//! Generation request and result types.

use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::backend::{ModelVariant, VariantFallback};

/// Languages the speech models accept.
pub const SUPPORTED_LANGUAGES: [&str; 10] = ["zh", "en", "ja", "ko", "de", "fr", "ru", "pt", "es", "it"];

/// Longest accepted delivery instruction, in characters.
pub const MAX_INSTRUCTIONS_LEN: usize = 500;

/// Inbound request to generate speech with a voice profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub profile_id: String,
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub model_variant: ModelVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl GenerationRequest {
    pub fn new(profile_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            text: text.into(),
            language: default_language(),
            model_variant: ModelVariant::default(),
            seed: None,
            instructions: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_variant(mut self, variant: ModelVariant) -> Self {
        self.model_variant = variant;
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

    /// Check the request fields, returning a description of the first problem.
    pub fn validate(&self, max_text_len: usize) -> Result<(), String> {
        if self.profile_id.trim().is_empty() {
            return Err("Profile id cannot be empty".to_string());
        }
        if self.text.trim().is_empty() {
            return Err("Text cannot be empty".to_string());
        }
        let text_len = self.text.chars().count();
        if text_len > max_text_len {
            return Err(format!(
                "Text is {text_len} characters, maximum is {max_text_len}"
            ));
        }
        if !SUPPORTED_LANGUAGES.contains(&self.language.as_str()) {
            return Err(format!("Unsupported language: {}", self.language));
        }
        let instructions_len = self.instructions.as_deref().map_or(0, |s| s.chars().count());
        if instructions_len > MAX_INSTRUCTIONS_LEN {
            return Err(format!(
                "Instructions exceed {MAX_INSTRUCTIONS_LEN} characters"
            ));
        }
        Ok(())
    }
}

/// A profile's reference audio as fetched by the data layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceReference {
    /// Raw bytes of each sample, in profile order.
    pub samples: Vec<Vec<u8>>,
    /// Transcript covering all samples.
    pub reference_text: String,
}

impl VoiceReference {
    pub fn new(samples: Vec<Vec<u8>>, reference_text: impl Into<String>) -> Self {
        Self {
            samples,
            reference_text: reference_text.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.samples.is_empty() {
            return Err("Profile has no reference audio".to_string());
        }
        if let Some(i) = self.samples.iter().position(Vec::is_empty) {
            return Err(format!("Reference sample {i} is empty"));
        }
        Ok(())
    }
}

/// Result of a successful generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub task_id: String,
    /// WAV bytes as produced by the backend.
    #[serde(skip)]
    pub audio: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f32>,
    /// Variant whose artifact actually produced the audio.
    pub model_variant: ModelVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_fallback: Option<VariantFallback>,
    pub cache_hit: bool,
    /// Non-fatal problems, e.g. a failed cache write.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Length of WAV audio in seconds, or `None` if the bytes are not WAV.
pub fn wav_duration_secs(audio: &[u8]) -> Option<f32> {
    let reader = hound::WavReader::new(Cursor::new(audio)).ok()?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f32 / sample_rate as f32)
}
