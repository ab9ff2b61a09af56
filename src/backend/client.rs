//! HTTP client for model server communication.

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use tracing::info;

use super::types::{BackendError, Device, ModelVariant, PromptPayload, ServerHealth, SynthesisParams};

/// Prompt creation and synthesis both run for seconds; loading can take minutes
/// when the server has to fetch weights first.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Blocking client for one local inference server.
pub struct ModelServerClient {
    base_url: String,
    client: Client,
}

impl ModelServerClient {
    /// Create a new client for the server at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Get the base URL for this server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn check_status(response: Response) -> Result<Response, BackendError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let detail = response.text().unwrap_or_default();
        if detail.is_empty() {
            Err(BackendError::RequestFailed(format!("Status: {status}")))
        } else {
            Err(BackendError::RequestFailed(format!(
                "Status: {status}: {detail}"
            )))
        }
    }

    /// Check server health.
    pub fn health(&self) -> Result<ServerHealth, BackendError> {
        let response = self
            .client
            .get(self.url("health"))
            .send()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        Self::check_status(response)?
            .json()
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    /// Ask the server to load (and if needed download) a model variant.
    pub fn load(&self, variant: ModelVariant, device: Device) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "model_size": variant.as_str(),
            "device": device.as_str(),
        });

        let response = self
            .client
            .post(self.url("load"))
            .json(&body)
            .send()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        Self::check_status(response).map_err(|e| BackendError::LoadFailed(e.to_string()))?;
        Ok(())
    }

    /// Free the server's model memory.
    pub fn unload(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url("unload"))
            .send()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        Self::check_status(response)?;
        Ok(())
    }

    /// Compute a voice prompt from reference samples and their transcript.
    pub fn voice_prompt(
        &self,
        samples: &[Vec<u8>],
        reference_text: &str,
        variant: ModelVariant,
    ) -> Result<PromptPayload, BackendError> {
        let mut form = Form::new()
            .text("reference_text", reference_text.to_string())
            .text("model_size", variant.as_str());

        for (i, sample) in samples.iter().enumerate() {
            let part = Part::bytes(sample.clone())
                .file_name(format!("sample_{i}.wav"))
                .mime_str("audio/wav")
                .map_err(|e| BackendError::RequestFailed(e.to_string()))?;
            form = form.part("audio", part);
        }

        let response = self
            .client
            .post(self.url("voice_prompt"))
            .multipart(form)
            .send()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        let bytes = Self::check_status(response)
            .map_err(|e| BackendError::Inference(e.to_string()))?
            .bytes()
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if bytes.is_empty() {
            return Err(BackendError::InvalidResponse(
                "Empty voice prompt returned".to_string(),
            ));
        }

        Ok(PromptPayload::new(bytes.to_vec()))
    }

    /// Synthesize speech from a voice prompt. Returns raw WAV data.
    pub fn synthesize(
        &self,
        prompt: &PromptPayload,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>, BackendError> {
        let prompt_part = Part::bytes(prompt.as_bytes().to_vec())
            .file_name("voice.prompt")
            .mime_str("application/octet-stream")
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;

        let mut form = Form::new()
            .part("prompt", prompt_part)
            .text("text", params.text.clone())
            .text("language", params.language.clone())
            .text("model_size", params.variant.as_str());

        if let Some(seed) = params.seed {
            form = form.text("seed", seed.to_string());
        }
        if let Some(instructions) = &params.instructions {
            form = form.text("instruct", instructions.clone());
        }

        let response = self
            .client
            .post(self.url("synthesize"))
            .multipart(form)
            .send()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        Self::check_status(response)
            .map_err(|e| BackendError::Inference(e.to_string()))?
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

/// Tracks which variant a server currently holds in memory.
///
/// All model calls go through [`ModelSlot::with_model`], which holds the slot
/// lock for the duration of the call: inference is serialized per backend and
/// a variant switch can never happen underneath a running request.
pub struct ModelSlot {
    client: ModelServerClient,
    device: Device,
    loaded: Mutex<Option<ModelVariant>>,
}

impl ModelSlot {
    pub fn new(client: ModelServerClient, device: Device) -> Self {
        Self {
            client,
            device,
            loaded: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &ModelServerClient {
        &self.client
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn loaded(&self) -> Option<ModelVariant> {
        *self.loaded.lock()
    }

    fn ensure_loaded(
        &self,
        loaded: &mut Option<ModelVariant>,
        variant: ModelVariant,
    ) -> Result<(), BackendError> {
        if *loaded == Some(variant) {
            return Ok(());
        }

        info!(model = %variant, device = %self.device, url = %self.client.base_url(), "Loading model");
        // A failed switch leaves nothing usable loaded.
        *loaded = None;
        self.client.load(variant, self.device)?;
        *loaded = Some(variant);
        Ok(())
    }

    /// Load `variant`, replacing whatever was loaded. No-op if already loaded.
    pub fn load(&self, variant: ModelVariant) -> Result<(), BackendError> {
        let mut loaded = self.loaded.lock();
        self.ensure_loaded(&mut loaded, variant)
    }

    /// Unload the current model. No-op if nothing is loaded.
    ///
    /// The slot keeps its variant if the server refuses the unload.
    pub fn unload(&self) -> Result<(), BackendError> {
        let mut loaded = self.loaded.lock();
        if let Some(variant) = *loaded {
            info!(model = %variant, "Unloading model");
            self.client.unload()?;
            *loaded = None;
        }
        Ok(())
    }

    /// Run `f` against the server with `variant` loaded.
    pub fn with_model<T>(
        &self,
        variant: ModelVariant,
        f: impl FnOnce(&ModelServerClient) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut loaded = self.loaded.lock();
        self.ensure_loaded(&mut loaded, variant)?;
        f(&self.client)
    }
}
