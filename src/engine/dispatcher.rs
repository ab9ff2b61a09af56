//! Synthesis dispatcher implementation.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::KeyedLocks;
use super::request::{GenerationOutcome, GenerationRequest, VoiceReference, wav_duration_secs};
use crate::backend::{
    BackendError, BackendKind, BackendSelector, Device, ModelVariant, PromptPayload,
    ResolvedVariant, ServerHealth, SynthesisParams, VariantFallback, VoiceBackend,
};
use crate::cache::{CacheStats, PromptCache, derive_key};
use crate::progress::{Stage, TaskKind, TaskRegistry};

/// Errors returned by dispatch operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Computation failed while {stage}: {message}")]
    ComputationFailure { stage: Stage, message: String },
}

impl DispatchError {
    /// HTTP status the REST layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::InvalidInput(_) => 422,
            DispatchError::BackendUnavailable(_) => 503,
            DispatchError::ComputationFailure { .. } => 500,
        }
    }

    /// Whether repeating the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DispatchError::InvalidInput(_))
    }

    /// Sort a backend error into the dispatch taxonomy.
    pub fn from_backend(stage: Stage, err: BackendError) -> Self {
        match err {
            BackendError::ConnectionFailed(_)
            | BackendError::LoadFailed(_)
            | BackendError::UnsupportedVariant(_) => {
                DispatchError::BackendUnavailable(err.to_string())
            }
            BackendError::RequestFailed(_)
            | BackendError::InvalidResponse(_)
            | BackendError::Inference(_) => DispatchError::ComputationFailure {
                stage,
                message: err.to_string(),
            },
        }
    }
}

/// Result of [`SynthesisDispatcher::get_or_create_prompt`].
#[derive(Debug, Clone, PartialEq)]
pub struct PromptLookup {
    pub key: String,
    pub payload: PromptPayload,
    pub variant: ResolvedVariant,
    pub cache_hit: bool,
    /// Set when the prompt was computed but could not be persisted.
    pub warning: Option<String>,
}

/// Result of [`SynthesisDispatcher::synthesize_speech`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOutput {
    /// WAV bytes as produced by the backend.
    pub audio: Vec<u8>,
    /// Requested and actually used model variant.
    pub variant: ResolvedVariant,
}

impl SpeechOutput {
    pub fn fallback(&self) -> Option<VariantFallback> {
        self.variant.fallback()
    }
}

/// Backend and cache status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub backend: BackendKind,
    pub device: Device,
    pub native_variants: Vec<ModelVariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_loaded: Option<ModelVariant>,
    /// What the model server reported, if it answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_error: Option<String>,
    pub cache: CacheStats,
    pub active_tasks: usize,
}

/// Orchestrates cache lookups, backend calls and progress reporting.
///
/// One dispatcher serves the whole process. Every method takes `&self`, so it
/// can be shared across request threads behind an `Arc`.
pub struct SynthesisDispatcher {
    selector: BackendSelector,
    cache: PromptCache,
    locks: KeyedLocks,
    registry: TaskRegistry,
    max_text_len: usize,
}

impl SynthesisDispatcher {
    pub fn new(
        selector: BackendSelector,
        cache: PromptCache,
        registry: TaskRegistry,
        max_text_len: usize,
    ) -> Self {
        Self {
            selector,
            cache,
            locks: KeyedLocks::new(),
            registry,
            max_text_len,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &PromptCache {
        &self.cache
    }

    /// Number of cache keys with a computation in flight or waited on.
    pub fn pending_keys(&self) -> usize {
        self.locks.len()
    }

    /// Fresh id for a generation task.
    pub fn new_task_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn report(&self, task_id: Option<&str>, stage: Stage, progress: u8) {
        if let Some(task_id) = task_id {
            self.registry.update(task_id, stage, progress);
        }
    }

    fn check_samples(samples: &[Vec<u8>]) -> Result<(), DispatchError> {
        if samples.is_empty() {
            return Err(DispatchError::InvalidInput(
                "No reference audio available".to_string(),
            ));
        }
        if let Some(i) = samples.iter().position(Vec::is_empty) {
            return Err(DispatchError::InvalidInput(format!(
                "Reference sample {i} is empty"
            )));
        }
        Ok(())
    }

    /// Validate a request and register its task in the `Queued` stage.
    ///
    /// Lets observers subscribe before [`generate`](Self::generate) runs.
    pub fn register_generation(
        &self,
        request: &GenerationRequest,
        reference: &VoiceReference,
    ) -> Result<String, DispatchError> {
        request
            .validate(self.max_text_len)
            .map_err(DispatchError::InvalidInput)?;
        reference.validate().map_err(DispatchError::InvalidInput)?;

        let task_id = Self::new_task_id();
        self.registry.start_task(
            &task_id,
            TaskKind::generation(&request.profile_id, &request.text),
        );
        Ok(task_id)
    }

    /// Return the voice prompt for these samples, computing it at most once
    /// per cache key.
    ///
    /// Concurrent callers for the same key wait for the first one and then
    /// read its result from the cache. A failed computation is not cached and
    /// the key's lock is released, so the next call retries it.
    pub fn get_or_create_prompt(
        &self,
        profile_id: &str,
        samples: &[Vec<u8>],
        reference_text: &str,
        variant: ModelVariant,
        task_id: Option<&str>,
    ) -> Result<PromptLookup, DispatchError> {
        Self::check_samples(samples)?;

        let backend = self
            .selector
            .backend()
            .map_err(|e| DispatchError::BackendUnavailable(e.to_string()))?;
        let resolved = self
            .selector
            .resolve(variant)
            .map_err(|e| DispatchError::from_backend(Stage::LoadingModel, e))?;

        self.lookup_prompt(
            backend.as_ref(),
            resolved,
            profile_id,
            samples,
            reference_text,
            task_id,
        )
    }

    fn lookup_prompt(
        &self,
        backend: &dyn VoiceBackend,
        resolved: ResolvedVariant,
        profile_id: &str,
        samples: &[Vec<u8>],
        reference_text: &str,
        task_id: Option<&str>,
    ) -> Result<PromptLookup, DispatchError> {
        let key = derive_key(samples, reference_text, resolved.effective);
        self.report(task_id, Stage::CheckingCache, 15);

        let hit = |payload: PromptPayload| {
            self.report(task_id, Stage::CacheHit, 40);
            PromptLookup {
                key: key.clone(),
                payload,
                variant: resolved,
                cache_hit: true,
                warning: None,
            }
        };

        if let Some(entry) = self.cache.get(&key) {
            debug!(profile_id, key = %key, "Voice prompt cache hit");
            return Ok(hit(entry.payload));
        }

        let _guard = self.locks.lock(&key);
        if let Some(entry) = self.cache.get(&key) {
            debug!(profile_id, key = %key, "Voice prompt computed by concurrent request");
            return Ok(hit(entry.payload));
        }

        debug!(profile_id, key = %key, model = %resolved.effective, "Voice prompt cache miss");
        self.report(task_id, Stage::ComputingPrompt, 20);
        let payload = backend
            .create_voice_prompt(samples, reference_text, resolved.effective)
            .map_err(|e| DispatchError::from_backend(Stage::ComputingPrompt, e))?;

        let warning = match self.cache.put(&key, payload.clone(), resolved.effective) {
            Ok(()) => None,
            Err(e) => {
                warn!(profile_id, key = %key, error = %e, "Voice prompt kept in memory only");
                Some(format!("Voice prompt was not saved to disk: {e}"))
            }
        };

        Ok(PromptLookup {
            key,
            payload,
            variant: resolved,
            cache_hit: false,
            warning,
        })
    }

    /// Synthesize speech from a prompt. Nothing here is cached.
    ///
    /// `params.variant` is matched against the backend's native variants
    /// like a prompt lookup is; a substitution is reported in the output.
    pub fn synthesize_speech(
        &self,
        prompt: &PromptPayload,
        params: &SynthesisParams,
        task_id: Option<&str>,
    ) -> Result<SpeechOutput, DispatchError> {
        let backend = self
            .selector
            .backend()
            .map_err(|e| DispatchError::BackendUnavailable(e.to_string()))?;
        let resolved = self
            .selector
            .resolve(params.variant)
            .map_err(|e| DispatchError::from_backend(Stage::LoadingModel, e))?;

        let audio = if resolved.fell_back() {
            let params = params.clone().with_variant(resolved.effective);
            self.run_synthesis(backend.as_ref(), prompt, &params, task_id)?
        } else {
            self.run_synthesis(backend.as_ref(), prompt, params, task_id)?
        };

        Ok(SpeechOutput {
            audio,
            variant: resolved,
        })
    }

    fn run_synthesis(
        &self,
        backend: &dyn VoiceBackend,
        prompt: &PromptPayload,
        params: &SynthesisParams,
        task_id: Option<&str>,
    ) -> Result<Vec<u8>, DispatchError> {
        self.report(task_id, Stage::GeneratingAudio, 50);
        let audio = backend
            .synthesize(prompt, params)
            .map_err(|e| DispatchError::from_backend(Stage::GeneratingAudio, e))?;
        self.report(task_id, Stage::Saving, 90);

        Ok(audio)
    }

    /// Run a whole generation as task `task_id`.
    ///
    /// The task is registered if [`register_generation`](Self::register_generation)
    /// has not done so, and always ends in `Complete` or `Error`.
    pub fn generate(
        &self,
        task_id: &str,
        request: &GenerationRequest,
        reference: &VoiceReference,
    ) -> Result<GenerationOutcome, DispatchError> {
        self.registry.start_task(
            task_id,
            TaskKind::generation(&request.profile_id, &request.text),
        );

        match self.run_generation(task_id, request, reference) {
            Ok(outcome) => {
                self.registry.complete(task_id);
                info!(
                    task_id,
                    profile_id = %request.profile_id,
                    model = %outcome.model_variant,
                    cache_hit = outcome.cache_hit,
                    "Generation complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.registry.fail(task_id, e.to_string());
                warn!(task_id, profile_id = %request.profile_id, error = %e, "Generation failed");
                Err(e)
            }
        }
    }

    fn run_generation(
        &self,
        task_id: &str,
        request: &GenerationRequest,
        reference: &VoiceReference,
    ) -> Result<GenerationOutcome, DispatchError> {
        request
            .validate(self.max_text_len)
            .map_err(DispatchError::InvalidInput)?;
        reference.validate().map_err(DispatchError::InvalidInput)?;

        let backend = self
            .selector
            .backend()
            .map_err(|e| DispatchError::BackendUnavailable(e.to_string()))?;

        self.report(Some(task_id), Stage::LoadingModel, 5);
        let resolved = self
            .selector
            .load(request.model_variant)
            .map_err(|e| DispatchError::from_backend(Stage::LoadingModel, e))?;
        let fallback = resolved.fallback();
        if let Some(fallback) = fallback {
            self.registry.note(
                task_id,
                format!(
                    "Model {} is not available on this backend, using {}",
                    fallback.requested, fallback.used
                ),
            );
        }

        let lookup = self.lookup_prompt(
            backend.as_ref(),
            resolved,
            &request.profile_id,
            &reference.samples,
            &reference.reference_text,
            Some(task_id),
        )?;

        let mut params = SynthesisParams::new(&request.text)
            .with_language(&request.language)
            .with_variant(resolved.effective);
        params.seed = request.seed;
        params.instructions = request.instructions.clone();

        let audio = self.run_synthesis(backend.as_ref(), &lookup.payload, &params, Some(task_id))?;

        Ok(GenerationOutcome {
            task_id: task_id.to_string(),
            duration_secs: wav_duration_secs(&audio),
            audio,
            model_variant: resolved.effective,
            variant_fallback: fallback,
            cache_hit: lookup.cache_hit,
            warnings: lookup.warning.into_iter().collect(),
        })
    }

    /// Whether the model server says its weights still have to be fetched.
    /// Unknown counts as present.
    fn weights_missing(&self) -> bool {
        let Ok(backend) = self.selector.backend() else {
            return false;
        };
        match backend.health() {
            Ok(health) => health.model_downloaded == Some(false),
            Err(e) => {
                debug!(error = %e, "Model server health unavailable before load");
                false
            }
        }
    }

    /// Load a model variant as a tracked `ModelLoad` task.
    ///
    /// The task passes through `Downloading` when the server reports that the
    /// weights are not on disk yet, and `LoadingModel` otherwise.
    pub fn prepare_model(
        &self,
        task_id: &str,
        variant: ModelVariant,
    ) -> Result<ResolvedVariant, DispatchError> {
        self.registry
            .start_task(task_id, TaskKind::model_load(variant.as_str()));

        if self.weights_missing() {
            info!(task_id, model = %variant, "Model weights not on disk, server will download them");
            self.registry.update(task_id, Stage::Downloading, 5);
        } else {
            self.registry.update(task_id, Stage::LoadingModel, 10);
        }

        match self.selector.load(variant) {
            Ok(resolved) => {
                if let Some(fallback) = resolved.fallback() {
                    self.registry.note(
                        task_id,
                        format!("Loaded {} in place of {}", fallback.used, fallback.requested),
                    );
                }
                self.registry.complete(task_id);
                Ok(resolved)
            }
            Err(e) => {
                let err = DispatchError::from_backend(Stage::LoadingModel, e);
                self.registry.fail(task_id, err.to_string());
                Err(err)
            }
        }
    }

    /// Free the backend's model memory.
    pub fn unload_model(&self) -> Result<(), DispatchError> {
        self.selector
            .unload()
            .map_err(|e| DispatchError::BackendUnavailable(e.to_string()))
    }

    /// Report backend, model server and cache status.
    ///
    /// An unreachable model server is reported in the result, not as an error.
    pub fn health(&self) -> Result<HealthReport, DispatchError> {
        let backend = self
            .selector
            .backend()
            .map_err(|e| DispatchError::BackendUnavailable(e.to_string()))?;

        let (server, server_error) = match backend.health() {
            Ok(health) => (Some(health), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Ok(HealthReport {
            backend: backend.kind(),
            device: backend.device(),
            native_variants: backend.native_variants(),
            model_loaded: backend.loaded_variant(),
            server,
            server_error,
            cache: self.cache.stats(),
            active_tasks: self.registry.active_tasks().len(),
        })
    }
}
