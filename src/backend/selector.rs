//! Backend selection and model-variant fallback.

use std::cmp::Reverse;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::VoiceBackend;
use super::mlx::MlxBackend;
use super::platform::Platform;
use super::pytorch::PyTorchBackend;
use super::types::{BackendError, BackendKind, ModelVariant};
use crate::config::Settings;

/// Pick the backend kind for a host.
pub fn select_backend_kind(platform: &Platform, force_portable: bool) -> BackendKind {
    if platform.is_apple_silicon() && !force_portable {
        BackendKind::Mlx
    } else {
        BackendKind::PyTorch
    }
}

/// Construct the backend for a host. Does not load any model.
pub fn select_backend(
    settings: &Settings,
    platform: &Platform,
) -> Result<Arc<dyn VoiceBackend>, BackendError> {
    let kind = select_backend_kind(platform, settings.force_portable);
    if settings.force_portable && platform.is_apple_silicon() {
        info!("Accelerated backend available but portable backend forced");
    }

    let backend: Arc<dyn VoiceBackend> = match kind {
        BackendKind::Mlx => Arc::new(MlxBackend::new(
            &settings.accelerated_url,
            settings.accelerated_variants.clone(),
        )?),
        BackendKind::PyTorch => Arc::new(PyTorchBackend::new(
            &settings.portable_url,
            settings.portable_variants.clone(),
            platform.has_cuda,
        )?),
    };

    info!(
        backend = %backend.kind(),
        device = %backend.device(),
        os = %platform.os,
        arch = %platform.arch,
        "Selected inference backend"
    );
    Ok(backend)
}

/// A requested model variant substituted by a different one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantFallback {
    pub requested: ModelVariant,
    pub used: ModelVariant,
}

/// Outcome of matching a requested variant against what a backend ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVariant {
    pub requested: ModelVariant,
    pub effective: ModelVariant,
}

impl ResolvedVariant {
    pub fn fell_back(&self) -> bool {
        self.requested != self.effective
    }

    pub fn fallback(&self) -> Option<VariantFallback> {
        self.fell_back().then_some(VariantFallback {
            requested: self.requested,
            used: self.effective,
        })
    }
}

/// Match `requested` against the natively available variants.
///
/// Falls back to the variant with the closest parameter count, preferring the
/// larger one on a tie. `None` only if `native` is empty.
pub fn resolve_variant(native: &[ModelVariant], requested: ModelVariant) -> Option<ResolvedVariant> {
    if native.contains(&requested) {
        return Some(ResolvedVariant {
            requested,
            effective: requested,
        });
    }

    native
        .iter()
        .copied()
        .min_by_key(|v| {
            (
                v.params_millions().abs_diff(requested.params_millions()),
                Reverse(v.params_millions()),
            )
        })
        .map(|effective| ResolvedVariant {
            requested,
            effective,
        })
}

/// Owns the process-wide backend instance.
///
/// The backend is constructed on first use and memoized. A failed
/// construction is not memoized, so the next request retries it.
pub struct BackendSelector {
    settings: Settings,
    platform: Platform,
    backend: OnceCell<Arc<dyn VoiceBackend>>,
}

impl BackendSelector {
    /// Create a selector for the detected host.
    pub fn new(settings: Settings) -> Self {
        Self::with_platform(settings, Platform::detect())
    }

    /// Create a selector for an explicit platform description.
    pub fn with_platform(settings: Settings, platform: Platform) -> Self {
        Self {
            settings,
            platform,
            backend: OnceCell::new(),
        }
    }

    /// Create a selector around an already constructed backend.
    pub fn with_backend(backend: Arc<dyn VoiceBackend>) -> Self {
        Self {
            settings: Settings::default(),
            platform: Platform::detect(),
            backend: OnceCell::with_value(backend),
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// The backend instance, constructing it on first call.
    pub fn backend(&self) -> Result<Arc<dyn VoiceBackend>, BackendError> {
        self.backend
            .get_or_try_init(|| select_backend(&self.settings, &self.platform))
            .map(Arc::clone)
    }

    /// Resolve `requested` against the backend's native variants.
    pub fn resolve(&self, requested: ModelVariant) -> Result<ResolvedVariant, BackendError> {
        let backend = self.backend()?;
        let resolved = resolve_variant(&backend.native_variants(), requested).ok_or_else(|| {
            BackendError::UnsupportedVariant(format!(
                "{} backend has no model variants available",
                backend.kind()
            ))
        })?;

        if let Some(fallback) = resolved.fallback() {
            warn!(
                backend = %backend.kind(),
                requested = %fallback.requested,
                used = %fallback.used,
                "Model variant not available natively, falling back"
            );
        }
        Ok(resolved)
    }

    /// Resolve and load a variant. Loading an already loaded variant is a no-op.
    pub fn load(&self, requested: ModelVariant) -> Result<ResolvedVariant, BackendError> {
        let resolved = self.resolve(requested)?;
        self.backend()?.load(resolved.effective)?;
        Ok(resolved)
    }

    /// Free model memory. A no-op if the backend was never constructed.
    pub fn unload(&self) -> Result<(), BackendError> {
        match self.backend.get() {
            Some(backend) => backend.unload(),
            None => Ok(()),
        }
    }
}
