//! Runtime settings.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::ModelVariant;

pub const DEFAULT_ACCELERATED_URL: &str = "http://127.0.0.1:9300";
pub const DEFAULT_PORTABLE_URL: &str = "http://127.0.0.1:9301";
pub const DEFAULT_MAX_TEXT_LEN: usize = 5000;
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(30);

/// Errors in user-supplied settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid URL for {0}: value cannot be empty")]
    EmptyUrl(&'static str),

    #[error("Maximum text length must be greater than zero")]
    ZeroTextLimit,

    #[error("No model variants configured for the {0} backend")]
    NoVariants(&'static str),
}

/// Settings the core honors.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Root for everything this process persists.
    pub data_dir: PathBuf,
    /// Use the portable backend even on Apple silicon.
    pub force_portable: bool,
    pub accelerated_url: String,
    pub portable_url: String,
    /// Variants the accelerated backend has native artifacts for.
    pub accelerated_variants: Vec<ModelVariant>,
    pub portable_variants: Vec<ModelVariant>,
    /// Longest accepted generation text, in characters.
    pub max_text_len: usize,
    /// How long finished tasks stay observable.
    pub task_retention: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            force_portable: false,
            accelerated_url: DEFAULT_ACCELERATED_URL.to_string(),
            portable_url: DEFAULT_PORTABLE_URL.to_string(),
            accelerated_variants: vec![ModelVariant::Large],
            portable_variants: ModelVariant::ALL.to_vec(),
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            task_retention: DEFAULT_TASK_RETENTION,
        }
    }
}

/// `~/.voxstudio`, or `./.voxstudio` when there is no home directory.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxstudio")
}

impl Settings {
    /// Settings rooted at a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Directory holding the voice-prompt cache files.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.accelerated_url.trim().is_empty() {
            return Err(SettingsError::EmptyUrl("accelerated backend"));
        }
        if self.portable_url.trim().is_empty() {
            return Err(SettingsError::EmptyUrl("portable backend"));
        }
        if self.max_text_len == 0 {
            return Err(SettingsError::ZeroTextLimit);
        }
        if self.accelerated_variants.is_empty() {
            return Err(SettingsError::NoVariants("accelerated"));
        }
        if self.portable_variants.is_empty() {
            return Err(SettingsError::NoVariants("portable"));
        }
        Ok(())
    }
}
