//! CLI argument definitions and parsing.

use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

use crate::backend::ModelVariant;
use crate::config::{DEFAULT_ACCELERATED_URL, DEFAULT_PORTABLE_URL, Settings, default_data_dir};

/// Voice cloning text-to-speech with cached voice prompts.
#[derive(Parser, Debug)]
#[command(name = "voxstudio")]
#[command(about = "Voice cloning text-to-speech with cached voice prompts")]
#[command(version)]
pub struct Args {
    /// Reference audio with transcript: "file.wav;transcript text" (repeatable)
    #[arg(short, long = "reference")]
    pub references: Vec<String>,

    /// Text to generate speech from
    #[arg(short, long)]
    pub generate: Option<String>,

    /// Model size: "1.7B" or "0.6B"
    #[arg(short, long, value_enum, default_value = "1.7B")]
    pub model_size: ModelVariant,

    /// Language code of the generated speech
    #[arg(short, long, default_value = "en")]
    pub language: String,

    /// Random seed for reproducible output
    #[arg(long)]
    pub seed: Option<u64>,

    /// Delivery instructions, e.g. "speak slowly and calmly"
    #[arg(long)]
    pub instruct: Option<String>,

    /// Voice profile id used in progress reports and logs
    #[arg(short, long, default_value = "cli")]
    pub profile: String,

    /// Output audio file
    #[arg(short, long, default_value = "output.wav")]
    pub output: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Show backend and cache status
    #[arg(long)]
    pub health: bool,

    /// Show voice prompt cache statistics
    #[arg(long)]
    pub cache_stats: bool,

    /// Delete every cached voice prompt
    #[arg(long)]
    pub clear_cache: bool,

    /// Data directory [default: ~/.voxstudio]
    #[arg(long, env = "VOXSTUDIO_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Use the portable backend even where the accelerated one is available
    #[arg(
        long,
        env = "VOXSTUDIO_FORCE_PORTABLE",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub force_portable: bool,

    /// Model server for the accelerated backend
    #[arg(long, env = "VOXSTUDIO_ACCELERATED_URL", default_value = DEFAULT_ACCELERATED_URL)]
    pub accelerated_url: String,

    /// Model server for the portable backend
    #[arg(long, env = "VOXSTUDIO_PORTABLE_URL", default_value = DEFAULT_PORTABLE_URL)]
    pub portable_url: String,
}

impl Args {
    /// Runtime settings selected by these arguments.
    pub fn settings(&self) -> Settings {
        Settings {
            data_dir: self.data_dir.clone().unwrap_or_else(default_data_dir),
            force_portable: self.force_portable,
            accelerated_url: self.accelerated_url.clone(),
            portable_url: self.portable_url.clone(),
            ..Settings::default()
        }
    }
}

/// Parsed reference audio with transcript.
#[derive(Debug, Clone)]
pub struct Reference {
    /// Path to the audio file.
    pub audio_path: PathBuf,
    /// Transcript of the audio content.
    pub transcript: String,
}

/// Errors that can occur when parsing a reference string.
#[derive(Error, Debug)]
pub enum ReferenceParseError {
    #[error("Invalid format: {0}. Expected 'file.wav;transcript text'")]
    InvalidFormat(String),

    #[error("Audio file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Transcript cannot be empty")]
    EmptyTranscript,
}

impl Reference {
    /// Parse a reference from "file.wav;transcript" format.
    ///
    /// # Examples
    /// ```
    /// use voxstudio::cli::Reference;
    /// let reference = Reference::parse("audio.wav;Hello world");
    /// ```
    pub fn parse(input: &str) -> Result<Self, ReferenceParseError> {
        // Transcripts may themselves contain semicolons
        let Some((path, transcript)) = input.split_once(';') else {
            return Err(ReferenceParseError::InvalidFormat(
                "Missing semicolon separator".to_string(),
            ));
        };

        let audio_path = PathBuf::from(path.trim());
        let transcript = transcript.trim().to_string();

        if !audio_path.exists() {
            return Err(ReferenceParseError::FileNotFound(audio_path));
        }
        if transcript.is_empty() {
            return Err(ReferenceParseError::EmptyTranscript);
        }

        Ok(Self {
            audio_path,
            transcript,
        })
    }
}
