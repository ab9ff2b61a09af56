//! voxstudio: voice-prompt cache and inference backend dispatch.
//!
//! This crate sits between a voice cloning studio's REST layer and its
//! speech models. It selects the inference backend for the running host,
//! caches the expensive voice-prompt preprocessing step by content, and
//! reports the progress of long-running operations to observers.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod progress;
