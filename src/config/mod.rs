//! Process configuration: data directory, backend override, server
//! endpoints and limits.

mod settings;

pub use settings::{
    DEFAULT_ACCELERATED_URL, DEFAULT_MAX_TEXT_LEN, DEFAULT_PORTABLE_URL, DEFAULT_TASK_RETENTION,
    Settings, SettingsError, default_data_dir,
};
