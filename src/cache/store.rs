//! Two-tier voice prompt store.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use super::key::is_valid_key;
use crate::backend::{ModelVariant, PromptPayload};

const ENTRY_EXTENSION: &str = "prompt";

/// Errors from the disk tier.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cache encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A cached voice prompt. Never mutated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: PromptPayload,
    pub model_variant: ModelVariant,
    pub created_at: DateTime<Utc>,
}

/// Cache size information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    /// False when the disk tier could not be opened.
    pub persistent: bool,
}

/// On-disk representation of an entry.
#[derive(Serialize, Deserialize)]
struct DiskEnvelope {
    model_variant: ModelVariant,
    created_at: DateTime<Utc>,
    /// Base64 of the prompt bytes
    payload: String,
}

/// Process-lifetime map from key to entry.
#[derive(Default)]
pub struct MemoryTier {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn insert(&self, key: &str, entry: CacheEntry) {
        self.entries.write().insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove everything, returning the keys that were present.
    pub fn clear(&self) -> Vec<String> {
        self.entries.write().drain().map(|(key, _)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Content-addressed files, one per key, named `<key>.prompt`.
pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    /// Open (creating if needed) a cache directory and check it is writable.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        NamedTempFile::new_in(&dir).map_err(|e| CacheError::io(&dir, e))?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    /// Read an entry. Missing and unparseable files are both misses.
    pub fn read(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let envelope: DiskEnvelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unreadable cache entry, treating as miss");
                return Ok(None);
            }
        };

        let payload = match BASE64.decode(envelope.payload.as_bytes()) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Corrupt cache payload, treating as miss");
                return Ok(None);
            }
        };

        Ok(Some(CacheEntry {
            payload: PromptPayload::new(payload),
            model_variant: envelope.model_variant,
            created_at: envelope.created_at,
        }))
    }

    /// Durably write an entry: temp file, fsync, atomic rename.
    pub fn write(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let envelope = DiskEnvelope {
            model_variant: entry.model_variant,
            created_at: entry.created_at,
            payload: BASE64.encode(entry.payload.as_bytes()),
        };
        let json = serde_json::to_vec(&envelope)?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        tmp.write_all(&json)
            .map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| CacheError::io(tmp.path(), e))?;

        let path = self.path_for(key);
        tmp.persist(&path)
            .map_err(|e| CacheError::io(&path, e.error))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut paths = Vec::new();

        for entry in fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| CacheError::io(&self.dir, e))?;
            let path = entry.path();

            if path.is_file() && path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                paths.push(path);
            }
        }

        Ok(paths)
    }

    /// Keys of every entry file, including ones from older key schemes.
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .entry_paths()?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect())
    }

    /// Delete every entry file, returning the removed keys.
    pub fn clear(&self) -> Result<Vec<String>, CacheError> {
        let mut removed = Vec::new();
        for path in self.entry_paths()? {
            fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                removed.push(stem.to_string());
            }
        }
        Ok(removed)
    }

    /// Number of entry files and their total size in bytes.
    pub fn usage(&self) -> Result<(usize, u64), CacheError> {
        let paths = self.entry_paths()?;
        let mut bytes = 0;
        for path in &paths {
            bytes += fs::metadata(path)
                .map_err(|e| CacheError::io(path, e))?
                .len();
        }
        Ok((paths.len(), bytes))
    }
}

/// Memory tier in front of an optional disk tier.
///
/// Lookups check memory first, then disk; a disk hit is copied into memory.
/// Writes go to both. When the disk tier is missing or a disk write fails,
/// entries still live in memory for the rest of the process.
pub struct PromptCache {
    memory: MemoryTier,
    disk: Option<DiskTier>,
}

impl PromptCache {
    /// Open a cache persisted under `dir`, degrading to memory-only if the
    /// directory is unusable.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let disk = match DiskTier::open(&dir) {
            Ok(disk) => Some(disk),
            Err(e) => {
                warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Voice prompt cache directory unusable, caching in memory only"
                );
                None
            }
        };

        Self {
            memory: MemoryTier::new(),
            disk,
        }
    }

    /// A cache with no disk tier.
    pub fn memory_only() -> Self {
        Self {
            memory: MemoryTier::new(),
            disk: None,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.disk.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.disk.as_ref().map(DiskTier::dir)
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key) {
            debug!(key, "Voice prompt found in memory cache");
            return Some(entry);
        }

        if !is_valid_key(key) {
            return None;
        }
        let disk = self.disk.as_ref()?;

        match disk.read(key) {
            Ok(Some(entry)) => {
                debug!(key, "Voice prompt found in disk cache");
                self.memory.insert(key, entry.clone());
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read voice prompt cache entry");
                None
            }
        }
    }

    /// Store a prompt in both tiers.
    ///
    /// An `Err` means only the disk write failed; the entry is already in
    /// memory and later `get` calls in this process will find it.
    pub fn put(
        &self,
        key: &str,
        payload: PromptPayload,
        model_variant: ModelVariant,
    ) -> Result<(), CacheError> {
        if !is_valid_key(key) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }

        let entry = CacheEntry {
            payload,
            model_variant,
            created_at: Utc::now(),
        };
        self.memory.insert(key, entry.clone());

        if let Some(disk) = &self.disk {
            disk.write(key, &entry)?;
        }
        Ok(())
    }

    /// Remove one entry from both tiers.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let in_memory = self.memory.remove(key);
        let on_disk = match &self.disk {
            Some(disk) if is_valid_key(key) => disk.remove(key)?,
            _ => false,
        };
        Ok(in_memory || on_disk)
    }

    /// Remove every entry from both tiers, returning how many distinct keys
    /// were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed: HashSet<String> = self.memory.clear().into_iter().collect();
        if let Some(disk) = &self.disk {
            removed.extend(disk.clear()?);
        }
        Ok(removed.len())
    }

    pub fn stats(&self) -> CacheStats {
        let (disk_entries, disk_bytes) = match &self.disk {
            Some(disk) => disk.usage().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to measure disk cache");
                (0, 0)
            }),
            None => (0, 0),
        };

        CacheStats {
            memory_entries: self.memory.len(),
            disk_entries,
            disk_bytes,
            persistent: self.is_persistent(),
        }
    }
}
