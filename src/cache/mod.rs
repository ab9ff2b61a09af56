//! Content-addressed voice prompt cache.
//!
//! Computing a voice prompt from reference audio is the expensive step of every
//! generation. Prompts are cached under a key derived from everything that
//! affects them (sample bytes, transcript, model variant), first in memory and
//! then on disk as `<key>.prompt` files.
//!
//! Entries written under an older key scheme are never looked up again after
//! the scheme changes. They stay on disk as orphans until the cache is
//! cleared; no migration is attempted.

mod key;
mod store;

pub use key::{derive_key, is_valid_key};
pub use store::{CacheEntry, CacheError, CacheStats, DiskTier, MemoryTier, PromptCache};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ModelVariant, PromptPayload};
    use std::fs;
    use tempfile::TempDir;

    fn sample() -> Vec<u8> {
        b"RIFF\x24\x00\x00\x00WAVEfmt five seconds of speech".to_vec()
    }

    // ===========================================
    // Key derivation tests
    // ===========================================

    #[test]
    fn test_key_differs_by_model_variant() {
        let samples = vec![sample()];
        let large = derive_key(&samples, "This is a test reference text.", ModelVariant::Large);
        let small = derive_key(&samples, "This is a test reference text.", ModelVariant::Small);

        assert_ne!(large, small);
    }

    #[test]
    fn test_key_is_deterministic() {
        let samples = vec![sample()];
        let first = derive_key(&samples, "Hello world", ModelVariant::Large);
        let second = derive_key(&samples.clone(), "Hello world", ModelVariant::Large);

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(is_valid_key(&first));
    }

    #[test]
    fn test_key_is_sample_order_sensitive() {
        let a = b"first sample".to_vec();
        let b = b"second sample".to_vec();

        let forward = derive_key(&[a.clone(), b.clone()], "text", ModelVariant::Large);
        let reversed = derive_key(&[b, a], "text", ModelVariant::Large);

        assert_ne!(forward, reversed);
    }

    #[test]
    fn test_key_differs_by_text_and_audio() {
        let base = derive_key(&[sample()], "Hello world", ModelVariant::Large);

        assert_ne!(base, derive_key(&[sample()], "Hello world!", ModelVariant::Large));
        assert_ne!(
            base,
            derive_key(&[b"other audio".to_vec()], "Hello world", ModelVariant::Large)
        );
    }

    #[test]
    fn test_key_accepts_empty_inputs() {
        let no_samples: [Vec<u8>; 0] = [];
        let key = derive_key(&no_samples, "", ModelVariant::Large);

        assert!(is_valid_key(&key));
        assert_ne!(key, derive_key(&no_samples, "", ModelVariant::Small));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("../escape"));
        assert!(!is_valid_key("abc.prompt"));
        assert!(is_valid_key("0123abcdef"));
    }

    // ===========================================
    // Tier tests
    // ===========================================

    fn entry(bytes: &[u8]) -> CacheEntry {
        CacheEntry {
            payload: PromptPayload::new(bytes.to_vec()),
            model_variant: ModelVariant::Large,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_memory_tier_basics() {
        let tier = MemoryTier::new();
        assert!(tier.is_empty());

        tier.insert("aa", entry(b"one"));
        tier.insert("bb", entry(b"two"));
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.get("aa").unwrap().payload.as_bytes(), b"one");

        assert!(tier.remove("aa"));
        assert!(!tier.remove("aa"));
        assert_eq!(tier.clear(), vec!["bb".to_string()]);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_disk_tier_lists_orphaned_keys() {
        let temp_dir = TempDir::new().unwrap();
        let tier = DiskTier::open(temp_dir.path()).unwrap();
        let key = derive_key(&[sample()], "current", ModelVariant::Large);

        tier.write(&key, &entry(b"prompt")).unwrap();
        fs::write(tier.path_for("5d41402abc4b2a76b9719d911017c592"), b"legacy").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut keys = tier.keys().unwrap();
        keys.sort();
        let mut expected = vec![key.clone(), "5d41402abc4b2a76b9719d911017c592".to_string()];
        expected.sort();
        assert_eq!(keys, expected);

        assert!(tier.read("5d41402abc4b2a76b9719d911017c592").unwrap().is_none());
        assert_eq!(tier.read(&key).unwrap().unwrap().payload.as_bytes(), b"prompt");
    }

    // ===========================================
    // PromptCache tests
    // ===========================================

    #[test]
    fn test_put_then_get_returns_identical_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PromptCache::open(temp_dir.path());
        let key = derive_key(&[sample()], "Hello world", ModelVariant::Large);
        let payload = PromptPayload::new(vec![0u8, 255, 7, 42, 0]);

        cache.put(&key, payload.clone(), ModelVariant::Large).unwrap();

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.payload.as_bytes(), payload.as_bytes());
        assert_eq!(entry.model_variant, ModelVariant::Large);
    }

    #[test]
    fn test_disk_entry_survives_new_process() {
        let temp_dir = TempDir::new().unwrap();
        let key = derive_key(&[sample()], "Hello world", ModelVariant::Small);

        {
            let cache = PromptCache::open(temp_dir.path());
            cache
                .put(&key, PromptPayload::new(b"prompt".to_vec()), ModelVariant::Small)
                .unwrap();
        }

        let reopened = PromptCache::open(temp_dir.path());
        assert_eq!(reopened.stats().memory_entries, 0);

        let entry = reopened.get(&key).unwrap();
        assert_eq!(entry.payload.as_bytes(), b"prompt");
        assert_eq!(entry.model_variant, ModelVariant::Small);
        // Disk hit populates the memory tier.
        assert_eq!(reopened.stats().memory_entries, 1);
    }

    #[test]
    fn test_disk_file_is_named_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PromptCache::open(temp_dir.path());
        let key = derive_key(&[sample()], "named", ModelVariant::Large);

        cache
            .put(&key, PromptPayload::new(b"x".to_vec()), ModelVariant::Large)
            .unwrap();

        assert!(temp_dir.path().join(format!("{key}.prompt")).is_file());
        assert_eq!(cache.stats().disk_entries, 1);
    }

    #[test]
    fn test_miss_for_unknown_key() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PromptCache::open(temp_dir.path());

        assert!(cache.get(&derive_key(&[sample()], "nope", ModelVariant::Large)).is_none());
        assert!(cache.get("../../etc/passwd").is_none());
    }

    #[test]
    fn test_old_format_entry_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        // 32-char key and non-JSON body, as written by an older scheme.
        let old_key = "5d41402abc4b2a76b9719d911017c592";
        fs::write(
            temp_dir.path().join(format!("{old_key}.prompt")),
            b"\x80\x02legacy tensor blob",
        )
        .unwrap();

        let cache = PromptCache::open(temp_dir.path());
        assert!(cache.get(old_key).is_none());
        // Still counted as an orphan on disk.
        assert_eq!(cache.stats().disk_entries, 1);
    }

    #[test]
    fn test_disk_write_failure_keeps_memory_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("cache");
        let cache = PromptCache::open(&cache_dir);
        assert!(cache.is_persistent());

        // Replace the directory with a plain file so every write fails.
        fs::remove_dir_all(&cache_dir).unwrap();
        fs::write(&cache_dir, b"not a directory").unwrap();

        let key = derive_key(&[sample()], "Hello world", ModelVariant::Large);
        let result = cache.put(&key, PromptPayload::new(b"prompt".to_vec()), ModelVariant::Large);

        assert!(matches!(result, Err(CacheError::Io { .. })));
        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.payload.as_bytes(), b"prompt");
    }

    #[test]
    fn test_unusable_directory_degrades_to_memory_only() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();

        let cache = PromptCache::open(blocker.join("cache"));
        assert!(!cache.is_persistent());
        assert_eq!(cache.dir(), None);

        let key = derive_key(&[sample()], "Hello world", ModelVariant::Large);
        cache
            .put(&key, PromptPayload::new(b"prompt".to_vec()), ModelVariant::Large)
            .unwrap();
        assert!(cache.get(&key).is_some());
        assert!(!cache.stats().persistent);
    }

    #[test]
    fn test_put_rejects_invalid_key() {
        let cache = PromptCache::memory_only();
        let result = cache.put("../evil", PromptPayload::new(b"x".to_vec()), ModelVariant::Large);

        assert!(matches!(result, Err(CacheError::InvalidKey(_))));
        assert!(cache.get("../evil").is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PromptCache::open(temp_dir.path());
        let first = derive_key(&[sample()], "one", ModelVariant::Large);
        let second = derive_key(&[sample()], "two", ModelVariant::Large);

        cache
            .put(&first, PromptPayload::new(b"1".to_vec()), ModelVariant::Large)
            .unwrap();
        cache
            .put(&second, PromptPayload::new(b"2".to_vec()), ModelVariant::Large)
            .unwrap();

        assert!(cache.remove(&first).unwrap());
        assert!(!cache.remove(&first).unwrap());
        assert!(cache.get(&first).is_none());

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.get(&second).is_none());

        let stats = cache.stats();
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.disk_entries, 0);
    }

    #[test]
    fn test_stats_counts_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PromptCache::open(temp_dir.path());
        let key = derive_key(&[sample()], "bytes", ModelVariant::Large);

        cache
            .put(&key, PromptPayload::new(vec![9u8; 128]), ModelVariant::Large)
            .unwrap();

        let stats = cache.stats();
        assert_eq!(stats.memory_entries, 1);
        assert_eq!(stats.disk_entries, 1);
        assert!(stats.disk_bytes > 128);
        assert!(stats.persistent);
    }
}
