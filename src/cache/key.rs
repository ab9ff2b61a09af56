//! Cache key derivation.

use sha2::{Digest, Sha256};

use crate::backend::ModelVariant;

/// Derive the cache key for a voice prompt.
///
/// The digest covers, in order, the raw bytes of every reference sample, the
/// UTF-8 transcript and the model variant identifier. Sample order is
/// significant. The result is 64 lowercase hex characters.
///
/// Changing anything fed into the digest here orphans every existing disk
/// entry: old keys are never produced again and simply stop being hit.
pub fn derive_key<S: AsRef<[u8]>>(
    samples: &[S],
    reference_text: &str,
    variant: ModelVariant,
) -> String {
    let mut hasher = Sha256::new();
    for sample in samples {
        hasher.update(sample.as_ref());
    }
    hasher.update(reference_text.as_bytes());
    hasher.update(variant.as_str().as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Whether `key` has the shape of a derived key and is safe to use as a
/// file name.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_hexdigit())
}
