use sha2::{Digest, Sha256};

/// Generate the idempotency key for a posting.
///
/// The key is a SHA256 of `source_url|stable_part`, so the same posting from
/// the same feed always hashes to the same key, across processes and restarts.
/// Unlike content hashes, no normalization is applied: identifiers and links
/// are compared exactly as the normalizer produced them.
pub fn generate_dedupe_key(source_url: &str, stable_part: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hasher.update(b"|");
    hasher.update(stable_part.as_bytes());
    format!("{:x}", hasher.finalize())
}
