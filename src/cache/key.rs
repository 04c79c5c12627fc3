//! Deterministic cache key derivation.

use sha2::{Digest, Sha256};

/// Derives the cache key for an analysis result.
///
/// Key layout is `{analyzer_tag}:{sha256(source_path)[..16]}:{sha256(content)}`
/// in lowercase hex. The function is pure: identical inputs always yield an
/// identical key, so the same content analyzed by the same analyzer maps to
/// one key regardless of which call site computed it.
///
/// # Examples
///
/// ```
/// use integrations_dispatch::cache::generate_key;
///
/// let a = generate_key("src/main.rs", "fn main() {}", "security");
/// let b = generate_key("src/main.rs", "fn main() {}", "security");
/// assert_eq!(a, b);
/// assert!(a.starts_with("security:"));
/// ```
pub fn generate_key(source_path: &str, content: &str, analyzer_tag: &str) -> String {
    let path_hash = hex::encode(Sha256::digest(source_path.as_bytes()));
    let content_hash = hex::encode(Sha256::digest(content.as_bytes()));
    format!("{}:{}:{}", analyzer_tag, &path_hash[..16], content_hash)
}
