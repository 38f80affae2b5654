//! Text normalization and content hashing
//!
//! Normalization is shared by the response cache key and the keyword
//! fallback so both treat "I'm  FINE" and "i'm fine" as the same message.

use sha2::{Digest, Sha256};

/// Lowercase, trim, and collapse all runs of whitespace to a single space
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 of the normalized text, hex encoded
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}
