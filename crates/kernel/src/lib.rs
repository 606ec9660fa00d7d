//! dsaudit_kernel
//!
//! Shared machinery (component C8): canonical JSON + SHA-256 hashing,
//! atomic IO, gzip-JSONL shard writer, path safety, a token-bucket rate
//! limiter, structured logging setup, and checkpoint/resume primitives.
//!
//! Every other crate in this workspace depends on this one and nothing
//! here depends back on them.

pub mod atomic;
pub mod checkpoint;
pub mod logging;
pub mod net;
pub mod pathsafe;
pub mod ratelimit;
pub mod shard;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] CanonError),
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),
    #[error("rate limiter misconfigured: {0}")]
    RateLimiterConfig(String),
    #[error("archive entry rejected: {0}")]
    ArchiveEntry(String),
    #[error("archive exceeds size cap: {0} bytes")]
    ArchiveTooLarge(u64),
    #[error("address not globally routable: {0}")]
    PrivateAddress(std::net::IpAddr),
}

/// Serialize to canonical JSON bytes: keys sorted recursively, no
/// whitespace, UTF-8. Hashes in this codebase are always computed over
/// these bytes, never over pretty-printed or insertion-ordered JSON.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Return "sha256:<hex>" of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_bytes(&bytes))
}

/// Return "sha256:<hex>" of raw bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(digest))
}

/// sha256 of `text` after whitespace normalization (runs of ASCII
/// whitespace collapsed to a single space, leading/trailing trimmed).
/// This is the hash basis for `CanonicalRecord.hash.content_sha256`.
pub fn sha256_normalized_text(text: &str) -> String {
    sha256_bytes(normalize_whitespace(text).as_bytes())
}

pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}
