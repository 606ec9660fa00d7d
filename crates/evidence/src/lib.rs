//! dsaudit_evidence
//!
//! Evidence fetcher (C2): fetches a target's declared license-evidence
//! URL, guards every hop against SSRF, hashes the raw bytes and a
//! whitespace-normalized text extraction, and persists exactly one
//! canonical snapshot per target (§3, §4.2). No policy, no bucketing —
//! that is the classifier's (C3) job; this crate only produces the
//! `EvidenceSnapshot` the classifier reads.

pub mod extract;
pub mod store;

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use dsaudit_kernel::KernelError;
use dsaudit_model::EvidenceSnapshot;

const MAX_REDIRECTS: u8 = 8;
const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;
const MAX_ATTEMPTS: u8 = 3;

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("dns resolution failed for {host}: {source}")]
    Dns { host: String, source: std::io::Error },
    #[error("host {0} did not resolve to any address")]
    NoResolvedAddress(String),
    #[error("rejected by ssrf guard: {0}")]
    PrivateAddress(IpAddr),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("too many redirects fetching {0}")]
    TooManyRedirects(String),
    #[error("redirect response missing Location header")]
    MissingLocation,
    #[error("response body exceeds {0} byte cap")]
    BodyTooLarge(u64),
    #[error("server returned {0}")]
    BadStatus(StatusCode),
    #[error("no fetch permitted (offline mode) and no prior evidence snapshot exists")]
    OfflineNoSnapshot,
}

pub struct EvidenceClient {
    client: Client,
}

pub struct FetchedEvidence {
    pub url_final: String,
    pub content_type: String,
    pub raw_bytes: Vec<u8>,
}

impl Default for EvidenceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EvidenceClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with static config");
        Self { client }
    }

    /// Fetch `url`, following redirects manually (bounded by
    /// `MAX_REDIRECTS`) and re-validating the resolved address against the
    /// SSRF guard before every connection attempt, including each hop.
    pub async fn fetch(&self, url: &str) -> Result<FetchedEvidence, EvidenceError> {
        let mut current = url.to_string();
        for _ in 0..MAX_REDIRECTS {
            validate_url_routable(&current).await?;
            match self.try_once(&current).await? {
                Step::Done(fetched) => return Ok(fetched),
                Step::Redirect(next) => current = next,
            }
        }
        Err(EvidenceError::TooManyRedirects(url.to_string()))
    }

    async fn try_once(&self, url: &str) -> Result<Step, EvidenceError> {
        let mut last_err: Option<EvidenceError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_redirection() {
                        let location = resp
                            .headers()
                            .get(reqwest::header::LOCATION)
                            .and_then(|v| v.to_str().ok())
                            .ok_or(EvidenceError::MissingLocation)?;
                        let next = resolve_location(url, location);
                        return Ok(Step::Redirect(next));
                    }
                    if status.is_server_error() {
                        last_err = Some(EvidenceError::BadStatus(status));
                        backoff(attempt).await;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(EvidenceError::BadStatus(status));
                    }
                    let content_type = resp
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let url_final = resp.url().to_string();
                    let bytes = read_bounded(resp).await?;
                    return Ok(Step::Done(FetchedEvidence {
                        url_final,
                        content_type,
                        raw_bytes: bytes,
                    }));
                }
                Err(e) => {
                    last_err = Some(EvidenceError::Http(e));
                    backoff(attempt).await;
                }
            }
        }
        Err(last_err.unwrap_or(EvidenceError::BadStatus(StatusCode::INTERNAL_SERVER_ERROR)))
    }
}

enum Step {
    Done(FetchedEvidence),
    Redirect(String),
}

async fn backoff(attempt: u8) {
    let millis = 200u64 * 2u64.pow(attempt as u32);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

fn resolve_location(base: &str, location: &str) -> String {
    reqwest::Url::parse(base)
        .and_then(|b| b.join(location))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_string())
}

async fn read_bounded(resp: reqwest::Response) -> Result<Vec<u8>, EvidenceError> {
    if let Some(len) = resp.content_length() {
        if len > MAX_BODY_BYTES {
            return Err(EvidenceError::BodyTooLarge(MAX_BODY_BYTES));
        }
    }
    let bytes = resp.bytes().await?;
    if bytes.len() as u64 > MAX_BODY_BYTES {
        return Err(EvidenceError::BodyTooLarge(MAX_BODY_BYTES));
    }
    Ok(bytes.to_vec())
}

/// Resolve `url`'s host and reject it (and every redirect hop's host) if
/// none of the resolved addresses are globally routable.
async fn validate_url_routable(url: &str) -> Result<(), EvidenceError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| EvidenceError::UnsupportedScheme(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(EvidenceError::UnsupportedScheme(other.to_string())),
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| EvidenceError::UnsupportedScheme(url.to_string()))?
        .to_string();
    let port = parsed.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| EvidenceError::Dns { host: host.clone(), source: e })?;

    let mut any = false;
    for addr in addrs {
        any = true;
        dsaudit_kernel::net::assert_globally_routable(addr.ip())
            .map_err(|_| EvidenceError::PrivateAddress(addr.ip()))?;
    }
    if !any {
        return Err(EvidenceError::NoResolvedAddress(host));
    }
    Ok(())
}

/// Map a response content-type to a filesystem-safe extension for the
/// canonical `license_evidence.<ext>` file.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let base = content_type.split(';').next().unwrap_or("").trim().to_lowercase();
    match base.as_str() {
        "text/html" | "application/xhtml+xml" => "html",
        "text/plain" => "txt",
        "text/markdown" => "md",
        "application/json" => "json",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

/// Fetch (or, in offline mode, reuse) the evidence snapshot for
/// `target_dir` and persist it as the new canonical snapshot. When
/// `offline` is true and no prior snapshot exists, returns
/// `EvidenceError::OfflineNoSnapshot`, which the classifier (C3) maps to
/// `reason="evidence_missing_offline"` and a forced YELLOW bucket.
pub async fn fetch_and_store(
    client: &EvidenceClient,
    target_dir: &Path,
    url: &str,
    offline: bool,
    retrieved_at_utc: &str,
) -> Result<EvidenceSnapshot, EvidenceError> {
    if offline {
        return store::read_snapshot(target_dir)?.ok_or(EvidenceError::OfflineNoSnapshot);
    }

    let fetched = client.fetch(url).await?;
    let ext = extension_for_content_type(&fetched.content_type);
    let sha256_raw_bytes = dsaudit_kernel::sha256_bytes(&fetched.raw_bytes);

    let (sha256_normalized_text, text_extraction_failed) =
        match extract::extract_text(&fetched.content_type, &fetched.raw_bytes) {
            Some(text) => (dsaudit_kernel::sha256_normalized_text(&text), false),
            None => (sha256_raw_bytes.clone(), true),
        };

    let snapshot = EvidenceSnapshot {
        content_type: fetched.content_type,
        sha256_raw_bytes,
        sha256_normalized_text,
        retrieved_at_utc: retrieved_at_utc.to_string(),
        url_final: fetched.url_final,
        text_extraction_failed,
    };

    store::write_snapshot(target_dir, ext, &fetched.raw_bytes, &snapshot)?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_mapping_covers_known_types() {
        assert_eq!(extension_for_content_type("text/html; charset=utf-8"), "html");
        assert_eq!(extension_for_content_type("application/json"), "json");
        assert_eq!(extension_for_content_type("application/octet-stream"), "bin");
    }

    #[tokio::test]
    async fn fetch_rejects_private_host_before_connecting() {
        let client = EvidenceClient::new();
        let err = client.fetch("http://127.0.0.1:9/evidence").await.unwrap_err();
        assert!(matches!(err, EvidenceError::PrivateAddress(_)));
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_scheme() {
        let client = EvidenceClient::new();
        let err = client.fetch("ftp://example.com/evidence").await.unwrap_err();
        assert!(matches!(err, EvidenceError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn offline_mode_without_prior_snapshot_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = EvidenceClient::new();
        let err = fetch_and_store(&client, dir.path(), "http://example.com", true, "2026-01-01T00:00:00Z")
            .await
            .unwrap_err();
        assert!(matches!(err, EvidenceError::OfflineNoSnapshot));
    }
}
