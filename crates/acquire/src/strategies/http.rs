//! HTTP acquisition strategy (§4.4 "HTTP specifics"): streaming download
//! with `Range`/`If-Range` resume, retry with jittered exponential
//! backoff, a per-host token-bucket rate limiter, a streaming SHA-256
//! over the response body, and per-target byte-budget enforcement. The
//! retry/backoff shape mirrors a bulk downloader's resumable-fetch loop;
//! unlike a blocking `Read` loop, the response body is read as an async
//! byte stream.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use reqwest::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, IF_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use dsaudit_model::{DownloadSpec, QueueRow, Target};

use crate::{AcquireContext, AcquiredFile, Strategy, StrategyOutcome};

const MAX_ATTEMPTS: u8 = 4;

pub struct HttpStrategy {
    client: Client,
}

impl HttpStrategy {
    pub fn new() -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client builds with static config");
        Self { client }
    }
}

impl Default for HttpStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for HttpStrategy {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn acquire(&self, _target: &Target, row: &QueueRow, output_dir: &Path, ctx: &AcquireContext) -> StrategyOutcome {
        let (urls, checksum_sha256, per_target_max) = match &row.download {
            DownloadSpec::Http { urls, checksum_sha256, max_bytes } => (urls, checksum_sha256, *max_bytes),
            other => {
                return StrategyOutcome::Failed {
                    reason: format!("http strategy invoked with non-http download spec {other:?}"),
                }
            }
        };

        if urls.is_empty() {
            return StrategyOutcome::Failed { reason: "handler_returned_no_results".into() };
        }

        let budget = per_target_max
            .map(|m| m.min(ctx.max_bytes_per_target))
            .unwrap_or(ctx.max_bytes_per_target);

        let mut files = Vec::new();
        let mut bytes_total: u64 = 0;

        for url in urls {
            if let Err(reason) = validate_routable(url).await {
                return StrategyOutcome::Failed { reason };
            }

            let file_name = file_name_for_url(url);
            let dest_path = output_dir.join(&file_name);
            let host = reqwest::Url::parse(url).ok().and_then(|u| u.host_str().map(|s| s.to_string()));

            if let Some(host) = &host {
                ctx.limiter_for_host(host).await.acquire(1.0).await;
            }

            let remaining = budget.saturating_sub(bytes_total);
            match self.download_one(url, &dest_path, remaining, ctx.allow_huge_downloads).await {
                Ok(DownloadStep::Done(file)) => {
                    bytes_total += file.bytes;
                    if urls.len() == 1 {
                        if let Some(expected) = checksum_sha256 {
                            if !expected.eq_ignore_ascii_case(&file.sha256) {
                                return StrategyOutcome::Failed {
                                    reason: format!("checksum mismatch: expected {expected}, got {}", file.sha256),
                                };
                            }
                        }
                    }
                    files.push(file);
                }
                Ok(DownloadStep::Oversized) => return StrategyOutcome::Oversized { bytes_total },
                Err(reason) => return StrategyOutcome::Failed { reason },
            }
        }

        StrategyOutcome::Ok { files, bytes_total }
    }
}

enum DownloadStep {
    Done(AcquiredFile),
    Oversized,
}

impl HttpStrategy {
    async fn download_one(
        &self,
        url: &str,
        dest_path: &Path,
        budget_remaining: u64,
        allow_huge: bool,
    ) -> Result<DownloadStep, String> {
        let part_path = part_path_for(dest_path);
        let mut last_err: Option<String> = None;

        for attempt in 0..MAX_ATTEMPTS {
            let resume_from = tokio::fs::metadata(&part_path).await.map(|m| m.len()).unwrap_or(0);

            let mut req = self.client.get(url);
            if resume_from > 0 {
                req = req
                    .header(RANGE, HeaderValue::from_str(&format!("bytes={resume_from}-")).unwrap())
                    .header(IF_RANGE, HeaderValue::from_static("*"));
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        last_err = Some(format!("server error {status}"));
                        backoff(attempt).await;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(format!("unexpected status {status} fetching {url}"));
                    }

                    let content_type = resp
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    if crate::is_dangerous_content_type(&content_type) {
                        return Err(format!("rejected dangerous content-type {content_type}"));
                    }

                    let resuming = status == StatusCode::PARTIAL_CONTENT && resume_from > 0;
                    let start_offset = if resuming { resume_from } else { 0 };

                    let declared_len = resp.headers().get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|s| s.parse::<u64>().ok());
                    if let Some(len) = declared_len {
                        if start_offset + len > budget_remaining && !allow_huge {
                            return Ok(DownloadStep::Oversized);
                        }
                    }

                    match stream_to_file(resp, &part_path, start_offset, budget_remaining, allow_huge).await {
                        Ok(StreamResult::Oversized) => return Ok(DownloadStep::Oversized),
                        Ok(StreamResult::Written { bytes, sha256 }) => {
                            if let Some(parent) = dest_path.parent() {
                                tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
                            }
                            tokio::fs::rename(&part_path, dest_path).await.map_err(|e| e.to_string())?;
                            return Ok(DownloadStep::Done(AcquiredFile {
                                path: dest_path.to_string_lossy().to_string(),
                                sha256,
                                bytes,
                            }));
                        }
                        Err(e) => {
                            last_err = Some(e);
                            backoff(attempt).await;
                        }
                    }
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    backoff(attempt).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| format!("download failed after {MAX_ATTEMPTS} attempts")))
    }
}

enum StreamResult {
    Written { bytes: u64, sha256: String },
    Oversized,
}

async fn stream_to_file(
    resp: reqwest::Response,
    part_path: &Path,
    start_offset: u64,
    budget_remaining: u64,
    allow_huge: bool,
) -> Result<StreamResult, String> {
    if let Some(parent) = part_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
    }

    let mut file = if start_offset > 0 {
        let mut f = tokio::fs::OpenOptions::new()
            .write(true)
            .open(part_path)
            .await
            .map_err(|e| e.to_string())?;
        f.seek(std::io::SeekFrom::Start(start_offset)).await.map_err(|e| e.to_string())?;
        f
    } else {
        File::create(part_path).await.map_err(|e| e.to_string())?
    };

    // Resuming a partial file means re-hashing what is already on disk,
    // since the hasher has no persisted state across process restarts.
    let mut hasher = Sha256::new();
    if start_offset > 0 {
        let existing = tokio::fs::read(part_path).await.map_err(|e| e.to_string())?;
        hasher.update(&existing[..start_offset as usize]);
    }

    let mut downloaded = start_offset;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        downloaded += chunk.len() as u64;
        if downloaded > budget_remaining && !allow_huge {
            return Ok(StreamResult::Oversized);
        }
        hasher.update(&chunk);
        file.write_all(&chunk).await.map_err(|e| e.to_string())?;
    }
    file.flush().await.map_err(|e| e.to_string())?;

    Ok(StreamResult::Written { bytes: downloaded, sha256: hex::encode(hasher.finalize()) })
}

async fn backoff(attempt: u8) {
    let base_ms = 250u64 * 2u64.pow(attempt as u32);
    let jitter_ms = rand::thread_rng().gen_range(0..100);
    tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
}

fn part_path_for(dest: &Path) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    dest.with_file_name(format!("{name}.part"))
}

fn file_name_for_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(|s| s.to_string())))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download.bin".to_string())
}

async fn validate_routable(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|_| format!("invalid url {url}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme in {url}"));
    }
    let host = parsed.host_str().ok_or_else(|| format!("missing host in {url}"))?.to_string();
    let port = parsed.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| format!("dns resolution failed for {host}: {e}"))?;

    let mut any = false;
    for addr in addrs {
        any = true;
        dsaudit_kernel::net::assert_globally_routable(addr.ip()).map_err(|_| format!("rejected private address for {host}"))?;
    }
    if !any {
        return Err(format!("{host} did not resolve to any address"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_for_url_uses_last_path_segment() {
        assert_eq!(file_name_for_url("https://example.com/data/corpus.jsonl.gz"), "corpus.jsonl.gz");
    }

    #[test]
    fn file_name_for_url_falls_back_when_path_is_empty() {
        assert_eq!(file_name_for_url("https://example.com/"), "download.bin");
    }

    #[tokio::test]
    async fn validate_routable_rejects_loopback() {
        let err = validate_routable("http://127.0.0.1:9/x").await.unwrap_err();
        assert!(err.contains("private address"));
    }
}
