//! `git` acquisition strategy (§4.4): a thin wrapper around the system
//! `git` binary. This is a "bulk" strategy in §4.4's sense — it has no
//! per-file streaming budget, so the byte budget is enforced as a
//! post-check after the clone completes, and an oversized checkout is a
//! hard abort unless `--allow-huge-downloads`.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use dsaudit_model::{DownloadSpec, QueueRow, Target};

use crate::{AcquireContext, AcquiredFile, Strategy, StrategyOutcome};

pub struct GitStrategy;

impl GitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for GitStrategy {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn acquire(&self, _target: &Target, row: &QueueRow, output_dir: &Path, ctx: &AcquireContext) -> StrategyOutcome {
        let (repo_url, git_ref) = match &row.download {
            DownloadSpec::Git { repo_url, git_ref } => (repo_url.clone(), git_ref.clone()),
            other => {
                return StrategyOutcome::Failed {
                    reason: format!("git strategy invoked with non-git download spec {other:?}"),
                }
            }
        };

        if let Err(reason) = validate_repo_url_routable(&repo_url).await {
            return StrategyOutcome::Failed { reason };
        }

        if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
            return StrategyOutcome::Failed { reason: e.to_string() };
        }

        let mut cmd = Command::new("git");
        cmd.arg("clone").arg("--depth").arg("1");
        if let Some(r) = &git_ref {
            cmd.arg("--branch").arg(r);
        }
        cmd.arg(&repo_url).arg(output_dir);

        let output = match cmd.output().await {
            Ok(o) => o,
            Err(e) => return StrategyOutcome::Failed { reason: format!("spawning git: {e}") },
        };
        if !output.status.success() {
            return StrategyOutcome::Failed {
                reason: format!("git clone failed: {}", String::from_utf8_lossy(&output.stderr)),
            };
        }

        match dir_size_and_hashes(output_dir).await {
            Ok((bytes_total, files)) => {
                if bytes_total > ctx.max_bytes_per_target && !ctx.allow_huge_downloads {
                    StrategyOutcome::Oversized { bytes_total }
                } else {
                    StrategyOutcome::Ok { files, bytes_total }
                }
            }
            Err(e) => StrategyOutcome::Failed { reason: e },
        }
    }
}

async fn validate_repo_url_routable(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|_| format!("invalid repo url {url}"))?;
    if !matches!(parsed.scheme(), "http" | "https" | "git" | "ssh") {
        return Err(format!("unsupported scheme in {url}"));
    }
    if matches!(parsed.scheme(), "http" | "https") {
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
    }
    Ok(())
}

async fn dir_size_and_hashes(root: &Path) -> Result<(u64, Vec<AcquiredFile>), String> {
    let mut stack = vec![root.to_path_buf()];
    let mut total = 0u64;
    let mut files = Vec::new();

    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| e.to_string())?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
            let path = entry.path();
            if path.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            let meta = entry.metadata().await.map_err(|e| e.to_string())?;
            if meta.is_dir() {
                stack.push(path);
            } else {
                let bytes = tokio::fs::read(&path).await.map_err(|e| e.to_string())?;
                let sha256 = dsaudit_kernel::sha256_bytes(&bytes);
                total += bytes.len() as u64;
                files.push(AcquiredFile { path: path.to_string_lossy().to_string(), sha256, bytes: bytes.len() as u64 });
            }
        }
    }
    Ok((total, files))
}
