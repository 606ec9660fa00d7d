//! dsaudit_catalog
//!
//! Catalog builder (C7, §4.7): the last stage. Walks the stage roots and
//! every ledger the earlier stages wrote, and emits one atomically-written
//! `catalog.json` a reviewer can use to answer "what's in this corpus and
//! why" without re-running anything.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dsaudit_kernel::atomic::write_atomic;
use dsaudit_ledger::read_ledger;
use dsaudit_model::LicensePool;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernel error: {0}")]
    Kernel(#[from] dsaudit_kernel::KernelError),
    #[error("ledger error: {0}")]
    Ledger(#[from] dsaudit_ledger::LedgerError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub yellow_passed: u64,
    pub yellow_pitched_by_reason: HashMap<String, u64>,
    pub dedupe_skipped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTarget {
    pub target_id: String,
    pub stage: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub stage_counts: HashMap<String, StageCounts>,
    pub pool_counts: HashMap<LicensePool, StageCounts>,
    pub ledger_summary: LedgerSummary,
    pub failed_targets: Vec<FailedTarget>,
    pub policy_snapshot_hash: String,
    pub run_id: String,
    pub written_at_utc: String,
    pub tool_version: String,
}

/// Roots the catalog builder reads from; mirrors `globals.*_root` in the
/// targets config (§7).
pub struct CatalogRoots<'a> {
    pub raw_root: &'a Path,
    pub screened_yellow_root: &'a Path,
    pub combined_root: &'a Path,
    pub ledger_root: &'a Path,
    pub manifests_root: &'a Path,
}

const POOLS: [LicensePool; 3] = [LicensePool::Permissive, LicensePool::Copyleft, LicensePool::Quarantine];

fn pool_dirname(pool: LicensePool) -> &'static str {
    match pool {
        LicensePool::Permissive => "permissive",
        LicensePool::Copyleft => "copyleft",
        LicensePool::Quarantine => "quarantine",
    }
}

/// Recursively sum file count and byte size under `dir`. Missing
/// directories (a stage that produced nothing) count as zero rather than
/// erroring, since an empty pool is a valid outcome.
fn walk_counts(dir: &Path) -> std::io::Result<StageCounts> {
    let mut counts = StageCounts::default();
    if !dir.exists() {
        return Ok(counts);
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in std::fs::read_dir(&d)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if meta.is_dir() {
                stack.push(path);
            } else {
                counts.files += 1;
                counts.bytes += meta.len();
            }
        }
    }
    Ok(counts)
}

/// Build the full `Catalog` by walking `roots` and the policy/run context
/// the orchestrator already knows (`policy_snapshot_hash`, `run_id`).
pub fn build_catalog(
    roots: &CatalogRoots,
    policy_snapshot_hash: &str,
    run_id: &str,
    written_at_utc: &str,
) -> Result<Catalog, CatalogError> {
    let mut stage_counts = HashMap::new();
    stage_counts.insert("raw".to_string(), walk_counts(roots.raw_root)?);
    stage_counts.insert("screened_yellow".to_string(), walk_counts(roots.screened_yellow_root)?);
    stage_counts.insert("combined".to_string(), walk_counts(roots.combined_root)?);

    let mut pool_counts = HashMap::new();
    for pool in POOLS {
        let name = pool_dirname(pool);
        let mut combined = StageCounts::default();
        for bucket_dir in ["green", "yellow", "red"] {
            let c = walk_counts(&roots.raw_root.join(bucket_dir).join(name))?;
            combined.files += c.files;
            combined.bytes += c.bytes;
        }
        let c = walk_counts(&roots.screened_yellow_root.join(name))?;
        combined.files += c.files;
        combined.bytes += c.bytes;
        let c = walk_counts(&roots.combined_root.join(name))?;
        combined.files += c.files;
        combined.bytes += c.bytes;
        pool_counts.insert(pool, combined);
    }

    let ledger_summary = build_ledger_summary(roots.ledger_root, roots.combined_root, roots.screened_yellow_root)?;
    let failed_targets = collect_failed_targets(roots.manifests_root)?;

    Ok(Catalog {
        stage_counts,
        pool_counts,
        ledger_summary,
        failed_targets,
        policy_snapshot_hash: policy_snapshot_hash.to_string(),
        run_id: run_id.to_string(),
        written_at_utc: written_at_utc.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn build_ledger_summary(
    ledger_root: &Path,
    _combined_root: &Path,
    _screened_yellow_root: &Path,
) -> Result<LedgerSummary, CatalogError> {
    let passed: Vec<dsaudit_screen::YellowPassedRow> = read_ledger(ledger_root.join("yellow_passed.jsonl"))?;
    let pitched: Vec<dsaudit_screen::YellowPitchedRow> = read_ledger(ledger_root.join("yellow_pitched.jsonl"))?;
    let dedupe_skipped: Vec<dsaudit_merge::runner::DedupSkippedRow> =
        read_ledger(ledger_root.join("combined_dedup_skipped.jsonl"))?;

    let mut yellow_pitched_by_reason: HashMap<String, u64> = HashMap::new();
    for row in &pitched {
        *yellow_pitched_by_reason.entry(row.reason.clone()).or_insert(0) += 1;
    }

    Ok(LedgerSummary {
        yellow_passed: passed.len() as u64,
        yellow_pitched_by_reason,
        dedupe_skipped: dedupe_skipped.len() as u64,
    })
}

#[derive(Debug, Deserialize)]
struct AcquireOutcomeStatus {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AcquireDoneManifest {
    target_id: String,
    outcome: AcquireOutcomeStatus,
}

/// Walk every `<manifests_root>/<target>/acquire_done.json` (skipping the
/// internal `.checkpoints` directory) and report targets whose acquisition
/// outcome was `failed` (§4.7 `failed_targets`).
fn collect_failed_targets(manifests_root: &Path) -> Result<Vec<FailedTarget>, CatalogError> {
    let mut out = Vec::new();
    if !manifests_root.exists() {
        return Ok(out);
    }
    let mut target_dirs: Vec<_> = std::fs::read_dir(manifests_root)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && p.file_name().map(|n| n != ".checkpoints").unwrap_or(false))
        .collect();
    target_dirs.sort();

    for dir in target_dirs {
        let manifest_path = dir.join("acquire_done.json");
        if !manifest_path.exists() {
            continue;
        }
        let bytes = std::fs::read(&manifest_path)?;
        let manifest: AcquireDoneManifest = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if manifest.outcome.status == "failed" {
            out.push(FailedTarget {
                target_id: manifest.target_id,
                stage: "acquire".to_string(),
                error: manifest.outcome.reason.unwrap_or_default(),
            });
        }
    }
    Ok(out)
}

/// Write `catalog.json` atomically under `catalogs_root`.
pub fn write_catalog(catalog: &Catalog, catalogs_root: &Path) -> Result<(), CatalogError> {
    let bytes = serde_json::to_vec_pretty(catalog)?;
    write_atomic(catalogs_root.join("catalog.json"), &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn walk_counts_sums_nested_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/f1"), b"12345").unwrap();
        std::fs::write(dir.path().join("a/b/f2"), b"123").unwrap();

        let counts = walk_counts(dir.path()).unwrap();
        assert_eq!(counts.files, 2);
        assert_eq!(counts.bytes, 8);
    }

    #[test]
    fn walk_counts_missing_dir_is_zero() {
        let dir = TempDir::new().unwrap();
        let counts = walk_counts(&dir.path().join("nope")).unwrap();
        assert_eq!(counts.files, 0);
        assert_eq!(counts.bytes, 0);
    }

    #[test]
    fn collect_failed_targets_finds_only_failed_outcomes() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("t1")).unwrap();
        std::fs::write(
            dir.path().join("t1/acquire_done.json"),
            r#"{"target_id":"t1","strategy":"http","outcome":{"status":"ok","files":[],"bytes_total":0}}"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("t2")).unwrap();
        std::fs::write(
            dir.path().join("t2/acquire_done.json"),
            r#"{"target_id":"t2","strategy":"http","outcome":{"status":"failed","reason":"connection reset"}}"#,
        )
        .unwrap();

        let failed = collect_failed_targets(dir.path()).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].target_id, "t2");
        assert_eq!(failed[0].error, "connection reset");
    }

    #[test]
    fn build_catalog_end_to_end_with_empty_roots() {
        let dir = TempDir::new().unwrap();
        let roots = CatalogRoots {
            raw_root: &dir.path().join("raw"),
            screened_yellow_root: &dir.path().join("screened_yellow"),
            combined_root: &dir.path().join("combined"),
            ledger_root: &dir.path().join("ledger"),
            manifests_root: &dir.path().join("manifests"),
        };
        let catalog = build_catalog(&roots, "sha256:deadbeef", "run-1", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(catalog.ledger_summary.yellow_passed, 0);
        assert!(catalog.failed_targets.is_empty());
        assert_eq!(catalog.run_id, "run-1");
    }
}
