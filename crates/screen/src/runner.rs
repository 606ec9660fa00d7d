//! Directory walk, shard writing, and ledger bookkeeping around the pure
//! canonicalization core in `lib.rs`. Grounded on the same producer/writer
//! shape the acquire runner uses: read inputs in a deterministic order,
//! hand each one to a pure function, record the outcome.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use dsaudit_kernel::shard::ShardWriter;
use dsaudit_ledger::LedgerAppender;
use dsaudit_model::{Bucket, LicensePool, QueueRow, RecordSource, SignoffRecord, Target, TargetId};
use dsaudit_policy::config::ScreeningConfig;

use crate::{
    canonicalize_record, signoff_gate, CanonicalizeOutcome, ScreenError, YellowPassedRow,
    YellowPitchSample, YellowPitchedRow, DEFAULT_PITCH_SAMPLE_CAP,
};

/// Evidence facts the screener needs per target but does not recompute:
/// the current evidence hash (for signoff staleness, §4.2) and the
/// source metadata stamped into every passed record.
pub struct TargetEvidenceContext {
    pub current_evidence_hash: String,
    pub url: Option<String>,
    pub retrieved_at_utc: String,
    pub content_type: Option<String>,
}

pub struct ScreenRunResult {
    pub passed: usize,
    pub pitched: usize,
}

/// Screen every YELLOW row in `rows` (non-YELLOW rows are ignored —
/// callers are expected to have already routed GREEN/RED rows elsewhere).
/// Rows are processed in sorted `target_id` order and, within a target,
/// input files in sorted path order (§4.5 "Determinism").
#[allow(clippy::too_many_arguments)]
pub fn run_screening(
    rows: &[QueueRow],
    targets_by_id: &HashMap<TargetId, Target>,
    raw_root: &Path,
    screened_yellow_root: &Path,
    ledger_root: &Path,
    pitches_root: &Path,
    screening: &ScreeningConfig,
    require_yellow_signoff: bool,
    max_records_per_shard: usize,
    signoffs_by_target: &HashMap<TargetId, SignoffRecord>,
    evidence_by_target: &HashMap<TargetId, TargetEvidenceContext>,
) -> Result<ScreenRunResult, ScreenError> {
    let mut sorted_rows: Vec<&QueueRow> = rows.iter().filter(|r| r.bucket == Bucket::Yellow).collect();
    sorted_rows.sort_by(|a, b| a.target_id.0.cmp(&b.target_id.0));

    let mut passed_ledger = LedgerAppender::open(ledger_root.join("yellow_passed.jsonl"))?;
    let mut pitched_ledger = LedgerAppender::open(ledger_root.join("yellow_pitched.jsonl"))?;
    let mut pitch_samples = LedgerAppender::open(pitches_root.join("yellow_pitch.jsonl"))?;

    let mut shard_writers: HashMap<LicensePool, ShardWriter> = HashMap::new();
    let mut sample_counts: HashMap<(String, String), usize> = HashMap::new();

    let mut passed = 0usize;
    let mut pitched = 0usize;

    for row in sorted_rows {
        let target = targets_by_id
            .get(&row.target_id)
            .unwrap_or_else(|| panic!("queue row references unknown target {}", row.target_id));
        let evidence = evidence_by_target
            .get(&row.target_id)
            .unwrap_or_else(|| panic!("no evidence context recorded for target {}", row.target_id));
        let signoff = signoffs_by_target.get(&row.target_id);

        if let Some(reason) = signoff_gate(require_yellow_signoff, target, signoff, &evidence.current_evidence_hash) {
            let sample_hash = dsaudit_kernel::sha256_bytes(reason.as_bytes());
            pitched_ledger.append(&YellowPitchedRow {
                target_id: row.target_id.0.clone(),
                record_id: None,
                reason: reason.to_string(),
                sample_hash,
            })?;
            pitched += 1;
            continue;
        }

        let require_record_license = screening.require_record_license;
        let target_allowlist = &target.yellow_screen.allowlist_record_licenses;
        let source_template = RecordSource {
            target_id: row.target_id.clone(),
            url: evidence.url.clone(),
            retrieved_at_utc: evidence.retrieved_at_utc.clone(),
            content_type: evidence.content_type.clone(),
            publisher: None,
        };

        let target_dir = raw_root.join(pool_dirname(row.license_pool)).join(&row.target_id.0);
        let files = sorted_jsonl_files(&target_dir)?;

        for (file_idx, file_path) in files.iter().enumerate() {
            for (line_idx, line) in read_lines(file_path)?.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record_id = format!("{}#{file_idx}:{line_idx}", row.target_id.0);

                let raw: serde_json::Value = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(_) => {
                        let sample_hash = dsaudit_kernel::sha256_bytes(line.as_bytes());
                        pitched_ledger.append(&YellowPitchedRow {
                            target_id: row.target_id.0.clone(),
                            record_id: Some(record_id),
                            reason: "invalid_json".into(),
                            sample_hash,
                        })?;
                        pitched += 1;
                        continue;
                    }
                };

                let outcome = canonicalize_record(
                    &raw,
                    &record_id,
                    row,
                    screening,
                    require_record_license,
                    target_allowlist,
                    source_template.clone(),
                );

                match outcome {
                    CanonicalizeOutcome::Passed(record) => {
                        if !shard_writers.contains_key(&row.license_pool) {
                            let writer = ShardWriter::new(
                                screened_yellow_root.join(pool_dirname(row.license_pool)).join("shards"),
                                "yellow_shard",
                                max_records_per_shard,
                            )?;
                            shard_writers.insert(row.license_pool, writer);
                        }
                        let writer = shard_writers.get_mut(&row.license_pool).expect("just inserted above");
                        let shard_path = writer.write_record(&record)?;
                        passed_ledger.append(&YellowPassedRow {
                            target_id: row.target_id.0.clone(),
                            record_id: record.record_id.clone(),
                            shard: shard_path.to_string_lossy().to_string(),
                            content_sha256: record.hash.content_sha256.clone(),
                        })?;
                        passed += 1;
                    }
                    CanonicalizeOutcome::Pitched { record_id, reason, payload } => {
                        let sample_hash = dsaudit_kernel::sha256_normalized_text(&payload.to_string());
                        pitched_ledger.append(&YellowPitchedRow {
                            target_id: row.target_id.0.clone(),
                            record_id: record_id.clone(),
                            reason: reason.clone(),
                            sample_hash,
                        })?;
                        let key = (row.target_id.0.clone(), reason.clone());
                        let count = sample_counts.entry(key).or_insert(0);
                        if *count < DEFAULT_PITCH_SAMPLE_CAP {
                            pitch_samples.append(&YellowPitchSample {
                                target_id: row.target_id.0.clone(),
                                record_id,
                                reason,
                                payload,
                            })?;
                            *count += 1;
                        }
                        pitched += 1;
                    }
                }
            }
        }
    }

    for writer in shard_writers.into_values() {
        writer.finish()?;
    }

    Ok(ScreenRunResult { passed, pitched })
}

fn pool_dirname(pool: LicensePool) -> &'static str {
    match pool {
        LicensePool::Permissive => "permissive",
        LicensePool::Copyleft => "copyleft",
        LicensePool::Quarantine => "quarantine",
    }
}

fn sorted_jsonl_files(dir: &Path) -> Result<Vec<PathBuf>, ScreenError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut out = vec![];
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        if name.ends_with(".jsonl") || name.ends_with(".jsonl.gz") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn read_lines(path: &Path) -> Result<Vec<String>, ScreenError> {
    let f = File::open(path)?;
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        let reader = BufReader::new(GzDecoder::new(f));
        Ok(reader.lines().collect::<std::io::Result<Vec<_>>>()?)
    } else {
        let reader = BufReader::new(f);
        Ok(reader.lines().collect::<std::io::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsaudit_model::{DownloadSpec, LicenseEvidenceRef, LicenseProfile, RoutingSpec, YellowScreenSpec};
    use std::io::Write;
    use tempfile::TempDir;

    fn target(id: &str) -> Target {
        Target {
            id: TargetId(id.into()),
            enabled: true,
            license_profile: LicenseProfile::RecordLevel,
            license_evidence: LicenseEvidenceRef { spdx_hint: None, url: "https://example.com".into() },
            download: DownloadSpec::Http { urls: vec![], checksum_sha256: None, max_bytes: None },
            routing: RoutingSpec::default(),
            output: Default::default(),
            yellow_screen: YellowScreenSpec { allow_without_signoff: true, allowlist_record_licenses: vec![] },
        }
    }

    fn row(id: &str) -> QueueRow {
        QueueRow {
            target_id: TargetId(id.into()),
            bucket: Bucket::Yellow,
            license_profile: LicenseProfile::RecordLevel,
            license_pool: LicensePool::Quarantine,
            resolved_spdx: None,
            spdx_confidence: 0.0,
            restriction_hits: vec![],
            denylist_hits: vec![],
            routing: RoutingSpec::default(),
            download: DownloadSpec::Http { urls: vec![], checksum_sha256: None, max_bytes: None },
            manifest_dir: id.to_string(),
            evidence_ref: format!("manifests/{id}/license_evidence.json"),
            policy_snapshot_hash: "sha256:deadbeef".into(),
        }
    }

    fn screening() -> ScreeningConfig {
        ScreeningConfig {
            min_chars: 2,
            max_chars: 1000,
            text_field_candidates: vec!["text".into()],
            record_license_field_candidates: vec!["license".into()],
            require_record_license: false,
            allow_spdx: vec![],
            deny_phrases: vec![],
            spdx_confidence_threshold: 0.8,
        }
    }

    #[test]
    fn passes_valid_record_and_pitches_invalid_one_in_same_run() {
        let dir = TempDir::new().unwrap();
        let raw_root = dir.path().join("raw");
        let target_dir = raw_root.join("quarantine").join("t1");
        std::fs::create_dir_all(&target_dir).unwrap();
        let mut f = File::create(target_dir.join("part1.jsonl")).unwrap();
        writeln!(f, r#"{{"text": "hello world"}}"#).unwrap();
        writeln!(f, r#"{{"text": "x"}}"#).unwrap();

        let mut targets = HashMap::new();
        targets.insert(TargetId("t1".into()), target("t1"));
        let mut evidence = HashMap::new();
        evidence.insert(
            TargetId("t1".into()),
            TargetEvidenceContext {
                current_evidence_hash: "sha256:abc".into(),
                url: Some("https://example.com/data.jsonl".into()),
                retrieved_at_utc: "2026-01-01T00:00:00Z".into(),
                content_type: Some("application/jsonl".into()),
            },
        );

        let result = run_screening(
            &[row("t1")],
            &targets,
            &raw_root,
            &dir.path().join("screened_yellow"),
            &dir.path().join("ledger"),
            &dir.path().join("pitches"),
            &screening(),
            false,
            10,
            &HashMap::new(),
            &evidence,
        )
        .unwrap();

        assert_eq!(result.passed, 1);
        assert_eq!(result.pitched, 1);

        let shard_dir = dir.path().join("screened_yellow").join("quarantine").join("shards");
        assert!(std::fs::read_dir(&shard_dir).unwrap().count() >= 1);
    }

    #[test]
    fn target_pitched_whole_when_signoff_required_and_missing() {
        let dir = TempDir::new().unwrap();
        let raw_root = dir.path().join("raw");
        let target_dir = raw_root.join("quarantine").join("t1");
        std::fs::create_dir_all(&target_dir).unwrap();
        let mut f = File::create(target_dir.join("part1.jsonl")).unwrap();
        writeln!(f, r#"{{"text": "hello world"}}"#).unwrap();

        let mut t = target("t1");
        t.yellow_screen.allow_without_signoff = false;
        let mut targets = HashMap::new();
        targets.insert(TargetId("t1".into()), t);
        let mut evidence = HashMap::new();
        evidence.insert(
            TargetId("t1".into()),
            TargetEvidenceContext {
                current_evidence_hash: "sha256:abc".into(),
                url: None,
                retrieved_at_utc: "2026-01-01T00:00:00Z".into(),
                content_type: None,
            },
        );

        let result = run_screening(
            &[row("t1")],
            &targets,
            &raw_root,
            &dir.path().join("screened_yellow"),
            &dir.path().join("ledger"),
            &dir.path().join("pitches"),
            &screening(),
            true,
            10,
            &HashMap::new(),
            &evidence,
        )
        .unwrap();

        assert_eq!(result.passed, 0);
        assert_eq!(result.pitched, 1);
    }
}
