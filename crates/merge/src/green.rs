//! GREEN canonicalization: the merger's inputs are "canonical GREEN
//! shards ... or its canonicalization output" (§4.6) but no other
//! component produces that output, since GREEN targets carry no pitch
//! rules (they are already compliance-cleared at classify time). This
//! module turns whatever JSONL the acquire stage downloaded for a GREEN
//! target into `CanonicalRecord` shards the same way the YELLOW screener
//! does field selection and hashing, minus any pitch/signoff logic —
//! a record that can't be canonicalized is skipped, not pitched, since
//! GREEN has no pitch ledger.
//!
//! Non-JSONL GREEN downloads (archives, HF dataset snapshots) are out of
//! scope here per §4.5's note that those formats are canonicalized inside
//! their acquisition strategy; none of the strategies implemented in this
//! tree do that yet, so such targets simply contribute zero shard files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use dsaudit_kernel::shard::ShardWriter;
use dsaudit_model::{CanonicalRecord, QueueRow, RecordHash, RecordLicense, RecordSource, RoutingSpec};
use dsaudit_policy::config::ScreeningConfig;
use dsaudit_screen::select_field;

use crate::MergeError;

/// Canonicalize every raw JSONL file under `target_dir` for one GREEN
/// queue row, writing `green_NNNNN.jsonl.gz` shards into `target_dir`'s
/// sibling `shards/` directory. Returns the number of records written.
pub fn canonicalize_green_target(
    target_dir: &Path,
    row: &QueueRow,
    screening: &ScreeningConfig,
    retrieved_at_utc: &str,
    content_type: Option<&str>,
    url: Option<&str>,
    max_records_per_shard: usize,
) -> Result<usize, MergeError> {
    let files = sorted_jsonl_files(target_dir)?;
    if files.is_empty() {
        return Ok(0);
    }

    let mut writer = ShardWriter::new(target_dir.join("shards"), "green", max_records_per_shard)?;
    let mut written = 0usize;

    for (file_idx, file_path) in files.iter().enumerate() {
        let f = File::open(file_path)?;
        for (line_idx, line) in BufReader::new(f).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let raw: serde_json::Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let Some(text) = select_field(&raw, &screening.text_field_candidates) else {
                continue;
            };
            let len = text.chars().count();
            if len < screening.min_chars || len > screening.max_chars {
                continue;
            }

            let record_license = select_field(&raw, &screening.record_license_field_candidates);
            let record_id = format!("{}#{file_idx}:{line_idx}", row.target_id.0);
            let content_sha256 = dsaudit_kernel::sha256_normalized_text(&text);

            let record = CanonicalRecord {
                record_id,
                text,
                license: RecordLicense { spdx: record_license, profile: row.license_profile },
                routing: merge_routing(raw.get("routing"), &row.routing),
                source: RecordSource {
                    target_id: row.target_id.clone(),
                    url: url.map(|s| s.to_string()),
                    retrieved_at_utc: retrieved_at_utc.to_string(),
                    content_type: content_type.map(|s| s.to_string()),
                    publisher: None,
                },
                hash: RecordHash { content_sha256 },
                metadata: raw.get("metadata").cloned(),
            };
            writer.write_record(&record)?;
            written += 1;
        }
    }
    writer.finish()?;
    Ok(written)
}

fn merge_routing(raw_routing: Option<&serde_json::Value>, fallback: &RoutingSpec) -> RoutingSpec {
    let Some(raw_routing) = raw_routing else {
        return fallback.clone();
    };
    let parsed: RoutingSpec = serde_json::from_value(raw_routing.clone()).unwrap_or_default();
    RoutingSpec {
        subject: parsed.subject.or_else(|| fallback.subject.clone()),
        domain: parsed.domain.or_else(|| fallback.domain.clone()),
        category: parsed.category.or_else(|| fallback.category.clone()),
        granularity: parsed.granularity.or_else(|| fallback.granularity.clone()),
    }
}

fn sorted_jsonl_files(dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut out = vec![];
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            if name.ends_with(".jsonl") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsaudit_model::{Bucket, DownloadSpec, LicensePool, LicenseProfile, TargetId};
    use std::io::Write;
    use tempfile::TempDir;

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

    fn row() -> QueueRow {
        QueueRow {
            target_id: TargetId("g1".into()),
            bucket: Bucket::Green,
            license_profile: LicenseProfile::Permissive,
            license_pool: LicensePool::Permissive,
            resolved_spdx: Some("MIT".into()),
            spdx_confidence: 0.95,
            restriction_hits: vec![],
            denylist_hits: vec![],
            routing: RoutingSpec::default(),
            download: DownloadSpec::Http { urls: vec![], checksum_sha256: None, max_bytes: None },
            manifest_dir: "g1".into(),
            evidence_ref: "manifests/g1/license_evidence.json".into(),
            policy_snapshot_hash: "sha256:deadbeef".into(),
        }
    }

    #[test]
    fn canonicalizes_valid_lines_and_skips_unusable_ones() {
        let dir = TempDir::new().unwrap();
        let mut f = File::create(dir.path().join("part1.jsonl")).unwrap();
        writeln!(f, r#"{{"text": "a valid green record"}}"#).unwrap();
        writeln!(f, r#"{{"other": "no text field"}}"#).unwrap();

        let written = canonicalize_green_target(dir.path(), &row(), &screening(), "2026-01-01T00:00:00Z", None, None, 10).unwrap();
        assert_eq!(written, 1);
        assert!(dir.path().join("shards").read_dir().unwrap().count() >= 1);
    }

    #[test]
    fn target_with_no_jsonl_files_writes_no_shards() {
        let dir = TempDir::new().unwrap();
        let written = canonicalize_green_target(dir.path(), &row(), &screening(), "2026-01-01T00:00:00Z", None, None, 10).unwrap();
        assert_eq!(written, 0);
        assert!(!dir.path().join("shards").exists());
    }
}
