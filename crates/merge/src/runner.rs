//! Directory walk + dedupe + combined-shard writer (§4.6). Processes
//! GREEN shards before YELLOW shards within each pool, GREEN target
//! directories in sorted `target_id` order and YELLOW shard files in the
//! sorted filename order the screener already wrote them in — giving a
//! stable combined-shard sequence for a stable input set without having
//! to decompress and re-sort YELLOW's already-interleaved shards by
//! per-record `target_id` (see DESIGN.md).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use dsaudit_kernel::shard::ShardWriter;
use dsaudit_ledger::LedgerAppender;
use dsaudit_model::{CanonicalRecord, LicensePool};

use crate::{IndexEntry, MergeError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedIndexRow {
    pub content_sha256: String,
    pub combined_shard: String,
    pub target_id: String,
    pub license_pool: LicensePool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSkippedRow {
    pub content_sha256: String,
    pub skipped_shard: String,
    pub skipped_target_id: String,
    pub winning_shard: String,
    pub winning_target_id: String,
}

pub struct MergeRunResult {
    pub merged: usize,
    pub skipped: usize,
}

pub fn run_merge(
    green_root: &Path,
    screened_yellow_root: &Path,
    combined_root: &Path,
    index_root: &Path,
    ledger_root: &Path,
    max_records_per_shard: usize,
    cache_cap_per_bucket: usize,
) -> Result<MergeRunResult, MergeError> {
    let mut index = crate::DedupeIndex::new(index_root, cache_cap_per_bucket)?;
    let mut combined_index_ledger = LedgerAppender::open(ledger_root.join("combined_index.jsonl"))?;
    let mut dedup_skipped_ledger = LedgerAppender::open(ledger_root.join("combined_dedup_skipped.jsonl"))?;

    let mut merged = 0usize;
    let mut skipped = 0usize;

    for pool in [LicensePool::Permissive, LicensePool::Copyleft, LicensePool::Quarantine] {
        let pool_name = pool_dirname(pool);

        let mut input_files = sorted_green_shards(green_root, pool_name)?;
        input_files.extend(sorted_yellow_shards(screened_yellow_root, pool_name)?);

        let mut shard_writer: Option<ShardWriter> = None;

        for shard_path in &input_files {
            for (offset, record) in read_gz_jsonl::<CanonicalRecord>(shard_path)?.into_iter().enumerate() {
                let entry = IndexEntry {
                    content_sha256: record.hash.content_sha256.clone(),
                    shard_path: shard_path.to_string_lossy().to_string(),
                    record_offset: offset as u64,
                    source_target_id: record.source.target_id.0.clone(),
                    license_pool: pool,
                };

                match index.check_and_record(entry)? {
                    Some(winner) => {
                        dedup_skipped_ledger.append(&DedupSkippedRow {
                            content_sha256: record.hash.content_sha256.clone(),
                            skipped_shard: shard_path.to_string_lossy().to_string(),
                            skipped_target_id: record.source.target_id.0.clone(),
                            winning_shard: winner.shard_path,
                            winning_target_id: winner.source_target_id,
                        })?;
                        skipped += 1;
                    }
                    None => {
                        if shard_writer.is_none() {
                            shard_writer = Some(ShardWriter::new(
                                combined_root.join(pool_name).join("shards"),
                                "combined",
                                max_records_per_shard,
                            )?);
                        }
                        let writer = shard_writer.as_mut().expect("just set above");
                        let combined_path = writer.write_record(&record)?;
                        combined_index_ledger.append(&CombinedIndexRow {
                            content_sha256: record.hash.content_sha256.clone(),
                            combined_shard: combined_path.to_string_lossy().to_string(),
                            target_id: record.source.target_id.0.clone(),
                            license_pool: pool,
                        })?;
                        merged += 1;
                    }
                }
            }
        }

        if let Some(writer) = shard_writer {
            writer.finish()?;
        }
    }

    Ok(MergeRunResult { merged, skipped })
}

fn pool_dirname(pool: LicensePool) -> &'static str {
    match pool {
        LicensePool::Permissive => "permissive",
        LicensePool::Copyleft => "copyleft",
        LicensePool::Quarantine => "quarantine",
    }
}

fn sorted_green_shards(green_root: &Path, pool_name: &str) -> Result<Vec<PathBuf>, MergeError> {
    let pool_dir = green_root.join(pool_name);
    if !pool_dir.exists() {
        return Ok(vec![]);
    }
    let mut target_dirs: Vec<PathBuf> = std::fs::read_dir(&pool_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    target_dirs.sort();

    let mut out = vec![];
    for target_dir in target_dirs {
        let shards_dir = target_dir.join("shards");
        out.extend(sorted_gz_shards(&shards_dir)?);
    }
    Ok(out)
}

fn sorted_yellow_shards(screened_yellow_root: &Path, pool_name: &str) -> Result<Vec<PathBuf>, MergeError> {
    sorted_gz_shards(&screened_yellow_root.join(pool_name).join("shards"))
}

fn sorted_gz_shards(dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("gz"))
        .collect();
    out.sort();
    Ok(out)
}

fn read_gz_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, MergeError> {
    let f = File::open(path)?;
    let reader = BufReader::new(GzDecoder::new(f));
    let mut out = vec![];
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsaudit_model::{RecordHash, RecordLicense, RecordSource, RoutingSpec, TargetId};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn record(target_id: &str, text: &str) -> CanonicalRecord {
        CanonicalRecord {
            record_id: format!("{target_id}#0"),
            text: text.to_string(),
            license: RecordLicense { spdx: Some("MIT".into()), profile: dsaudit_model::LicenseProfile::Permissive },
            routing: RoutingSpec::default(),
            source: RecordSource {
                target_id: TargetId(target_id.into()),
                url: None,
                retrieved_at_utc: "2026-01-01T00:00:00Z".into(),
                content_type: None,
                publisher: None,
            },
            hash: RecordHash { content_sha256: dsaudit_kernel::sha256_normalized_text(text) },
            metadata: None,
        }
    }

    fn write_gz_shard(path: &Path, records: &[CanonicalRecord]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let f = File::create(path).unwrap();
        let mut enc = GzEncoder::new(f, Compression::default());
        for r in records {
            let mut line = serde_json::to_vec(r).unwrap();
            line.push(b'\n');
            enc.write_all(&line).unwrap();
        }
        enc.finish().unwrap();
    }

    #[test]
    fn dedups_matching_text_across_green_and_yellow() {
        let dir = TempDir::new().unwrap();
        let green_shard = dir
            .path()
            .join("raw/green/permissive/g1/shards/green_00000.jsonl.gz");
        write_gz_shard(&green_shard, &[record("g1", "Hello world")]);

        let yellow_shard = dir.path().join("screened_yellow/permissive/shards/yellow_shard_00000.jsonl.gz");
        write_gz_shard(&yellow_shard, &[record("y1", "Hello   world")]);

        let result = run_merge(
            &dir.path().join("raw/green"),
            &dir.path().join("screened_yellow"),
            &dir.path().join("combined"),
            &dir.path().join("index"),
            &dir.path().join("ledger"),
            10,
            1000,
        )
        .unwrap();

        assert_eq!(result.merged, 1);
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn distinct_records_are_both_merged() {
        let dir = TempDir::new().unwrap();
        let green_shard = dir.path().join("raw/green/permissive/g1/shards/green_00000.jsonl.gz");
        write_gz_shard(&green_shard, &[record("g1", "First unique record")]);
        let yellow_shard = dir.path().join("screened_yellow/permissive/shards/yellow_shard_00000.jsonl.gz");
        write_gz_shard(&yellow_shard, &[record("y1", "Second unique record")]);

        let result = run_merge(
            &dir.path().join("raw/green"),
            &dir.path().join("screened_yellow"),
            &dir.path().join("combined"),
            &dir.path().join("index"),
            &dir.path().join("ledger"),
            10,
            1000,
        )
        .unwrap();

        assert_eq!(result.merged, 2);
        assert_eq!(result.skipped, 0);
    }
}
