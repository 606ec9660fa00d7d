//! Merger (C6, §4.6): streams canonical GREEN + screened YELLOW records
//! through a bounded-memory dedupe index into `combined/{pool}/shards/`.
//!
//! The dedupe index is bucketed by the first byte of `content_sha256` (256
//! buckets) so no single in-memory structure has to hold every hash seen
//! across a run — each bucket's on-disk file
//! (`index/<2-hex-prefix>.idx`) is the authoritative record of what has
//! been merged, ever; the in-memory cache per bucket is a bounded
//! fast-path over the common case of a hash recurring within the same run.

pub mod green;
pub mod runner;

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernel error: {0}")]
    Kernel(#[from] dsaudit_kernel::KernelError),
    #[error("ledger error: {0}")]
    Ledger(#[from] dsaudit_ledger::LedgerError),
}

/// One entry in a bucket's on-disk index: `content_sha256 → shard_path,
/// record_offset, source_target_id, license_pool` (§4.6 "Dedupe key").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub content_sha256: String,
    pub shard_path: String,
    pub record_offset: u64,
    pub source_target_id: String,
    pub license_pool: dsaudit_model::LicensePool,
}

struct BucketCache {
    entries: HashMap<String, IndexEntry>,
    order: VecDeque<String>,
    cap: usize,
}

impl BucketCache {
    fn new(cap: usize) -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new(), cap: cap.max(1) }
    }

    fn get(&self, hash: &str) -> Option<&IndexEntry> {
        self.entries.get(hash)
    }

    fn insert(&mut self, entry: IndexEntry) {
        if self.entries.len() >= self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(entry.content_sha256.clone());
        self.entries.insert(entry.content_sha256.clone(), entry);
    }
}

/// Bounded-memory, bucketed dedupe index (§4.6). Bucket files are
/// append-only JSONL; a lookup that misses the in-memory cache falls back
/// to scanning the bucket file, which is how collisions from a prior run
/// (never loaded into memory) are still caught.
pub struct DedupeIndex {
    index_dir: PathBuf,
    cache: HashMap<u8, BucketCache>,
    cache_cap_per_bucket: usize,
}

impl DedupeIndex {
    pub fn new(index_dir: impl Into<PathBuf>, cache_cap_per_bucket: usize) -> Result<Self, MergeError> {
        let index_dir = index_dir.into();
        std::fs::create_dir_all(&index_dir)?;
        Ok(Self { index_dir, cache: HashMap::new(), cache_cap_per_bucket })
    }

    fn bucket_for(content_sha256: &str) -> u8 {
        let hex = content_sha256.strip_prefix("sha256:").unwrap_or(content_sha256);
        u8::from_str_radix(&hex[0..2.min(hex.len())], 16).unwrap_or(0)
    }

    fn bucket_path(&self, bucket: u8) -> PathBuf {
        self.index_dir.join(format!("{bucket:02x}.idx"))
    }

    fn find_on_disk(&self, bucket: u8, hash: &str) -> Result<Option<IndexEntry>, MergeError> {
        let path = self.bucket_path(bucket);
        if !path.exists() {
            return Ok(None);
        }
        let f = File::open(&path)?;
        for line in BufReader::new(f).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: IndexEntry = serde_json::from_str(&line)?;
            if entry.content_sha256 == hash {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn append_to_disk(&self, bucket: u8, entry: &IndexEntry) -> Result<(), MergeError> {
        let path = self.bucket_path(bucket);
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        f.write_all(&line)?;
        f.flush()?;
        Ok(())
    }

    /// Look up `entry.content_sha256`. If already indexed (this run or a
    /// prior one), returns the winning entry and records nothing new. If
    /// new, appends it to the bucket's on-disk index and returns `None`.
    pub fn check_and_record(&mut self, entry: IndexEntry) -> Result<Option<IndexEntry>, MergeError> {
        let bucket = Self::bucket_for(&entry.content_sha256);

        if let Some(cached) = self.cache.get(&bucket).and_then(|c| c.get(&entry.content_sha256)) {
            return Ok(Some(cached.clone()));
        }
        if let Some(existing) = self.find_on_disk(bucket, &entry.content_sha256)? {
            return Ok(Some(existing));
        }

        self.append_to_disk(bucket, &entry)?;
        self.cache
            .entry(bucket)
            .or_insert_with(|| BucketCache::new(self.cache_cap_per_bucket))
            .insert(entry);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsaudit_model::LicensePool;
    use tempfile::TempDir;

    fn entry(hash: &str, target_id: &str) -> IndexEntry {
        IndexEntry {
            content_sha256: hash.to_string(),
            shard_path: "combined/permissive/shards/combined_00000.jsonl.gz".into(),
            record_offset: 0,
            source_target_id: target_id.to_string(),
            license_pool: LicensePool::Permissive,
        }
    }

    #[test]
    fn first_write_wins_and_second_is_reported_as_duplicate() {
        let dir = TempDir::new().unwrap();
        let mut idx = DedupeIndex::new(dir.path(), 1000).unwrap();

        let first = idx.check_and_record(entry("sha256:aabbcc", "t1")).unwrap();
        assert!(first.is_none());

        let second = idx.check_and_record(entry("sha256:aabbcc", "t2")).unwrap();
        let winner = second.unwrap();
        assert_eq!(winner.source_target_id, "t1");
    }

    #[test]
    fn distinct_hashes_in_different_buckets_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let mut idx = DedupeIndex::new(dir.path(), 1000).unwrap();
        assert!(idx.check_and_record(entry("sha256:aa0011", "t1")).unwrap().is_none());
        assert!(idx.check_and_record(entry("sha256:bb0011", "t2")).unwrap().is_none());
    }

    #[test]
    fn duplicate_survives_cache_eviction_via_disk_fallback() {
        let dir = TempDir::new().unwrap();
        let mut idx = DedupeIndex::new(dir.path(), 1).unwrap();
        assert!(idx.check_and_record(entry("sha256:aa0001", "t1")).unwrap().is_none());
        // Evicts aa0001 from the bucket cache.
        assert!(idx.check_and_record(entry("sha256:aa0002", "t2")).unwrap().is_none());
        // Still caught via the on-disk bucket file.
        let winner = idx.check_and_record(entry("sha256:aa0001", "t3")).unwrap().unwrap();
        assert_eq!(winner.source_target_id, "t1");
    }
}
