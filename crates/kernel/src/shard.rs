//! Gzip-compressed JSONL shard writer (C8), shared by the YELLOW screener
//! (C5) and the merger (C6). Shards roll at a configured record count and
//! are finalized with an atomic rename so a partially-written shard never
//! looks complete to a reader; a `.part` suffix marks an in-progress shard
//! and is reset (truncated and restarted) on resume.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::KernelError;

/// Writes gzip-JSONL shards named `<prefix>_NNNNN.jsonl.gz` (5-digit,
/// zero-padded, in allocation order) under `dir`, rolling to a new shard
/// once `max_records_per_shard` records have been written to the current
/// one.
pub struct ShardWriter {
    dir: PathBuf,
    prefix: String,
    max_records_per_shard: usize,
    next_index: u32,
    current: Option<CurrentShard>,
}

struct CurrentShard {
    part_path: PathBuf,
    final_path: PathBuf,
    encoder: GzEncoder<BufWriter<File>>,
    record_count: usize,
}

impl ShardWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        max_records_per_shard: usize,
    ) -> Result<Self, KernelError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let next_index = next_free_index(&dir, &prefix.clone().into())?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
            max_records_per_shard: max_records_per_shard.max(1),
            next_index,
            current: None,
        })
    }

    fn shard_name(&self, idx: u32) -> String {
        format!("{}_{:05}.jsonl.gz", self.prefix, idx)
    }

    fn open_next_shard(&mut self) -> Result<(), KernelError> {
        let final_path = self.dir.join(self.shard_name(self.next_index));
        let part_path = final_path.with_extension("jsonl.gz.part");
        self.next_index += 1;
        let f = File::create(&part_path)?;
        let encoder = GzEncoder::new(BufWriter::new(f), Compression::default());
        self.current = Some(CurrentShard {
            part_path,
            final_path,
            encoder,
            record_count: 0,
        });
        Ok(())
    }

    /// Write one record as a JSON line; rolls to a new shard first if the
    /// current shard has reached its record cap. Returns the path of the
    /// shard (final, post-rename path) the record was written into and
    /// whether this call caused a roll, for callers that need to reference
    /// the shard path in a ledger row before the shard is closed.
    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<PathBuf, KernelError> {
        if self.current.is_none()
            || self.current.as_ref().unwrap().record_count >= self.max_records_per_shard
        {
            self.roll()?;
            self.open_next_shard()?;
        }
        let line = serde_json::to_vec(record).map_err(crate::CanonError::from)?;
        let cur = self.current.as_mut().expect("shard opened above");
        cur.encoder.write_all(&line)?;
        cur.encoder.write_all(b"\n")?;
        cur.record_count += 1;
        Ok(cur.final_path.clone())
    }

    /// Finalize the current shard (if any) with flush + atomic rename.
    pub fn roll(&mut self) -> Result<Option<PathBuf>, KernelError> {
        let Some(cur) = self.current.take() else {
            return Ok(None);
        };
        let CurrentShard {
            part_path,
            final_path,
            encoder,
            record_count,
        } = cur;
        if record_count == 0 {
            // Nothing was written; drop the empty .part instead of renaming it in.
            drop(encoder);
            let _ = std::fs::remove_file(&part_path);
            return Ok(None);
        }
        let mut writer = encoder.finish()?;
        writer.flush()?;
        drop(writer);
        std::fs::rename(&part_path, &final_path)?;
        Ok(Some(final_path))
    }

    /// Close out the writer, finalizing any open shard.
    pub fn finish(mut self) -> Result<(), KernelError> {
        self.roll()?;
        Ok(())
    }
}

/// Scan `dir` for existing `<prefix>_NNNNN.jsonl.gz` shards and any stale
/// `.part` shard, returning the next unused index. Stale `.part` files from
/// a prior crash are removed so a fresh shard starts at the same index.
fn next_free_index(dir: &Path, prefix: &str) -> std::io::Result<u32> {
    let mut max_seen: Option<u32> = None;
    if dir.exists() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&format!("{prefix}_")) {
                let digits = rest
                    .strip_suffix(".jsonl.gz.part")
                    .or_else(|| rest.strip_suffix(".jsonl.gz"));
                if let Some(digits) = digits {
                    if rest.ends_with(".part") {
                        let _ = std::fs::remove_file(entry.path());
                        continue;
                    }
                    if let Ok(n) = digits.parse::<u32>() {
                        max_seen = Some(max_seen.map_or(n, |m| m.max(n)));
                    }
                }
            }
        }
    }
    Ok(max_seen.map_or(0, |n| n + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn rolls_at_configured_record_count() {
        let dir = TempDir::new().unwrap();
        let mut w = ShardWriter::new(dir.path(), "combined", 2).unwrap();
        w.write_record(&json!({"n": 1})).unwrap();
        w.write_record(&json!({"n": 2})).unwrap();
        w.write_record(&json!({"n": 3})).unwrap();
        w.finish().unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["combined_00000.jsonl.gz", "combined_00001.jsonl.gz"]);
    }

    #[test]
    fn resume_continues_shard_numbering_and_drops_empty_part() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("combined_00000.jsonl.gz"), b"fake").unwrap();
        std::fs::write(dir.path().join("combined_00001.jsonl.gz.part"), b"stale").unwrap();
        let mut w = ShardWriter::new(dir.path(), "combined", 10).unwrap();
        w.write_record(&json!({"n": 1})).unwrap();
        w.finish().unwrap();
        assert!(dir.path().join("combined_00001.jsonl.gz").exists());
        assert!(!dir.path().join("combined_00001.jsonl.gz.part").exists());
    }
}
