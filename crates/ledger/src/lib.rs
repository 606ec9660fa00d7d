//! dsaudit_ledger
//!
//! Generic append-only JSONL ledger (§3 "Ledger", §5 "append-only with
//! O_APPEND semantics"). Every stage that needs a ledger
//! (`yellow_passed.jsonl`, `yellow_pitched.jsonl`, `combined_index.jsonl`,
//! `combined_dedup_skipped.jsonl`, `red_rejected.jsonl`,
//! `acquire_summary_<run_id>.jsonl`) instantiates `LedgerAppender<Row>`
//! with its own row type rather than this crate owning every row schema.
//!
//! Ledgers are never rewritten; `LedgerAppender::open` always appends.
//! Unlike the teacher's `AuditAppender`, rows here are not hash-chained —
//! this spec's ledgers are independent append logs keyed by
//! `content_sha256`/`target_id`, not a tamper-evident event chain, so the
//! chaining machinery the teacher built for its audit trail has no
//! counterpart here and was not carried over (see DESIGN.md).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct LedgerAppender {
    file: File,
}

impl LedgerAppender {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Append one row. A single `write_all` call of a complete line
    /// (payload + `\n`) is what gives line-level atomicity under
    /// concurrent appenders per §5 ("each worker appends complete lines").
    pub fn append<T: Serialize>(&mut self, row: &T) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Read every row of a ledger file, skipping blank lines. Used by the
/// catalog builder (C7) to aggregate ledger summaries and by tests
/// asserting ledger contents.
pub fn read_ledger<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, LedgerError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(vec![]);
    }
    let f = File::open(path)?;
    let reader = BufReader::new(f);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}
