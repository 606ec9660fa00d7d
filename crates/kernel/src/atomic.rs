//! Atomic writer: every final artifact (manifests, ledger snapshots,
//! catalogs, shard rolls, evidence sidecars) is written via `write_atomic`
//! so a crash mid-write never corrupts the final path — at worst a
//! `<path>.part` is left behind for the next run to reclaim.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::KernelError;

pub fn write_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), KernelError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let part_path = part_path_for(path);
    {
        let mut f = File::create(&part_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&part_path, path)?;
    Ok(())
}

/// `path.part` with a hyphenated suffix so concurrent writers to the same
/// final path (which should not happen, but defensively) don't clobber
/// each other's temp file before the rename.
fn part_path_for(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}.part"))
}

/// Remove any stale `.part` file left next to `path` by a prior crash.
/// Call this before a writer that reopens `path` for a fresh atomic write.
pub fn reclaim_part(path: impl AsRef<Path>) -> std::io::Result<()> {
    let part = part_path_for(path.as_ref());
    if part.exists() {
        fs::remove_file(part)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_leaves_no_part_on_success() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("out.json");
        write_atomic(&p, b"{\"a\":1}").unwrap();
        assert!(p.exists());
        assert!(!part_path_for(&p).exists());
        assert_eq!(fs::read(&p).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn reclaim_part_removes_stale_temp_file() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("out.json");
        fs::write(part_path_for(&p), b"partial").unwrap();
        reclaim_part(&p).unwrap();
        assert!(!part_path_for(&p).exists());
    }
}
