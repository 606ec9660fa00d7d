//! Evidence snapshot persistence (§3, §4.2): exactly one canonical
//! `license_evidence.<ext>` per target directory, with a JSON sidecar.
//! Writing a new snapshot renames every existing `license_evidence.*`
//! sibling to `license_evidence.prev_<n>.<ext>` before the new file lands,
//! so a canonical current file always exists and no prior version is
//! overwritten.

use std::fs;
use std::path::{Path, PathBuf};

use dsaudit_kernel::atomic::write_atomic;
use dsaudit_model::EvidenceSnapshot;

use crate::EvidenceError;

const SIDECAR_NAME: &str = "license_evidence.json";

/// Persist `raw` as the new canonical evidence file in `target_dir`,
/// rotating any existing `license_evidence.*` siblings out of the way
/// first, then write the sidecar describing `snapshot`.
pub fn write_snapshot(
    target_dir: &Path,
    ext: &str,
    raw: &[u8],
    snapshot: &EvidenceSnapshot,
) -> Result<(), EvidenceError> {
    fs::create_dir_all(target_dir)?;
    rotate_existing(target_dir)?;

    let canonical_path = target_dir.join(format!("license_evidence.{ext}"));
    write_atomic(&canonical_path, raw)?;

    let sidecar_bytes = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(target_dir.join(SIDECAR_NAME), &sidecar_bytes)?;
    Ok(())
}

/// Read back the current sidecar, if any, for offline/no-fetch reuse.
pub fn read_snapshot(target_dir: &Path) -> Result<Option<EvidenceSnapshot>, EvidenceError> {
    let path = target_dir.join(SIDECAR_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn rotate_existing(target_dir: &Path) -> Result<(), EvidenceError> {
    let mut canonical: Option<PathBuf> = None;
    let mut max_prev: i64 = -1;

    for entry in fs::read_dir(target_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == SIDECAR_NAME {
            continue;
        }
        if let Some(rest) = name.strip_prefix("license_evidence.prev_") {
            if let Some(n) = rest.split('.').next().and_then(|s| s.parse::<i64>().ok()) {
                max_prev = max_prev.max(n);
            }
            continue;
        }
        if name.starts_with("license_evidence.") && !name.ends_with(".part") {
            canonical = Some(entry.path());
        }
    }

    if let Some(old) = canonical {
        let ext = old
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let next = max_prev + 1;
        let rotated = target_dir.join(format!("license_evidence.prev_{next}.{ext}"));
        fs::rename(old, rotated)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(url: &str) -> EvidenceSnapshot {
        EvidenceSnapshot {
            content_type: "text/html".into(),
            sha256_raw_bytes: dsaudit_kernel::sha256_bytes(b"x"),
            sha256_normalized_text: dsaudit_kernel::sha256_normalized_text("x"),
            retrieved_at_utc: "2026-01-01T00:00:00Z".into(),
            url_final: url.into(),
            text_extraction_failed: false,
        }
    }

    #[test]
    fn first_write_creates_canonical_file_and_sidecar() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "html", b"<html></html>", &snapshot("https://a.example")).unwrap();
        assert!(dir.path().join("license_evidence.html").exists());
        assert!(dir.path().join(SIDECAR_NAME).exists());
    }

    #[test]
    fn second_write_rotates_previous_canonical_file() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "html", b"first", &snapshot("https://a.example")).unwrap();
        write_snapshot(dir.path(), "html", b"second", &snapshot("https://a.example")).unwrap();

        assert_eq!(fs::read(dir.path().join("license_evidence.html")).unwrap(), b"second");
        assert_eq!(fs::read(dir.path().join("license_evidence.prev_0.html")).unwrap(), b"first");
    }

    #[test]
    fn repeated_writes_do_not_collide_on_rotated_names() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "html", b"v0", &snapshot("https://a.example")).unwrap();
        write_snapshot(dir.path(), "html", b"v1", &snapshot("https://a.example")).unwrap();
        write_snapshot(dir.path(), "html", b"v2", &snapshot("https://a.example")).unwrap();

        assert!(dir.path().join("license_evidence.prev_0.html").exists());
        assert!(dir.path().join("license_evidence.prev_1.html").exists());
        assert_eq!(fs::read(dir.path().join("license_evidence.html")).unwrap(), b"v2");
    }

    #[test]
    fn read_snapshot_returns_none_when_absent() {
        let dir = TempDir::new().unwrap();
        assert!(read_snapshot(dir.path()).unwrap().is_none());
    }
}
