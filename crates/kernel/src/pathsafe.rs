//! Path safety (C8): traversal rejection for configured roots, archive
//! entry containment for extraction, and filename sanitization for
//! target-derived directory/file names.

use std::path::{Component, Path, PathBuf};

use crate::KernelError;

/// Resolve `candidate` (which may be relative to `root` or already
/// absolute) and reject it if it would land outside `root` once
/// canonicalized. `root` itself need not exist yet only for the purpose of
/// lexical containment checks that don't require canonicalization (archive
/// entries, most callers); existing-directory callers should canonicalize
/// both sides first.
pub fn ensure_under_root(root: &Path, candidate: &Path) -> Result<PathBuf, KernelError> {
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let mut normalized = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::ParentDir => {
                return Err(KernelError::PathTraversal(format!(
                    "parent-dir component in {}",
                    joined.display()
                )));
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    if !normalized.starts_with(root) {
        return Err(KernelError::PathTraversal(format!(
            "{} escapes root {}",
            normalized.display(),
            root.display()
        )));
    }
    Ok(normalized)
}

/// Archive-entry path containment: the entry name as stored in the archive
/// (zip/tar) must not contain `..`, must not be absolute, and once joined
/// under `dest` must stay under `dest`. Used by every archive strategy in
/// the acquisition runtime before writing an extracted entry to disk.
pub fn sanitize_extract_path(dest: &Path, entry_name: &str) -> Result<PathBuf, KernelError> {
    let entry_path = Path::new(entry_name);
    if entry_path.is_absolute() {
        return Err(KernelError::ArchiveEntry(format!(
            "absolute entry path rejected: {entry_name}"
        )));
    }
    for comp in entry_path.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(KernelError::ArchiveEntry(format!(
                "parent-dir entry path rejected: {entry_name}"
            )));
        }
    }
    let joined = dest.join(entry_path);
    let dest_canon = dest
        .canonicalize()
        .map_err(KernelError::Io)?;
    let parent = joined.parent().unwrap_or(dest);
    std::fs::create_dir_all(parent).map_err(KernelError::Io)?;
    let parent_canon = parent.canonicalize().map_err(KernelError::Io)?;
    if !parent_canon.starts_with(&dest_canon) {
        return Err(KernelError::ArchiveEntry(format!(
            "entry escapes destination: {entry_name}"
        )));
    }
    Ok(joined)
}

const RESERVED_WINDOWS_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Normalize a target- or record-derived string into a filesystem-safe
/// filename: strips directory separators and control bytes, avoids
/// reserved device names, and truncates long names while preserving the
/// extension.
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0'..='\u{1f}' | '\u{7f}' => '_',
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        cleaned = "_".to_string();
    }
    let upper = cleaned.to_ascii_uppercase();
    let stem_upper = upper.split('.').next().unwrap_or(&upper);
    if RESERVED_WINDOWS_NAMES.contains(&stem_upper) {
        cleaned = format!("_{cleaned}");
    }
    truncate_preserving_extension(&cleaned, max_len)
}

fn truncate_preserving_extension(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(idx) if idx > 0 && name.len() - idx <= max_len => {
            let ext = &name[idx..];
            let keep = max_len.saturating_sub(ext.len());
            format!("{}{}", &name[..keep], ext)
        }
        _ => name[..max_len].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ensure_under_root_rejects_parent_dir_traversal() {
        let root = PathBuf::from("/data/raw");
        let err = ensure_under_root(&root, Path::new("../../etc/passwd")).unwrap_err();
        assert!(matches!(err, KernelError::PathTraversal(_)));
    }

    #[test]
    fn ensure_under_root_accepts_plain_relative_path() {
        let root = PathBuf::from("/data/raw");
        let got = ensure_under_root(&root, Path::new("target1/shards/a.jsonl.gz")).unwrap();
        assert_eq!(got, PathBuf::from("/data/raw/target1/shards/a.jsonl.gz"));
    }

    #[test]
    fn sanitize_extract_path_rejects_parent_dir_entries() {
        let dir = TempDir::new().unwrap();
        let err = sanitize_extract_path(dir.path(), "../escape.txt").unwrap_err();
        assert!(matches!(err, KernelError::ArchiveEntry(_)));
    }

    #[test]
    fn sanitize_extract_path_rejects_absolute_entries() {
        let dir = TempDir::new().unwrap();
        let err = sanitize_extract_path(dir.path(), "/etc/passwd").unwrap_err();
        assert!(matches!(err, KernelError::ArchiveEntry(_)));
    }

    #[test]
    fn sanitize_extract_path_accepts_nested_entry() {
        let dir = TempDir::new().unwrap();
        let p = sanitize_extract_path(dir.path(), "sub/dir/file.txt").unwrap();
        assert!(p.starts_with(dir.path()));
    }

    #[test]
    fn sanitize_filename_strips_separators_and_reserved_names() {
        assert_eq!(sanitize_filename("a/b\\c", 64), "a_b_c");
        assert_eq!(sanitize_filename("CON", 64), "_CON");
        assert_eq!(sanitize_filename("con.txt", 64), "_con.txt");
    }

    #[test]
    fn sanitize_filename_truncates_preserving_extension() {
        let long = "a".repeat(100) + ".jsonl.gz";
        let got = sanitize_filename(&long, 20);
        assert!(got.len() <= 20);
        assert!(got.ends_with(".gz"));
    }
}
