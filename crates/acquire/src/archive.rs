//! Archive extraction for bulk strategies whose payload is a zip/tar
//! bundle rather than a single streamed file. Every extracted entry goes
//! through `dsaudit_kernel::pathsafe::sanitize_extract_path` so a
//! malicious archive entry (`../../etc/passwd`, an absolute path) cannot
//! write outside the destination directory — the same zip-slip guard an
//! OS-image installer's archive step needs.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use dsaudit_kernel::pathsafe::sanitize_extract_path;

use crate::AcquireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

pub fn detect_format(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else {
        None
    }
}

pub fn extract(archive_path: &Path, dest_dir: &Path, format: ArchiveFormat) -> Result<u64, AcquireError> {
    fs::create_dir_all(dest_dir)?;
    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir),
        ArchiveFormat::Tar => extract_tar(BufReader::new(File::open(archive_path)?), dest_dir),
        ArchiveFormat::TarGz => {
            let f = File::open(archive_path)?;
            let gz = flate2::read::GzDecoder::new(BufReader::new(f));
            extract_tar(gz, dest_dir)
        }
    }
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<u64, AcquireError> {
    let f = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(f))
        .map_err(|e| AcquireError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let mut total = 0u64;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AcquireError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let out_path = sanitize_extract_path(dest_dir, &name)?;
        let mut out = File::create(&out_path)?;
        let n = std::io::copy(&mut entry, &mut out)?;
        total += n;
    }
    Ok(total)
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<u64, AcquireError> {
    let mut archive = tar::Archive::new(reader);
    let mut total = 0u64;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().to_string();
        let out_path = sanitize_extract_path(dest_dir, &name)?;
        let mut out = File::create(&out_path)?;
        let n = std::io::copy(&mut entry, &mut out)?;
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detects_format_from_extension() {
        assert_eq!(detect_format(Path::new("data.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(detect_format(Path::new("data.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(detect_format(Path::new("data.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(detect_format(Path::new("data.jsonl")), None);
    }

    #[test]
    fn extracts_tar_archive_into_destination() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("a.tar");
        {
            let file = File::create(&archive_path).unwrap();
            let mut builder = tar::Builder::new(file);
            let data = b"hello world";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, "nested/file.txt", &data[..]).unwrap();
            builder.finish().unwrap();
        }

        let dest = dir.path().join("out");
        let total = extract(&archive_path, &dest, ArchiveFormat::Tar).unwrap();
        assert_eq!(total, 11);
        assert!(dest.join("nested/file.txt").exists());
    }

    #[test]
    fn tar_entry_with_parent_dir_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("evil.tar");
        {
            let file = File::create(&archive_path).unwrap();
            let mut builder = tar::Builder::new(file);
            let data = b"x";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, "../../escape.txt", &data[..]).unwrap();
            builder.finish().unwrap();
        }

        let dest = dir.path().join("out");
        let err = extract(&archive_path, &dest, ArchiveFormat::Tar).unwrap_err();
        assert!(matches!(err, AcquireError::Kernel(_)));
    }
}
