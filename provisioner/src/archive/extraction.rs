//! Archive extraction with path traversal protection.
//!
//! Entries with absolute paths or `..` components abort the extraction.
//! Symbolic and hard links are skipped. Unix execute bits survive.

use super::ArchiveFormat;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

const SYMLINK_MODE_MASK: u32 = 0o170_000;
const SYMLINK_MODE: u32 = 0o120_000;

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] io::Error),

    /// The ZIP container is malformed.
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A path in the archive attempts to traverse outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The archive contains no regular files.
    #[error("archive contains no files")]
    EmptyArchive,
}

/// Extract `archive` into `dest`, returning the paths of extracted files.
///
/// `dest` is created if missing.
///
/// # Errors
///
/// Returns [`ExtractionError::PathTraversal`] if any entry tries to escape
/// `dest`, [`ExtractionError::EmptyArchive`] if nothing was extracted, and
/// [`ExtractionError::Io`] or [`ExtractionError::Zip`] on read failures.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    format: ArchiveFormat,
) -> Result<Vec<PathBuf>, ExtractionError> {
    log::debug!(
        "extracting {format:?} archive {} into {}",
        archive.display(),
        dest.display()
    );
    fs::create_dir_all(dest)?;
    let file = BufReader::new(File::open(archive)?);
    let extracted = match format {
        ArchiveFormat::Zip => extract_zip(file, dest)?,
        ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(file), dest)?,
        ArchiveFormat::TarXz => extract_tar(xz2::read::XzDecoder::new(file), dest)?,
        ArchiveFormat::Tar => extract_tar(file, dest)?,
    };
    if extracted.is_empty() {
        return Err(ExtractionError::EmptyArchive);
    }
    log::debug!("extracted {} files", extracted.len());
    Ok(extracted)
}

fn extract_zip<R: Read + io::Seek>(reader: R, dest: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ExtractionError::PathTraversal {
                path: entry.name().to_owned(),
            });
        };
        validate_entry_path(&relative)?;
        let mode = entry.unix_mode();
        if mode.is_some_and(|m| m & SYMLINK_MODE_MASK == SYMLINK_MODE) {
            log::warn!("skipping symlink {} in zip archive", entry.name());
            continue;
        }
        let target = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        write_entry(&mut entry, &target, mode)?;
        extracted.push(target);
    }
    Ok(extracted)
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();
    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let relative = entry.path()?.into_owned();
        validate_entry_path(&relative)?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            log::warn!("skipping link {} in tar archive", relative.display());
            continue;
        }
        let target = dest.join(&relative);
        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry_type.is_file() {
            let mode = entry.header().mode().ok();
            write_entry(&mut entry, &target, mode)?;
            extracted.push(target);
        }
    }
    Ok(extracted)
}

fn write_entry(reader: &mut impl Read, target: &Path, mode: Option<u32>) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(target)?;
    io::copy(reader, &mut file)?;
    apply_mode(target, mode)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match mode {
        Some(mode) if mode & 0o111 != 0 => {
            fs::set_permissions(path, fs::Permissions::from_mode((mode & 0o7777) | 0o755))
        }
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Validate that an entry path does not escape the destination directory
/// via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ExtractionError> {
    let escapes = path.is_absolute()
        || path.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
    if escapes {
        return Err(ExtractionError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{tar_archive, tar_gz_archive, tar_xz_archive, zip_archive};
    use rstest::rstest;
    use tempfile::TempDir;

    fn write_archive(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).expect("write archive");
        path
    }

    #[test]
    fn extracts_zip_with_nested_directories() {
        let dir = TempDir::new().expect("temp dir");
        let bytes = zip_archive(&[
            ("readme.txt", b"hello", 0o644),
            ("subdir/ffmpeg", b"binary", 0o755),
        ])
        .expect("zip");
        let archive = write_archive(&dir, "tool.zip", &bytes);
        let dest = dir.path().join("out");

        let files = extract_archive(&archive, &dest, ArchiveFormat::Zip).expect("extract");

        assert_eq!(files.len(), 2);
        assert_eq!(
            fs::read(dest.join("subdir/ffmpeg")).expect("read"),
            b"binary"
        );
    }

    #[rstest]
    #[case(ArchiveFormat::TarGz)]
    #[case(ArchiveFormat::TarXz)]
    #[case(ArchiveFormat::Tar)]
    fn extracts_tarballs(#[case] format: ArchiveFormat) {
        let dir = TempDir::new().expect("temp dir");
        let entries: &[(&str, &[u8], u32)] =
            &[("ffmpeg-7.0-amd64-static/ffmpeg", b"binary", 0o755)];
        let bytes = match format {
            ArchiveFormat::TarGz => tar_gz_archive(entries),
            ArchiveFormat::TarXz => tar_xz_archive(entries),
            _ => tar_archive(entries),
        }
        .expect("tarball");
        let archive = write_archive(&dir, "tool.archive", &bytes);
        let dest = dir.path().join("out");

        let files = extract_archive(&archive, &dest, format).expect("extract");

        assert_eq!(files, vec![dest.join("ffmpeg-7.0-amd64-static/ffmpeg")]);
    }

    #[cfg(unix)]
    #[test]
    fn preserves_execute_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let bytes = tar_gz_archive(&[("bin/tool", b"#!/bin/sh\n", 0o700), ("doc", b"x", 0o600)])
            .expect("tarball");
        let archive = write_archive(&dir, "tool.tar.gz", &bytes);
        let dest = dir.path().join("out");

        extract_archive(&archive, &dest, ArchiveFormat::TarGz).expect("extract");

        let tool_mode = fs::metadata(dest.join("bin/tool")).expect("meta").permissions().mode();
        assert_eq!(tool_mode & 0o755, 0o755);
        let doc_mode = fs::metadata(dest.join("doc")).expect("meta").permissions().mode();
        assert_eq!(doc_mode & 0o111, 0);
    }

    #[test]
    fn rejects_zip_slip() {
        let dir = TempDir::new().expect("temp dir");
        let bytes = zip_archive(&[("../escape.txt", b"owned", 0o644)]).expect("zip");
        let archive = write_archive(&dir, "evil.zip", &bytes);
        let dest = dir.path().join("out");

        let err = extract_archive(&archive, &dest, ArchiveFormat::Zip).expect_err("traversal");

        assert!(matches!(err, ExtractionError::PathTraversal { .. }));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn empty_archive_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let bytes = tar_gz_archive(&[]).expect("tarball");
        let archive = write_archive(&dir, "empty.tar.gz", &bytes);

        let err = extract_archive(&archive, &dir.path().join("out"), ArchiveFormat::TarGz)
            .expect_err("empty");

        assert!(matches!(err, ExtractionError::EmptyArchive));
    }

    #[test]
    fn corrupt_zip_reports_a_zip_error() {
        let dir = TempDir::new().expect("temp dir");
        let archive = write_archive(&dir, "broken.zip", b"definitely not a zip");

        let err = extract_archive(&archive, &dir.path().join("out"), ArchiveFormat::Zip)
            .expect_err("corrupt");

        assert!(matches!(err, ExtractionError::Zip(_)));
    }

    #[rstest]
    #[case("/etc/passwd")]
    #[case("../../outside")]
    #[case("nested/../../outside")]
    fn entry_paths_that_escape_are_rejected(#[case] path: &str) {
        assert!(validate_entry_path(Path::new(path)).is_err());
    }

    #[rstest]
    #[case("ffmpeg")]
    #[case("dir/./ffmpeg")]
    #[case("a/b/c/ffmpeg")]
    fn contained_entry_paths_are_accepted(#[case] path: &str) {
        assert!(validate_entry_path(Path::new(path)).is_ok());
    }
}
