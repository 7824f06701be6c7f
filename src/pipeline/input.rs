//! Input resolution: validate user-supplied paths before any work starts.
//!
//! Every tool takes a single file argument. Checking it up front turns a
//! confusing pdfium or serde failure halfway through a run into a clear
//! "file not found" / "not a PDF" message at the start.

use crate::error::DocPrepError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ensure `path` names an existing regular file.
pub fn resolve_file(path: impl AsRef<Path>) -> Result<PathBuf, DocPrepError> {
    let path = path.as_ref().to_path_buf();
    if !path.exists() {
        return Err(DocPrepError::FileNotFound { path });
    }
    if !path.is_file() {
        return Err(DocPrepError::NotAFile { path });
    }
    Ok(path)
}

/// Resolve a local PDF path, validating extension and `%PDF` magic bytes.
pub fn resolve_pdf(path: impl AsRef<Path>) -> Result<PathBuf, DocPrepError> {
    let path = resolve_file(path)?;

    let is_pdf_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));

    let mut file = std::fs::File::open(&path).map_err(|source| DocPrepError::ReadFailed {
        path: path.clone(),
        source,
    })?;
    let mut magic = [0u8; 4];
    let magic_ok = file.read_exact(&mut magic).is_ok() && &magic == b"%PDF";

    if !is_pdf_ext || !magic_ok {
        return Err(DocPrepError::NotAPdf { path, magic });
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// Read a UTF-8 text file, mapping failures to [`DocPrepError::ReadFailed`].
pub async fn read_text(path: &Path) -> Result<String, DocPrepError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DocPrepError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `contents` to `path` through a sibling temp file and a rename.
///
/// A crash mid-write leaves either the old or the new document, never a
/// truncated one. An existing file keeps its permissions, and a symlink is
/// written through to its target rather than replaced.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), DocPrepError> {
    let write_err = |source| DocPrepError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let is_link = std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink());
    let target = if is_link {
        std::fs::canonicalize(path).map_err(write_err)?
    } else {
        path.to_path_buf()
    };
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    std::io::Write::write_all(&mut tmp, contents.as_bytes()).map_err(write_err)?;
    if let Ok(meta) = std::fs::metadata(&target) {
        tmp.as_file().set_permissions(meta.permissions()).map_err(write_err)?;
    }
    tmp.persist(&target).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reported() {
        let err = resolve_pdf("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, DocPrepError::FileNotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_file(dir.path()).unwrap_err();
        assert!(matches!(err, DocPrepError::NotAFile { .. }));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"PK\x03\x04zip").unwrap();
        match resolve_pdf(&path).unwrap_err() {
            DocPrepError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wrong_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        assert!(matches!(
            resolve_pdf(&path).unwrap_err(),
            DocPrepError::NotAPdf { .. }
        ));
    }

    #[test]
    fn uppercase_extension_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DOC.PDF");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        assert_eq!(resolve_pdf(&path).unwrap(), path);
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "old").unwrap();
        write_atomic(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "a").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        write_atomic(&path, "b").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "b");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_goes_through_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.md");
        let link = dir.path().join("link.md");
        std::fs::write(&real, "old").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        write_atomic(&link, "new").unwrap();
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&real).unwrap(), "new");
    }
}
