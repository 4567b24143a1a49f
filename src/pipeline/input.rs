//! Input validation: make sure a user-supplied path is a readable PDF.
//!
//! Checking existence, permissions and the `%PDF` magic bytes up front gives
//! callers a precise [`Pdf2ImgError`] instead of an opaque backend failure,
//! and lets the run fail before any work is scheduled.

use crate::error::Pdf2ImgError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate a local file path, returning it as an owned `PathBuf`.
///
/// Files shorter than four bytes are passed through to the backend, which
/// reports them as corrupt.
pub fn validate_local(path: impl AsRef<Path>) -> Result<PathBuf, Pdf2ImgError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(Pdf2ImgError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(Pdf2ImgError::NotAPdf {
            path,
            magic: [0; 4],
        });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(Pdf2ImgError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2ImgError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(Pdf2ImgError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_not_found() {
        let err = validate_local("/definitely/not/a/real/file.pdf").unwrap_err();
        assert!(matches!(err, Pdf2ImgError::FileNotFound { .. }));
        assert!(err.is_document_error());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04 not a pdf").unwrap();
        let err = validate_local(f.path()).unwrap_err();
        match err {
            Pdf2ImgError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn pdf_header_is_accepted() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        let path = validate_local(f.path()).unwrap();
        assert_eq!(path, f.path());
    }

    #[test]
    fn directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_local(dir.path()),
            Err(Pdf2ImgError::NotAPdf { .. })
        ));
    }
}
