//! Error types for the edgequake-pdf2img library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2ImgError`] — **Fatal**: the run cannot start or cannot continue
//!   (missing or corrupt document, zero pages, invalid configuration, output
//!   directory unusable). Returned as `Err(Pdf2ImgError)` from
//!   [`crate::convert::Converter::run`].
//!
//! * [`PageError`] — **Non-fatal**: a single page failed in one stage
//!   (render glitch, resize failure, write error). Stored on the
//!   [`crate::output::PageImage`] so the page becomes a hole in the output
//!   while every other page is still produced.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2img library.
///
/// Page-level failures use [`PageError`] and never surface here.
#[derive(Debug, Error)]
pub enum Pdf2ImgError {
    // ── Document errors ───────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document opened fine but has no pages to convert.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed (batch size, worker count, DPI, …).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
You can:\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n\
  • Pass --pdfium-lib /path/to/libpdfium.\n\
  • Place libpdfium next to the binary or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// The output directory could not be created or cleared.
    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Run-control errors ────────────────────────────────────────────────
    /// `run` was called while the same converter was already running.
    #[error("A conversion is already running on this converter")]
    RunInProgress,

    /// The run was cancelled between batches or before a worker dispatch.
    #[error("Conversion cancelled after {completed_batches}/{total_batches} batches")]
    Cancelled {
        completed_batches: usize,
        total_batches: usize,
    },

    /// Some pages are missing from the output.
    ///
    /// Returned by [`crate::output::RunOutcome::into_result`] when the
    /// caller wants to treat any missing page as an error.
    #[error("{missing}/{total} pages missing from output")]
    PartialFailure {
        produced: usize,
        missing: usize,
        total: usize,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2ImgError {
    /// `true` for unreadable, corrupt, locked or empty input documents.
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            Pdf2ImgError::FileNotFound { .. }
                | Pdf2ImgError::PermissionDenied { .. }
                | Pdf2ImgError::NotAPdf { .. }
                | Pdf2ImgError::CorruptPdf { .. }
                | Pdf2ImgError::PasswordRequired { .. }
                | Pdf2ImgError::WrongPassword { .. }
                | Pdf2ImgError::EmptyDocument { .. }
        )
    }

    /// `true` when the run was rejected because of its configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Pdf2ImgError::InvalidConfig(_))
    }
}

/// A non-fatal error for a single page.
///
/// Page numbers are 1-indexed, matching slot file names.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Resizing to the normalised size failed (or the staged bitmap could
    /// not be reloaded for resizing).
    #[error("Page {page}: resize failed: {detail}")]
    ResizeFailed { page: usize, detail: String },

    /// Writing the page image to its slot failed.
    #[error("Page {page}: could not save '{path}': {detail}")]
    SaveFailed {
        page: usize,
        path: PathBuf,
        detail: String,
    },

    /// The worker running this page panicked.
    #[error("Page {page}: worker panicked: {detail}")]
    WorkerPanicked { page: usize, detail: String },
}

impl PageError {
    /// The 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::ResizeFailed { page, .. }
            | PageError::SaveFailed { page, .. }
            | PageError::WorkerPanicked { page, .. } => *page,
        }
    }
}
