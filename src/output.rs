//! Data model flowing between pipeline stages, and the run outcome.

use crate::error::{PageError, Pdf2ImgError};
use crate::pipeline::source::Batch;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One page's bitmap, or an explicit hole when a stage failed for it.
///
/// `page_index` is the 0-based index in the document. A page is *missing*
/// when `bitmap` is `None`; `error` then says which stage dropped it.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_index: usize,
    pub bitmap: Option<DynamicImage>,
    pub error: Option<PageError>,
}

impl PageImage {
    pub fn rendered(page_index: usize, bitmap: DynamicImage) -> Self {
        Self {
            page_index,
            bitmap: Some(bitmap),
            error: None,
        }
    }

    pub fn missing(page_index: usize, error: PageError) -> Self {
        Self {
            page_index,
            bitmap: None,
            error: Some(error),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.bitmap.is_none()
    }

    /// 1-indexed page number, as used in slot names and logs.
    pub fn page_num(&self) -> usize {
        self.page_index + 1
    }

    /// `(width, height)` in pixels, or `None` for a missing page.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.bitmap.as_ref().map(|b| (b.width(), b.height()))
    }
}

/// The pages of one batch, in ascending page order (holes included).
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch: Batch,
    pub pages: Vec<PageImage>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.pages.iter().filter(|p| p.is_missing()).count()
    }
}

/// The common size every page in a normalisation scope is resized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedSize {
    pub width: u32,
    pub height: u32,
}

impl NormalizedSize {
    /// Component-wise minimum over a set of dimensions.
    ///
    /// Returns `None` for an empty set (every page in scope is missing).
    pub fn min_of(dims: impl IntoIterator<Item = (u32, u32)>) -> Option<Self> {
        dims.into_iter().fold(None, |acc, (w, h)| {
            Some(match acc {
                None => NormalizedSize { width: w, height: h },
                Some(s) => NormalizedSize {
                    width: s.width.min(w),
                    height: s.height.min(h),
                },
            })
        })
    }
}

/// Wall-clock timings of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub convert_duration_ms: u64,
    pub resize_duration_ms: u64,
    pub save_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of a completed run.
///
/// A run with missing pages is still a success: partial output is a valid
/// terminal state. Use [`RunOutcome::into_result`] to be strict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Pages in the source document.
    pub page_count: usize,
    /// Slots written.
    pub pages_produced: usize,
    /// Pages absent from the output.
    pub pages_missing: usize,
    /// 1-indexed numbers of the missing pages, ascending.
    pub missing_pages: Vec<usize>,
    /// Per-page errors that caused the holes.
    pub errors: Vec<PageError>,
    /// Number of batches the document was split into.
    pub batches: usize,
    /// Size of every produced image (`None` when nothing was produced, or
    /// when per-batch normalisation yielded several sizes).
    pub normalized_size: Option<NormalizedSize>,
    /// Directory holding the slots.
    pub output_dir: PathBuf,
    pub stats: RunStats,
}

impl RunOutcome {
    /// `Err(PartialFailure)` if any page is missing, otherwise `Ok(self)`.
    pub fn into_result(self) -> Result<Self, Pdf2ImgError> {
        if self.pages_missing > 0 {
            Err(Pdf2ImgError::PartialFailure {
                produced: self.pages_produced,
                missing: self.pages_missing,
                total: self.page_count,
            })
        } else {
            Ok(self)
        }
    }
}
