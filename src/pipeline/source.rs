//! Page source: open a document, report its page count, and split the page
//! range into batches.
//!
//! Batches are contiguous, non-overlapping `[start, end)` ranges that
//! together cover `[0, page_count)` exactly. They are produced lazily so a
//! caller can stop between batches without materialising the whole plan.

use crate::error::Pdf2ImgError;
use crate::pipeline::input;
use crate::pipeline::render::Rasterizer;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Read-only handle to a source document.
///
/// Cheap to share: workers receive it through an `Arc` and each rasteriser
/// call opens its own backend handle from `path`.
#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    password: Option<String>,
    page_count: usize,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, password: Option<String>, page_count: usize) -> Self {
        Self {
            path: path.into(),
            password,
            page_count,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

/// A contiguous range of 0-based page indices processed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// 0-based ordinal of this batch within the run.
    pub number: usize,
    /// First page index (inclusive).
    pub start: usize,
    /// Last page index (exclusive).
    pub end: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn indices(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Number of batches needed to cover `page_count` pages.
pub fn batch_count(page_count: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    page_count.div_ceil(batch_size)
}

/// Lazy iterator over the batches of a document.
#[derive(Debug, Clone)]
pub struct Batches {
    page_count: usize,
    batch_size: usize,
    next_start: usize,
    next_number: usize,
}

impl Batches {
    /// Plan batches over `[0, page_count)`. `batch_size` must be ≥ 1.
    pub fn new(page_count: usize, batch_size: usize) -> Result<Self, Pdf2ImgError> {
        if batch_size == 0 {
            return Err(Pdf2ImgError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        Ok(Self {
            page_count,
            batch_size,
            next_start: 0,
            next_number: 0,
        })
    }
}

impl Iterator for Batches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.next_start >= self.page_count {
            return None;
        }
        let start = self.next_start;
        let end = (start + self.batch_size).min(self.page_count);
        let batch = Batch {
            number: self.next_number,
            start,
            end,
        };
        self.next_start = end;
        self.next_number += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = batch_count(self.page_count - self.next_start.min(self.page_count), self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches {}

/// An opened document ready to be split into batches.
#[derive(Debug, Clone)]
pub struct PageSource {
    document: Arc<Document>,
}

impl PageSource {
    /// Validate `path`, ask the rasteriser for its page count, and fail with
    /// [`Pdf2ImgError::EmptyDocument`] when there is nothing to convert.
    ///
    /// Blocking: the backend parses the document.
    pub fn open(
        path: impl AsRef<Path>,
        rasterizer: &dyn Rasterizer,
        password: Option<&str>,
    ) -> Result<Self, Pdf2ImgError> {
        let path = input::validate_local(path)?;
        let page_count = rasterizer.page_count(&path, password)?;
        if page_count == 0 {
            return Err(Pdf2ImgError::EmptyDocument { path });
        }
        info!(
            "PDF loaded via {}: {} pages ({})",
            rasterizer.name(),
            page_count,
            path.display()
        );
        Ok(Self {
            document: Arc::new(Document::new(path, password.map(str::to_string), page_count)),
        })
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn page_count(&self) -> usize {
        self.document.page_count()
    }

    /// Lazily split `[0, page_count)` into batches of `batch_size` pages.
    pub fn batches(&self, batch_size: usize) -> Result<Batches, Pdf2ImgError> {
        Batches::new(self.page_count(), batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use image::DynamicImage;
    use std::io::Write;

    struct CountOnly(usize);

    impl Rasterizer for CountOnly {
        fn name(&self) -> &str {
            "count-only"
        }

        fn page_count(&self, _path: &Path, _password: Option<&str>) -> Result<usize, Pdf2ImgError> {
            Ok(self.0)
        }

        fn rasterize(&self, _doc: &Document, page_index: usize) -> Result<DynamicImage, PageError> {
            Err(PageError::RenderFailed {
                page: page_index + 1,
                detail: "not used".into(),
            })
        }
    }

    fn pdf_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        f
    }

    #[test]
    fn batches_partition_the_page_range() {
        for (pages, size) in [(1, 1), (10, 3), (40, 40), (41, 40), (7, 100), (100, 7)] {
            let batches: Vec<Batch> = Batches::new(pages, size).unwrap().collect();
            assert_eq!(batches.len(), batch_count(pages, size), "{pages}/{size}");
            assert_eq!(batches.len(), pages.div_ceil(size));

            let mut expected_start = 0;
            for (i, b) in batches.iter().enumerate() {
                assert_eq!(b.number, i);
                assert_eq!(b.start, expected_start, "gap or overlap at batch {i}");
                assert!(!b.is_empty());
                assert!(b.len() <= size);
                expected_start = b.end;
            }
            assert_eq!(expected_start, pages);
        }
    }

    #[test]
    fn last_batch_may_be_shorter() {
        let batches: Vec<Batch> = Batches::new(3, 2).unwrap().collect();
        assert_eq!(
            batches,
            vec![
                Batch { number: 0, start: 0, end: 2 },
                Batch { number: 1, start: 2, end: 3 },
            ]
        );
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = Batches::new(10, 0).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn size_hint_tracks_remaining() {
        let mut it = Batches::new(10, 4).unwrap();
        assert_eq!(it.len(), 3);
        it.next();
        assert_eq!(it.len(), 2);
        it.next();
        it.next();
        assert_eq!(it.len(), 0);
        assert!(it.next().is_none());
    }

    #[test]
    fn open_reports_page_count() {
        let f = pdf_file();
        let source = PageSource::open(f.path(), &CountOnly(12), None).unwrap();
        assert_eq!(source.page_count(), 12);
        assert_eq!(source.batches(5).unwrap().count(), 3);
    }

    #[test]
    fn open_zero_pages_is_empty_document() {
        let f = pdf_file();
        let err = PageSource::open(f.path(), &CountOnly(0), None).unwrap_err();
        assert!(matches!(err, Pdf2ImgError::EmptyDocument { .. }));
        assert!(err.is_document_error());
    }
}
