//! Size normalisation: shrink every page in a scope to the scope's minimum
//! width and height.
//!
//! Two steps, separated by a barrier:
//!
//! 1. **Reduction** (sequential): component-wise minimum over the
//!    dimensions of every non-missing page in scope.
//! 2. **Resize** (parallel): each non-missing page is resized to exactly
//!    that size. Missing pages pass through untouched.
//!
//! The scope is either one batch or the whole document; see
//! [`crate::config::NormalizeScope`]. For the whole-document scope the
//! reduction runs over dimensions recorded during conversion and
//! [`Normalizer::resize_to`] is called per batch with the global size.

use crate::error::PageError;
use crate::output::{NormalizedSize, PageImage};
use crate::pipeline::pool::{TaskError, WorkerPool};
use crate::progress::StageReporter;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, warn};

/// Resize `img` to exactly `size`. A page already at that size is returned
/// as is.
pub fn resize_image(img: DynamicImage, size: NormalizedSize, filter: FilterType) -> DynamicImage {
    if img.width() == size.width && img.height() == size.height {
        return img;
    }
    img.resize_exact(size.width, size.height, filter)
}

pub struct Normalizer {
    pool: WorkerPool,
    filter: FilterType,
}

impl Normalizer {
    pub fn new(pool: WorkerPool, filter: impl Into<FilterType>) -> Self {
        Self {
            pool,
            filter: filter.into(),
        }
    }

    /// Minimum `(width, height)` over the non-missing pages, or `None` when
    /// every page is missing.
    pub fn min_size(images: &[PageImage]) -> Option<NormalizedSize> {
        NormalizedSize::min_of(images.iter().filter_map(PageImage::dimensions))
    }

    /// Reduce then resize, with `images` as the whole scope.
    ///
    /// Returns the pages in input order together with the size they now
    /// share.
    pub async fn normalize(
        &self,
        images: Vec<PageImage>,
        reporter: &StageReporter,
    ) -> (Vec<PageImage>, Option<NormalizedSize>) {
        let size = Self::min_size(&images);
        let images = self.resize_to(images, size, reporter).await;
        (images, size)
    }

    /// Resize every non-missing page to `size`.
    ///
    /// `size` must already be the minimum over the whole scope. With `None`
    /// (nothing in scope rendered) the pages are returned unchanged. Every
    /// page, missing or not, is counted once for the resize stage.
    pub async fn resize_to(
        &self,
        images: Vec<PageImage>,
        size: Option<NormalizedSize>,
        reporter: &StageReporter,
    ) -> Vec<PageImage> {
        let Some(size) = size else {
            debug!("All {} pages in scope are missing; nothing to resize", images.len());
            for img in &images {
                reporter.page_done(img.page_index, None);
            }
            return images;
        };

        debug!(
            "Resizing {} pages to {}x{}",
            images.len(),
            size.width,
            size.height
        );

        let indices: Vec<usize> = images.iter().map(|p| p.page_index).collect();
        let filter = self.filter;
        let task_reporter = reporter.clone();
        let results = self
            .pool
            .run(images, move |page| {
                let resized = match page.bitmap {
                    Some(bitmap) => PageImage::rendered(page.page_index, resize_image(bitmap, size, filter)),
                    None => page,
                };
                task_reporter.page_done(resized.page_index, None);
                resized
            })
            .await;

        indices
            .into_iter()
            .zip(results)
            .map(|(idx, r)| match r {
                Ok(page) => page,
                Err(e) => {
                    let err = PageError::ResizeFailed {
                        page: idx + 1,
                        detail: e.to_string(),
                    };
                    if let TaskError::Panicked(_) = e {
                        warn!("{}", err);
                        reporter.page_done(idx, Some(&err));
                    }
                    PageImage::missing(idx, err)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResizeFilter;
    use crate::pipeline::pool::CancelFlag;
    use crate::progress::{ProgressTracker, Stage};
    use image::RgbImage;
    use std::sync::Arc;

    fn page(idx: usize, w: u32, h: u32) -> PageImage {
        PageImage::rendered(idx, DynamicImage::ImageRgb8(RgbImage::new(w, h)))
    }

    fn hole(idx: usize) -> PageImage {
        PageImage::missing(
            idx,
            PageError::RenderFailed {
                page: idx + 1,
                detail: "test".into(),
            },
        )
    }

    fn normalizer() -> (Normalizer, Arc<ProgressTracker>, StageReporter) {
        let tracker = Arc::new(ProgressTracker::new());
        let reporter = StageReporter::new(Stage::Resize, Arc::clone(&tracker), None);
        (
            Normalizer::new(WorkerPool::new(2, CancelFlag::new()), ResizeFilter::Lanczos3),
            tracker,
            reporter,
        )
    }

    #[test]
    fn min_size_ignores_holes() {
        let images = vec![page(0, 100, 140), hole(1), page(2, 120, 90)];
        assert_eq!(
            Normalizer::min_size(&images),
            Some(NormalizedSize {
                width: 100,
                height: 90
            })
        );
    }

    #[tokio::test]
    async fn every_page_ends_at_the_scope_minimum() {
        let (n, tracker, reporter) = normalizer();
        tracker.begin(4);
        let images = vec![page(0, 100, 140), page(1, 80, 150), hole(2), page(3, 120, 90)];

        let (out, size) = n.normalize(images, &reporter).await;

        let size = size.unwrap();
        assert_eq!((size.width, size.height), (80, 90));
        for p in out.iter().filter(|p| !p.is_missing()) {
            assert_eq!(p.dimensions(), Some((80, 90)));
        }
        assert!(out[2].is_missing());
        let order: Vec<usize> = out.iter().map(|p| p.page_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(tracker.completed(Stage::Resize), 4);
    }

    #[tokio::test]
    async fn all_missing_is_a_no_op() {
        let (n, tracker, reporter) = normalizer();
        tracker.begin(2);
        let (out, size) = n.normalize(vec![hole(0), hole(1)], &reporter).await;
        assert_eq!(size, None);
        assert!(out.iter().all(PageImage::is_missing));
        assert_eq!(tracker.completed(Stage::Resize), 2);
    }

    #[tokio::test]
    async fn resize_to_external_size() {
        let (n, _tracker, reporter) = normalizer();
        let target = NormalizedSize {
            width: 50,
            height: 60,
        };
        let out = n
            .resize_to(vec![page(7, 200, 200), page(8, 50, 60)], Some(target), &reporter)
            .await;
        assert_eq!(out[0].dimensions(), Some((50, 60)));
        assert_eq!(out[1].dimensions(), Some((50, 60)));
        assert_eq!(out[0].page_index, 7);
    }

    #[test]
    fn same_size_is_untouched() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([9, 8, 7])));
        let out = resize_image(
            img.clone(),
            NormalizedSize {
                width: 4,
                height: 4,
            },
            FilterType::Lanczos3,
        );
        assert_eq!(out, img);
    }
}
