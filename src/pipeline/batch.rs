//! Batch conversion: rasterise every page of one batch in parallel.

use crate::error::PageError;
use crate::output::{BatchResult, PageImage};
use crate::pipeline::pool::{TaskError, WorkerPool};
use crate::pipeline::render::{render_page, Rasterizer};
use crate::pipeline::source::{Batch, Document};
use crate::progress::StageReporter;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fans the pages of a batch out to the worker pool.
pub struct BatchConverter {
    rasterizer: Arc<dyn Rasterizer>,
    pool: WorkerPool,
}

impl BatchConverter {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, pool: WorkerPool) -> Self {
        Self { rasterizer, pool }
    }

    /// Convert every page of `batch`.
    ///
    /// The result holds exactly `batch.len()` entries in ascending page
    /// order. A page whose rasterisation failed (or whose worker panicked)
    /// is a hole carrying its [`PageError`]; the rest of the batch is
    /// unaffected. Pages skipped by cancellation are not counted as done.
    pub async fn convert(
        &self,
        doc: &Arc<Document>,
        batch: Batch,
        reporter: &StageReporter,
    ) -> BatchResult {
        reporter.stage_start(&batch);
        debug!(
            "Batch {}: converting pages {}–{}",
            batch.number + 1,
            batch.start + 1,
            batch.end
        );

        let rasterizer = Arc::clone(&self.rasterizer);
        let doc_for_task = Arc::clone(doc);
        let task_reporter = reporter.clone();
        let results = self
            .pool
            .run(batch.indices().collect(), move |idx| {
                let image = render_page(rasterizer.as_ref(), &doc_for_task, idx);
                task_reporter.page_done(idx, image.error.as_ref());
                image
            })
            .await;

        let pages: Vec<PageImage> = batch
            .indices()
            .zip(results)
            .map(|(idx, r)| match r {
                Ok(image) => image,
                Err(TaskError::Panicked(detail)) => {
                    let e = PageError::WorkerPanicked {
                        page: idx + 1,
                        detail,
                    };
                    warn!("{}", e);
                    reporter.page_done(idx, Some(&e));
                    PageImage::missing(idx, e)
                }
                Err(TaskError::Cancelled) => PageImage::missing(
                    idx,
                    PageError::RenderFailed {
                        page: idx + 1,
                        detail: "cancelled".into(),
                    },
                ),
            })
            .collect();

        let result = BatchResult { batch, pages };
        if result.missing_count() > 0 {
            warn!(
                "Batch {}: {}/{} pages failed to render",
                batch.number + 1,
                result.missing_count(),
                result.len()
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Pdf2ImgError;
    use crate::pipeline::pool::CancelFlag;
    use crate::progress::{ProgressTracker, Stage};
    use image::{DynamicImage, RgbImage};
    use std::path::Path;

    struct Flaky;

    impl Rasterizer for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn page_count(&self, _path: &Path, _password: Option<&str>) -> Result<usize, Pdf2ImgError> {
            Ok(6)
        }

        fn rasterize(&self, _doc: &Document, page_index: usize) -> Result<DynamicImage, PageError> {
            match page_index {
                2 => Err(PageError::RenderFailed {
                    page: 3,
                    detail: "broken content stream".into(),
                }),
                4 => panic!("pdfium crashed"),
                i => Ok(DynamicImage::ImageRgb8(RgbImage::new(10 + i as u32, 20))),
            }
        }
    }

    fn setup(workers: usize) -> (BatchConverter, Arc<ProgressTracker>, StageReporter, Arc<Document>) {
        let converter = BatchConverter::new(Arc::new(Flaky), WorkerPool::new(workers, CancelFlag::new()));
        let tracker = Arc::new(ProgressTracker::new());
        tracker.begin(6);
        let reporter = StageReporter::new(Stage::Convert, Arc::clone(&tracker), None);
        let doc = Arc::new(Document::new("flaky.pdf", None, 6));
        (converter, tracker, reporter, doc)
    }

    #[tokio::test]
    async fn batch_keeps_order_and_holes() {
        let (converter, tracker, reporter, doc) = setup(3);
        let batch = Batch {
            number: 0,
            start: 0,
            end: 6,
        };
        let result = converter.convert(&doc, batch, &reporter).await;

        assert_eq!(result.len(), 6);
        let indices: Vec<usize> = result.pages.iter().map(|p| p.page_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(result.missing_count(), 2);
        assert!(matches!(
            result.pages[2].error,
            Some(PageError::RenderFailed { page: 3, .. })
        ));
        assert!(matches!(
            result.pages[4].error,
            Some(PageError::WorkerPanicked { page: 5, .. })
        ));
        assert_eq!(result.pages[5].dimensions(), Some((15, 20)));
        // every page counted once, holes included
        assert_eq!(tracker.completed(Stage::Convert), 6);
    }

    #[tokio::test]
    async fn partial_batch_covers_only_its_range() {
        let (converter, tracker, reporter, doc) = setup(1);
        let batch = Batch {
            number: 1,
            start: 5,
            end: 6,
        };
        let result = converter.convert(&doc, batch, &reporter).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result.pages[0].page_index, 5);
        assert_eq!(tracker.completed(Stage::Convert), 1);
    }
}
