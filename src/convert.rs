//! Run orchestration: the main entry points of the crate.
//!
//! A [`Converter`] owns one [`ProgressTracker`], one cancellation flag and
//! the rasteriser, and drives a run through
//! `Idle → Converting → Resizing → Saving → Done`. Batches run one after
//! another to bound memory; all work inside a batch goes through a single
//! shared [`WorkerPool`].
//!
//! Two normalisation scopes are supported:
//!
//! * [`NormalizeScope::Document`] (default): pass 1 converts every batch and
//!   stages the bitmaps losslessly in a temporary directory while recording
//!   their sizes. After the barrier the run-wide minimum is known; pass 2
//!   reloads each batch, resizes it to that size and saves it. Every output
//!   image has the same dimensions.
//! * [`NormalizeScope::Batch`]: convert, normalise and save each batch in
//!   turn. Each batch gets its own minimum, so sizes can differ between
//!   batches.

use crate::config::{ConversionConfig, NormalizeScope, OutputFormat};
use crate::error::{PageError, Pdf2ImgError};
use crate::output::{NormalizedSize, PageImage, RunOutcome, RunStats};
use crate::pipeline::batch::BatchConverter;
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::pool::{CancelFlag, TaskError, WorkerPool};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::sink::{persist_batch, DirectorySink, Manifest};
use crate::pipeline::source::{batch_count, Batch, PageSource};
use crate::progress::{ProgressTracker, RunState, Stage, StageReporter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Converts documents into a directory of uniformly sized page images.
///
/// One run at a time: a second concurrent [`Converter::run`] fails with
/// [`Pdf2ImgError::RunInProgress`]. Share it behind an `Arc` to poll
/// [`Converter::current_progress`] or call [`Converter::cancel`] from
/// another task while a run is in flight.
pub struct Converter {
    config: ConversionConfig,
    rasterizer: Arc<dyn Rasterizer>,
    progress: Arc<ProgressTracker>,
    cancel: CancelFlag,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-page results accumulated over a run.
#[derive(Default)]
struct Tally {
    produced: Vec<usize>,
    missing: Vec<usize>,
    errors: Vec<PageError>,
    convert: Duration,
    resize: Duration,
    save: Duration,
}

impl Converter {
    /// Create a converter backed by pdfium.
    ///
    /// Fails with [`Pdf2ImgError::InvalidConfig`] or
    /// [`Pdf2ImgError::PdfiumBindingFailed`].
    pub fn new(config: ConversionConfig) -> Result<Self, Pdf2ImgError> {
        config.validate()?;
        let rasterizer = PdfiumRasterizer::new(&config)?;
        Ok(Self::with_rasterizer(config, Arc::new(rasterizer)))
    }

    /// Create a converter with a custom rasterisation backend.
    ///
    /// The configuration is validated when a run starts.
    pub fn with_rasterizer(config: ConversionConfig, rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self {
            config,
            rasterizer,
            progress: Arc::new(ProgressTracker::new()),
            cancel: CancelFlag::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// The tracker of this converter's runs.
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Progress of the current (or last) run, in `[0, 100]`.
    pub fn current_progress(&self) -> f64 {
        self.progress.value()
    }

    pub fn state(&self) -> RunState {
        self.progress.state()
    }

    /// The output directory as a sink, for retrieval and slot-status queries.
    pub fn output(&self) -> DirectorySink {
        DirectorySink::new(
            &self.config.output_dir,
            self.config.output_format,
            self.config.jpeg_quality,
        )
    }

    /// Ask the running conversion to stop.
    ///
    /// Checked between batches and before each page is dispatched; pages
    /// already being processed finish. The flag is re-armed when the next
    /// run starts.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.cancel();
    }

    /// Convert the document at `path`.
    ///
    /// Returns `Ok` even when some pages are missing (see
    /// [`RunOutcome::into_result`]). Fatal errors reset progress to 0 and
    /// the state to `Idle`.
    pub async fn run(&self, path: impl AsRef<Path>) -> Result<RunOutcome, Pdf2ImgError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Pdf2ImgError::RunInProgress);
        }
        let _guard = RunGuard(&self.running);

        self.cancel.clear();
        self.progress.reset();

        let result = self.run_inner(path.as_ref()).await;
        match &result {
            Ok(outcome) => {
                self.progress.set_state(RunState::Done);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_conversion_complete(outcome);
                }
            }
            Err(e) => {
                warn!("Conversion failed: {}", e);
                self.progress.fail();
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_conversion_failed(e);
                }
            }
        }
        result
    }

    async fn run_inner(&self, path: &Path) -> Result<RunOutcome, Pdf2ImgError> {
        let total_start = Instant::now();
        self.config.validate()?;
        info!("Starting conversion: {}", path.display());

        // ── Open ─────────────────────────────────────────────────────────
        let rasterizer = Arc::clone(&self.rasterizer);
        let password = self.config.password.clone();
        let owned_path = path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || {
            PageSource::open(&owned_path, rasterizer.as_ref(), password.as_deref())
        })
        .await
        .map_err(|e| Pdf2ImgError::Internal(format!("Open task panicked: {}", e)))??;

        let page_count = source.page_count();
        let total_batches = batch_count(page_count, self.config.batch_size);
        self.progress.begin(page_count);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_conversion_start(page_count, total_batches);
        }
        info!(
            "{} pages in {} batches of ≤{} ({} workers, {:?} scope)",
            page_count,
            total_batches,
            self.config.batch_size,
            self.config.workers,
            self.config.normalize_scope
        );

        // ── Output ───────────────────────────────────────────────────────
        let sink = Arc::new(self.output());
        sink.prepare()?;

        let pool = WorkerPool::new(self.config.workers, self.cancel.clone());
        let mut tally = Tally::default();

        let scoped = match self.config.normalize_scope {
            NormalizeScope::Document => {
                self.run_document_scope(&source, &pool, &sink, total_batches, &mut tally)
                    .await
            }
            NormalizeScope::Batch => {
                self.run_batch_scope(&source, &pool, &sink, total_batches, &mut tally)
                    .await
            }
        }
        .and_then(|size| {
            self.ensure_active(total_batches, total_batches)?;
            Ok(size)
        });
        let normalized_size = match scoped {
            Ok(size) => size,
            Err(e) => {
                self.write_aborted_manifest(&sink, page_count, &mut tally.produced);
                return Err(e);
            }
        };

        // ── Finish ───────────────────────────────────────────────────────
        tally.produced.sort_unstable();
        tally.missing.sort_unstable();
        tally.errors.sort_by_key(PageError::page);
        let normalized_size = normalized_size.filter(|_| !tally.produced.is_empty());

        let manifest = Manifest {
            page_count,
            produced: tally.produced.clone(),
            missing: tally.missing.clone(),
            normalized_size,
            format: self.config.output_format,
            aborted: false,
        };
        if let Err(e) = sink.write_manifest(&manifest) {
            warn!("Could not write manifest: {}", e);
        }

        let stats = RunStats {
            convert_duration_ms: tally.convert.as_millis() as u64,
            resize_duration_ms: tally.resize.as_millis() as u64,
            save_duration_ms: tally.save.as_millis() as u64,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        if tally.produced.is_empty() {
            warn!("No page could be produced ({} pages missing)", tally.missing.len());
        }
        info!(
            "Conversion complete: {}/{} pages, {} missing, {}ms total",
            tally.produced.len(),
            page_count,
            tally.missing.len(),
            stats.total_duration_ms
        );

        Ok(RunOutcome {
            page_count,
            pages_produced: tally.produced.len(),
            pages_missing: tally.missing.len(),
            missing_pages: tally.missing,
            errors: tally.errors,
            batches: total_batches,
            normalized_size,
            output_dir: self.config.output_dir.clone(),
            stats,
        })
    }

    /// Convert, normalise and save batch by batch.
    async fn run_batch_scope(
        &self,
        source: &PageSource,
        pool: &WorkerPool,
        sink: &Arc<DirectorySink>,
        total_batches: usize,
        tally: &mut Tally,
    ) -> Result<Option<NormalizedSize>, Pdf2ImgError> {
        let converter = BatchConverter::new(Arc::clone(&self.rasterizer), pool.clone());
        let normalizer = Normalizer::new(pool.clone(), self.config.resize_filter);
        let convert_rep = self.reporter(Stage::Convert);
        let resize_rep = self.reporter(Stage::Resize);

        let mut sizes: Vec<NormalizedSize> = Vec::new();
        for batch in source.batches(self.config.batch_size)? {
            self.ensure_active(batch.number, total_batches)?;

            let started = Instant::now();
            let converted = converter.convert(source.document(), batch, &convert_rep).await;
            tally.convert += started.elapsed();

            self.ensure_active(batch.number, total_batches)?;
            resize_rep.stage_start(&batch);
            let started = Instant::now();
            let (pages, size) = normalizer.normalize(converted.pages, &resize_rep).await;
            tally.resize += started.elapsed();
            if let Some(size) = size {
                debug!(
                    "Batch {}: normalised to {}x{}",
                    batch.number + 1,
                    size.width,
                    size.height
                );
                sizes.push(size);
            }

            self.ensure_active(batch.number, total_batches)?;
            self.save_pages(pool, sink, &batch, pages, tally).await;
            info!("Batch {}/{} done", batch.number + 1, total_batches);
        }

        // Report a size only when every batch agreed on one.
        Ok(match sizes.split_first() {
            Some((first, rest)) if rest.iter().all(|s| s == first) => Some(*first),
            Some(_) => {
                warn!("Per-batch normalisation produced pages of different sizes");
                None
            }
            None => None,
        })
    }

    /// Two passes with a barrier: convert and stage everything, take the
    /// document-wide minimum, then resize and save batch by batch.
    async fn run_document_scope(
        &self,
        source: &PageSource,
        pool: &WorkerPool,
        sink: &Arc<DirectorySink>,
        total_batches: usize,
        tally: &mut Tally,
    ) -> Result<Option<NormalizedSize>, Pdf2ImgError> {
        let staging_dir = tempfile::Builder::new()
            .prefix("pdf2img-staging-")
            .tempdir()
            .map_err(|source| Pdf2ImgError::OutputDirFailed {
                path: std::env::temp_dir(),
                source,
            })?;
        let staging = Arc::new(DirectorySink::new(staging_dir.path(), OutputFormat::Png, 100));
        debug!("Staging bitmaps in {}", staging_dir.path().display());

        let converter = BatchConverter::new(Arc::clone(&self.rasterizer), pool.clone());
        let normalizer = Normalizer::new(pool.clone(), self.config.resize_filter);
        let convert_rep = self.reporter(Stage::Convert);
        let resize_rep = self.reporter(Stage::Resize);

        let page_count = source.page_count();
        let mut holes: Vec<Option<PageError>> = vec![None; page_count];
        let mut dims: Vec<(u32, u32)> = Vec::with_capacity(page_count);

        // ── Pass 1: convert + stage ──────────────────────────────────────
        for batch in source.batches(self.config.batch_size)? {
            self.ensure_active(batch.number, total_batches)?;

            let started = Instant::now();
            let converted = converter.convert(source.document(), batch, &convert_rep).await;

            let stage_sink = Arc::clone(&staging);
            let staged = pool
                .run(converted.pages, move |page| -> Result<(u32, u32), PageError> {
                    match (page.bitmap, page.error) {
                        (Some(bitmap), _) => {
                            stage_sink.save(&bitmap, page.page_index)?;
                            Ok((bitmap.width(), bitmap.height()))
                        }
                        (None, Some(e)) => Err(e),
                        (None, None) => Err(PageError::RenderFailed {
                            page: page.page_index + 1,
                            detail: "no bitmap".into(),
                        }),
                    }
                })
                .await;

            for (idx, result) in batch.indices().zip(staged) {
                match result {
                    Ok(Ok(dim)) => dims.push(dim),
                    Ok(Err(e)) => holes[idx] = Some(e),
                    Err(TaskError::Panicked(detail)) => {
                        holes[idx] = Some(PageError::WorkerPanicked {
                            page: idx + 1,
                            detail,
                        })
                    }
                    Err(TaskError::Cancelled) => {
                        holes[idx] = Some(PageError::RenderFailed {
                            page: idx + 1,
                            detail: "cancelled".into(),
                        })
                    }
                }
            }
            tally.convert += started.elapsed();
            debug!("Batch {}/{} converted and staged", batch.number + 1, total_batches);
        }

        // ── Barrier ──────────────────────────────────────────────────────
        let size = NormalizedSize::min_of(dims);
        match size {
            Some(s) => info!("Document-wide size: {}x{}", s.width, s.height),
            None => warn!("Every page failed to render"),
        }

        // ── Pass 2: reload + resize + save ───────────────────────────────
        for batch in source.batches(self.config.batch_size)? {
            self.ensure_active(batch.number, total_batches)?;

            resize_rep.stage_start(&batch);
            let started = Instant::now();
            let pages = self
                .load_staged(pool, &staging, &batch, &mut holes)
                .await;
            let pages = normalizer.resize_to(pages, size, &resize_rep).await;
            tally.resize += started.elapsed();

            self.ensure_active(batch.number, total_batches)?;
            self.save_pages(pool, sink, &batch, pages, tally).await;
            info!("Batch {}/{} done", batch.number + 1, total_batches);
        }

        Ok(size)
    }

    /// Bring a batch's staged bitmaps back into memory, in page order.
    async fn load_staged(
        &self,
        pool: &WorkerPool,
        staging: &Arc<DirectorySink>,
        batch: &Batch,
        holes: &mut [Option<PageError>],
    ) -> Vec<PageImage> {
        let work: Vec<(usize, Option<PageError>)> =
            batch.indices().map(|idx| (idx, holes[idx].take())).collect();
        let loader = Arc::clone(staging);
        let loaded = pool
            .run(work, move |(idx, hole)| match hole {
                Some(e) => PageImage::missing(idx, e),
                None => match loader.load(idx) {
                    Ok(img) => PageImage::rendered(idx, img),
                    Err(e) => {
                        let err = PageError::ResizeFailed {
                            page: idx + 1,
                            detail: format!("staged bitmap unreadable: {}", e),
                        };
                        warn!("{}", err);
                        PageImage::missing(idx, err)
                    }
                },
            })
            .await;

        batch
            .indices()
            .zip(loaded)
            .map(|(idx, r)| {
                r.unwrap_or_else(|e| {
                    PageImage::missing(
                        idx,
                        PageError::ResizeFailed {
                            page: idx + 1,
                            detail: e.to_string(),
                        },
                    )
                })
            })
            .collect()
    }

    /// Persist a normalised batch and record the outcome of every page.
    async fn save_pages(
        &self,
        pool: &WorkerPool,
        sink: &Arc<DirectorySink>,
        batch: &Batch,
        pages: Vec<PageImage>,
        tally: &mut Tally,
    ) {
        let reporter = self.reporter(Stage::Save);
        reporter.stage_start(batch);

        let prior: Vec<(usize, Option<PageError>)> = pages
            .iter()
            .map(|p| (p.page_index, if p.is_missing() { p.error.clone() } else { None }))
            .collect();

        let started = Instant::now();
        let results = persist_batch(pool, sink, pages, &reporter).await;
        tally.save += started.elapsed();

        for ((idx, prior), result) in prior.into_iter().zip(results) {
            match result {
                Ok(Some(_)) => tally.produced.push(idx + 1),
                Ok(None) => {
                    tally.missing.push(idx + 1);
                    tally.errors.extend(prior);
                }
                Err(e) => {
                    tally.missing.push(idx + 1);
                    tally.errors.push(e);
                }
            }
        }
    }

    /// Record a run that stopped early: the slots already written stay,
    /// every other page is marked missing so nothing reads as pending.
    fn write_aborted_manifest(&self, sink: &DirectorySink, page_count: usize, produced: &mut Vec<usize>) {
        produced.sort_unstable();
        let missing = (1..=page_count)
            .filter(|n| produced.binary_search(n).is_err())
            .collect();
        let manifest = Manifest {
            page_count,
            produced: produced.clone(),
            missing,
            normalized_size: None,
            format: self.config.output_format,
            aborted: true,
        };
        match sink.write_manifest(&manifest) {
            Ok(()) => debug!("Run aborted with {} pages written", manifest.produced.len()),
            Err(e) => warn!("Could not write manifest for aborted run: {}", e),
        }
    }

    fn reporter(&self, stage: Stage) -> StageReporter {
        StageReporter::new(
            stage,
            Arc::clone(&self.progress),
            self.config.progress_callback.clone(),
        )
    }

    fn ensure_active(&self, completed_batches: usize, total_batches: usize) -> Result<(), Pdf2ImgError> {
        if self.cancel.is_cancelled() {
            return Err(Pdf2ImgError::Cancelled {
                completed_batches,
                total_batches,
            });
        }
        Ok(())
    }
}

/// Convert `path` with a fresh pdfium-backed [`Converter`].
///
/// # Example
///
/// ```rust,no_run
/// use edgequake_pdf2img::{run_conversion, ConversionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ConversionConfig::builder()
///         .batch_size(20)
///         .workers(4)
///         .output_dir("pages")
///         .build()?;
///     let outcome = run_conversion("document.pdf", &config).await?;
///     eprintln!("{} pages written, {} missing", outcome.pages_produced, outcome.pages_missing);
///     Ok(())
/// }
/// ```
pub async fn run_conversion(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<RunOutcome, Pdf2ImgError> {
    let converter = Converter::new(config.clone())?;
    converter.run(path).await
}

/// Synchronous wrapper around [`run_conversion`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_conversion_sync(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<RunOutcome, Pdf2ImgError> {
    let path: PathBuf = path.as_ref().to_path_buf();
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2ImgError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_conversion(path, config))
}
