//! # edgequake-pdf2img
//!
//! Convert PDF documents into a directory of uniformly sized page images.
//!
//! Pages are rasterised in parallel on a bounded worker pool, processed in
//! batches to keep memory bounded, shrunk to one common size, and written to
//! stable numbered slots (`page_1.png`, `page_2.png`, …). Progress is
//! observable throughout, both by polling and by callback.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Source     validate path, count pages, split into batches
//!  ├─ 2. Convert    rasterise each page via pdfium (parallel, spawn_blocking)
//!  ├─ 3. Normalise  barrier: minimum width/height, then parallel resize
//!  ├─ 4. Save       atomic write to page_{n}.{png|jpg} (parallel)
//!  └─ 5. Manifest   manifest.json: produced / missing pages, common size
//! ```
//!
//! A page that fails in any stage becomes a *hole*: it is logged, reported
//! in [`RunOutcome::missing_pages`], and the run carries on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2img::{ConversionConfig, Converter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .batch_size(40)
//!         .output_dir("pages")
//!         .build()?;
//!     let converter = Arc::new(Converter::new(config)?);
//!
//!     let poller = {
//!         let c = Arc::clone(&converter);
//!         tokio::spawn(async move {
//!             loop {
//!                 eprintln!("{:.0}%", c.current_progress());
//!                 tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//!             }
//!         })
//!     };
//!
//!     let outcome = converter.run("document.pdf").await?;
//!     poller.abort();
//!     println!("{} pages, {} missing", outcome.pages_produced, outcome.pages_missing);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2img` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2img = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionConfig, ConversionConfigBuilder, NormalizeScope, OutputFormat, ResizeFilter,
    DEFAULT_BATCH_SIZE,
};
pub use convert::{run_conversion, run_conversion_sync, Converter};
pub use error::{PageError, Pdf2ImgError};
pub use output::{BatchResult, NormalizedSize, PageImage, RunOutcome, RunStats};
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
pub use pipeline::sink::{DirectorySink, Manifest, SlotStatus};
pub use pipeline::source::{Batch, Document, PageSource};
pub use progress::{
    ConversionProgressCallback, NoopProgressCallback, ProgressCallback, ProgressTracker, RunState,
    Stage,
};
