//! CLI binary for edgequake-pdf2img.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2img::{
    Batch, ConversionConfig, ConversionProgressCallback, Converter, NormalizeScope, OutputFormat,
    PageError, Pdf2ImgError, ProgressCallback, ResizeFilter, RunOutcome, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a single 0–100 bar fed by the tracker's
/// percentage, plus one log line per failed page. Page events arrive out of
/// order from worker threads; the bar only ever moves forward.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Starts as a spinner; `on_conversion_start` switches to the bar.
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}%  {msg}  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(100);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize, total_batches: usize) {
        self.activate_bar();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Converting {total_pages} pages in {total_batches} batch(es)…"
            ))
        ));
    }

    fn on_stage_start(&self, stage: Stage, batch: &Batch) {
        self.bar.set_message(format!(
            "{stage} pages {}–{}",
            batch.start + 1,
            batch.end
        ));
    }

    fn on_page_complete(&self, _stage: Stage, _page_num: usize, percent: f64) {
        let pos = percent.floor() as u64;
        if pos > self.bar.position() {
            self.bar.set_position(pos);
        }
    }

    fn on_page_error(&self, stage: Stage, error: &PageError) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        let mut msg = error.to_string();
        if msg.chars().count() > 80 {
            msg = msg.chars().take(79).collect::<String>() + "\u{2026}";
        }
        self.bar
            .println(format!("  {} {:<7} {}", red("✗"), stage, red(&msg)));
    }

    fn on_conversion_complete(&self, outcome: &RunOutcome) {
        self.bar.finish_and_clear();

        if outcome.pages_missing == 0 {
            eprintln!(
                "{} {} pages written",
                green("✔"),
                bold(&outcome.pages_produced.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages written  ({} missing)",
                if outcome.pages_produced == 0 {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&outcome.pages_produced.to_string()),
                outcome.page_count,
                red(&outcome.pages_missing.to_string()),
            );
        }
    }

    fn on_conversion_failed(&self, _error: &Pdf2ImgError) {
        self.bar.abandon();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert into ./pages (page_1.png, page_2.png, …)
  pdf2img document.pdf

  # Custom output directory, smaller batches, 8 workers
  pdf2img document.pdf -o static/images --batch-size 20 --workers 8

  # JPEG output at 300 DPI
  pdf2img --format jpeg --jpeg-quality 85 --dpi 300 scan.pdf

  # Legacy per-batch sizing
  pdf2img --scope batch document.pdf

  # Machine-readable outcome
  pdf2img --json document.pdf > outcome.json

OUTPUT:
  One file per page named page_<N>.<ext> (N is 1-based), all with the same
  dimensions, plus manifest.json listing produced and missing pages.
  Existing page_*.png / page_*.jpg files in the output directory are
  removed before the run; other files are left alone.

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  RUST_LOG                Override log filter (e.g. edgequake_pdf2img=debug)
"#;

/// Convert PDF pages into uniformly sized images.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2img",
    version,
    about = "Convert PDF pages into uniformly sized images",
    long_about = "Rasterise every page of a PDF in parallel, shrink all pages to one common \
size, and write them as numbered image files. Pages that fail are reported and skipped; \
the rest of the document is still converted.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    input: PathBuf,

    /// Directory receiving the page images.
    #[arg(short, long, env = "PDF2IMG_OUTPUT_DIR", default_value = "pages")]
    output_dir: PathBuf,

    /// Pages per batch (bounds peak memory).
    #[arg(long, env = "PDF2IMG_BATCH_SIZE", default_value_t = edgequake_pdf2img::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Worker threads (default: available parallelism).
    #[arg(short, long, env = "PDF2IMG_WORKERS")]
    workers: Option<usize>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PDF2IMG_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Cap on the longest rendered edge, in pixels.
    #[arg(long, env = "PDF2IMG_MAX_PIXELS", default_value_t = 4000)]
    max_pixels: u32,

    /// Image format: png or jpeg.
    #[arg(long, env = "PDF2IMG_FORMAT", value_enum, default_value = "png")]
    format: FormatArg,

    /// JPEG quality (1–100).
    #[arg(long, env = "PDF2IMG_JPEG_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Downsampling filter.
    #[arg(long, env = "PDF2IMG_FILTER", value_enum, default_value = "lanczos3")]
    filter: FilterArg,

    /// Normalisation scope: document (one size for all pages) or batch.
    #[arg(long, env = "PDF2IMG_SCOPE", value_enum, default_value = "document")]
    scope: ScopeArg,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2IMG_PASSWORD")]
    password: Option<String>,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDF2IMG_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Print the run outcome as JSON on stdout.
    #[arg(long, env = "PDF2IMG_JSON")]
    json: bool,

    /// Exit with an error if any page is missing.
    #[arg(long, env = "PDF2IMG_STRICT")]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2IMG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2IMG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2IMG_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Png,
    Jpeg,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpeg => OutputFormat::Jpeg,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FilterArg {
    Nearest,
    Triangle,
    Catmullrom,
    Gaussian,
    Lanczos3,
}

impl From<FilterArg> for ResizeFilter {
    fn from(v: FilterArg) -> Self {
        match v {
            FilterArg::Nearest => ResizeFilter::Nearest,
            FilterArg::Triangle => ResizeFilter::Triangle,
            FilterArg::Catmullrom => ResizeFilter::CatmullRom,
            FilterArg::Gaussian => ResizeFilter::Gaussian,
            FilterArg::Lanczos3 => ResizeFilter::Lanczos3,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ScopeArg {
    Document,
    Batch,
}

impl From<ScopeArg> for NormalizeScope {
    fn from(v: ScopeArg) -> Self {
        match v {
            ScopeArg::Document => NormalizeScope::Document,
            ScopeArg::Batch => NormalizeScope::Batch,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs would fight with the progress bar for the
    // terminal; the bar is enough feedback while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let converter = Arc::new(Converter::new(config).context("Failed to initialise converter")?);
    let settings = converter.config();
    tracing::debug!(
        "Rendering at {} DPI, {} per batch, {} workers → {}",
        settings.dpi,
        settings.batch_size,
        settings.workers,
        settings.output_dir.display()
    );

    let ctrl_c = {
        let converter = Arc::clone(&converter);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                converter.cancel();
            }
        })
    };

    let result = converter.run(&cli.input).await;
    ctrl_c.abort();
    let outcome = result.with_context(|| format!("Conversion of {} failed", cli.input.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        // The callback already printed the summary when the bar was shown.
        eprintln!(
            "Wrote {}/{} pages to {} in {}ms",
            outcome.pages_produced,
            outcome.page_count,
            outcome.output_dir.display(),
            outcome.stats.total_duration_ms
        );
        if !outcome.missing_pages.is_empty() {
            eprintln!("  missing pages: {:?}", outcome.missing_pages);
        }
    } else if !cli.quiet {
        if let Some(size) = outcome.normalized_size {
            eprintln!(
                "   {}",
                dim(&format!(
                    "{}x{} px  →  {}  ({}ms)",
                    size.width,
                    size.height,
                    outcome.output_dir.display(),
                    outcome.stats.total_duration_ms
                ))
            );
        }
    }

    if cli.strict {
        outcome.into_result().context("Some pages are missing")?;
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .batch_size(cli.batch_size)
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .output_dir(&cli.output_dir)
        .output_format(cli.format.into())
        .jpeg_quality(cli.jpeg_quality)
        .resize_filter(cli.filter.into())
        .normalize_scope(cli.scope.into());

    if let Some(n) = cli.workers {
        builder = builder.workers(n);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
