//! End-to-end integration tests for edgequake-pdf2img.
//!
//! These tests use real PDF files in `./test_cases/` and a real pdfium
//! library. They are gated behind the `E2E_ENABLED` environment variable so
//! they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=./libpdfium.so cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_irs_form -- --nocapture

use edgequake_pdf2img::{
    run_conversion, ConversionConfig, Converter, Document, NormalizeScope, OutputFormat,
    Pdf2ImgError, PdfiumRasterizer, Rasterizer, SlotStatus,
};
use image::GenericImageView;
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("test_cases/output")
        .join(name)
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP — test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Every slot in `dir` decodes and has the same dimensions; returns them.
fn assert_uniform_slots(dir: &Path, expected_count: usize, context: &str) -> (u32, u32) {
    let mut dims = None;
    for n in 1..=expected_count {
        let path = dir.join(format!("page_{n}.png"));
        let img = image::open(&path)
            .unwrap_or_else(|e| panic!("[{context}] {} unreadable: {e}", path.display()));
        let d = img.dimensions();
        assert!(d.0 > 0 && d.1 > 0, "[{context}] page_{n} is empty");
        match dims {
            None => dims = Some(d),
            Some(first) => assert_eq!(first, d, "[{context}] page_{n} differs in size"),
        }
    }
    let dims = dims.unwrap_or((0, 0));
    println!("[{context}] ✓  {expected_count} slots at {}x{}", dims.0, dims.1);
    dims
}

// ── Conversion tests ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_irs_form() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));
    let out = output_dir("irs_form");

    let config = ConversionConfig::builder()
        .batch_size(1)
        .workers(2)
        .dpi(100)
        .output_dir(&out)
        .build()
        .unwrap();
    let outcome = run_conversion(&path, &config)
        .await
        .expect("conversion should succeed");

    assert_eq!(outcome.page_count, 2);
    assert_eq!(outcome.pages_missing, 0);
    assert_eq!(outcome.batches, 2);
    let dims = assert_uniform_slots(&out, 2, "irs_form");
    let size = outcome.normalized_size.unwrap();
    assert_eq!((size.width, size.height), dims);
}

#[tokio::test]
async fn test_arxiv_paper_batches() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));
    let out = output_dir("attention");

    let config = ConversionConfig::builder()
        .batch_size(4)
        .dpi(72)
        .output_dir(&out)
        .build()
        .unwrap();
    let converter = Converter::new(config).expect("pdfium should bind");
    let outcome = converter.run(&path).await.expect("conversion should succeed");

    assert_eq!(outcome.page_count, 15);
    assert_eq!(outcome.batches, 4);
    assert_eq!(converter.current_progress(), 100.0);
    assert_uniform_slots(&out, 15, "attention");

    let sink = converter.output();
    assert_eq!(sink.page_count(), 15);
    assert!(matches!(sink.slot_status(15), SlotStatus::Ready(_)));
    assert_eq!(sink.slot_status(16), SlotStatus::OutOfRange);
}

#[tokio::test]
async fn test_max_pixels_caps_longest_edge() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));
    let out = output_dir("irs_capped");

    let config = ConversionConfig::builder()
        .dpi(600)
        .max_rendered_pixels(500)
        .output_dir(&out)
        .build()
        .unwrap();
    let outcome = run_conversion(&path, &config).await.unwrap();

    let size = outcome.normalized_size.unwrap();
    assert!(size.width.max(size.height) <= 500, "got {size:?}");
}

#[tokio::test]
async fn test_jpeg_batch_scope() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));
    let out = output_dir("irs_jpeg");

    let config = ConversionConfig::builder()
        .batch_size(1)
        .output_format(OutputFormat::Jpeg)
        .jpeg_quality(70)
        .normalize_scope(NormalizeScope::Batch)
        .output_dir(&out)
        .build()
        .unwrap();
    let outcome = run_conversion(&path, &config).await.unwrap();

    assert_eq!(outcome.pages_produced, 2);
    assert!(out.join("page_1.jpg").exists());
    assert!(out.join("page_2.jpg").exists());
}

#[test]
fn test_rasterize_same_page_twice() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));
    let config = ConversionConfig::builder().dpi(100).build().unwrap();
    let rasterizer = PdfiumRasterizer::new(&config).expect("pdfium should bind");

    let pages = rasterizer.page_count(&path, None).unwrap();
    let doc = Document::new(&path, None, pages);
    let first = rasterizer.rasterize(&doc, 0).unwrap();
    let second = rasterizer.rasterize(&doc, 0).unwrap();

    assert_eq!(first.dimensions(), second.dimensions());
    assert!(first.as_bytes() == second.as_bytes(), "page 1 pixels differ between renders");
}

#[tokio::test]
async fn test_not_a_pdf_is_rejected() {
    let path = e2e_skip_unless_ready!(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"));
    let config = ConversionConfig::builder()
        .output_dir(output_dir("not_a_pdf"))
        .build()
        .unwrap();
    let err = run_conversion(&path, &config).await.unwrap_err();
    assert!(matches!(err, Pdf2ImgError::NotAPdf { .. }), "got {err}");
}
