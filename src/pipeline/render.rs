//! Page rasterisation: turn one page of a [`Document`] into a bitmap.
//!
//! The [`Rasterizer`] trait is the seam between the pipeline and the PDF
//! backend. [`PdfiumRasterizer`] is the production implementation; tests
//! plug in synthetic rasterisers with controllable sizes and failures.
//!
//! Every call is blocking and CPU-bound. Callers run it on the blocking
//! thread pool via [`crate::pipeline::pool::WorkerPool`].
//!
//! ## Sizing
//!
//! A page is rendered at `dpi` (page points × dpi / 72), then the longest
//! edge is capped at `max_rendered_pixels` with the other edge scaled
//! proportionally. An A0 poster at 200 DPI would otherwise produce a
//! 6,600 × 9,300 px bitmap per page.

use crate::config::ConversionConfig;
use crate::error::{PageError, Pdf2ImgError};
use crate::output::PageImage;
use crate::pipeline::source::Document;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Produces one bitmap per page of a document.
///
/// Implementations must be safe to call from many worker threads at once.
pub trait Rasterizer: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Open the document at `path` and return its page count.
    fn page_count(&self, path: &Path, password: Option<&str>) -> Result<usize, Pdf2ImgError>;

    /// Render the page at 0-based `page_index`.
    fn rasterize(&self, doc: &Document, page_index: usize) -> Result<DynamicImage, PageError>;
}

/// Render one page, turning any failure into a hole.
///
/// Never returns an error: a failed page becomes a [`PageImage`] without a
/// bitmap so the rest of the batch can proceed.
pub fn render_page(rasterizer: &dyn Rasterizer, doc: &Document, page_index: usize) -> PageImage {
    let result = rasterizer.rasterize(doc, page_index).and_then(|img| {
        if img.width() == 0 || img.height() == 0 {
            Err(PageError::RenderFailed {
                page: page_index + 1,
                detail: "backend produced an empty bitmap".into(),
            })
        } else {
            Ok(img)
        }
    });

    match result {
        Ok(img) => {
            debug!(
                "Rendered page {} → {}x{} px",
                page_index + 1,
                img.width(),
                img.height()
            );
            PageImage::rendered(page_index, img)
        }
        Err(e) => {
            warn!("{}", e);
            PageImage::missing(page_index, e)
        }
    }
}

/// Pixel dimensions for a page of `width_pts × height_pts` points.
///
/// Each edge is at least 1 px.
pub fn target_size(width_pts: f32, height_pts: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let scale = dpi as f32 / 72.0;
    let mut w = (width_pts.max(0.0) * scale).round();
    let mut h = (height_pts.max(0.0) * scale).round();

    let longest = w.max(h);
    if longest > max_pixels as f32 {
        let shrink = max_pixels as f32 / longest;
        w = (w * shrink).round();
        h = (h * shrink).round();
    }

    ((w as u32).max(1), (h as u32).max(1))
}

/// Rasteriser backed by the pdfium C++ library.
///
/// The library is bound per call and every call reloads the document, so
/// each worker owns its own handle. With the `thread_safe` feature
/// pdfium-render holds a process-wide lock for the whole lifetime of a
/// `Pdfium` instance (library init until drop). Every `rasterize` and
/// `page_count` call therefore runs one at a time, document reload
/// included, whatever `workers` is set to. Parallelism pays off in the
/// resize and save stages only.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    lib_path: Option<PathBuf>,
    dpi: u32,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    /// Create a rasteriser from the render settings in `config`.
    ///
    /// Binds once up front so a missing library is reported as
    /// [`Pdf2ImgError::PdfiumBindingFailed`] before any run starts.
    pub fn new(config: &ConversionConfig) -> Result<Self, Pdf2ImgError> {
        let rasterizer = Self {
            lib_path: config.pdfium_lib_path.clone(),
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
        };
        rasterizer.bind()?;
        Ok(rasterizer)
    }

    fn bind(&self) -> Result<Pdfium, Pdf2ImgError> {
        bind_pdfium(self.lib_path.as_deref())
    }
}

/// Bind to pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the working
/// directory, then the system library.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, Pdf2ImgError> {
    if let Some(path) = lib_path {
        return Pdfium::bind_to_library(path)
            .map(Pdfium::new)
            .map_err(|e| {
                Pdf2ImgError::PdfiumBindingFailed(format!("{}: {}", path.display(), e))
            });
    }

    if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Pdfium::bind_to_library(&p)
                .map(Pdfium::new)
                .map_err(|e| {
                    Pdf2ImgError::PdfiumBindingFailed(format!("{}: {}", p.display(), e))
                });
        }
        warn!(
            "PDFIUM_LIB_PATH '{}' not found; falling back to default search",
            p.display()
        );
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| Pdf2ImgError::PdfiumBindingFailed(e.to_string()))
}

fn open_error(path: &Path, password: Option<&str>, e: PdfiumError) -> Pdf2ImgError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            Pdf2ImgError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            Pdf2ImgError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        Pdf2ImgError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn name(&self) -> &str {
        "pdfium"
    }

    fn page_count(&self, path: &Path, password: Option<&str>) -> Result<usize, Pdf2ImgError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| open_error(path, password, e))?;
        Ok(document.pages().len() as usize)
    }

    fn rasterize(&self, doc: &Document, page_index: usize) -> Result<DynamicImage, PageError> {
        let page_num = page_index + 1;
        let fail = |detail: String| PageError::RenderFailed {
            page: page_num,
            detail,
        };

        let pdfium = self.bind().map_err(|e| fail(e.to_string()))?;
        let document = pdfium
            .load_pdf_from_file(doc.path(), doc.password())
            .map_err(|e| fail(format!("{:?}", e)))?;

        let idx = u16::try_from(page_index)
            .map_err(|_| fail(format!("page index {} exceeds backend limit", page_index)))?;
        let page = document
            .pages()
            .get(idx)
            .map_err(|e| fail(format!("{:?}", e)))?;

        let (w, h) = target_size(
            page.width().value,
            page.height().value,
            self.dpi,
            self.max_pixels,
        );
        let render_config = PdfRenderConfig::new()
            .set_target_width(w as i32)
            .set_target_height(h as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| fail(format!("{:?}", e)))?;

        Ok(DynamicImage::ImageRgb8(bitmap.as_image().into_rgb8()))
    }
}
