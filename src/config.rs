//! Configuration types for PDF-to-image conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Setters store values as given;
//! [`ConversionConfigBuilder::build`] rejects anything out of range with
//! [`Pdf2ImgError::InvalidConfig`] before a run can start.

use crate::error::Pdf2ImgError;
use crate::progress::ProgressCallback;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default number of pages per batch.
pub const DEFAULT_BATCH_SIZE: usize = 40;

/// Configuration for a PDF-to-image conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2img::{ConversionConfig, OutputFormat};
///
/// let config = ConversionConfig::builder()
///     .batch_size(20)
///     .workers(4)
///     .output_dir("static/images")
///     .output_format(OutputFormat::Png)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Pages per batch. Default: 40.
    ///
    /// Batches run one after another; every page inside a batch runs in
    /// parallel. Peak memory is roughly one batch of decoded bitmaps.
    pub batch_size: usize,

    /// Size of the worker pool. Default: available parallelism.
    pub workers: usize,

    /// Rendering DPI used when rasterising each page. Range: 72–600. Default: 200.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4000.
    ///
    /// Caps the longest edge independently of DPI, scaling the other edge
    /// proportionally, so an oversized page cannot exhaust memory.
    pub max_rendered_pixels: u32,

    /// Directory receiving one image per page. Default: `pages`.
    pub output_dir: PathBuf,

    /// Encoding of the page images. Default: [`OutputFormat::Png`].
    pub output_format: OutputFormat,

    /// JPEG quality (1–100), used only with [`OutputFormat::Jpeg`]. Default: 90.
    pub jpeg_quality: u8,

    /// Downsampling filter used by the normaliser. Default: Lanczos3.
    pub resize_filter: ResizeFilter,

    /// Scope of the minimum-size reduction. Default: [`NormalizeScope::Document`].
    pub normalize_scope: NormalizeScope,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit path to the pdfium shared library.
    ///
    /// When `None`, `PDFIUM_LIB_PATH`, the working directory and the system
    /// library search path are tried in that order.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Optional push-style progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: default_workers(),
            dpi: 200,
            max_rendered_pixels: 4000,
            output_dir: PathBuf::from("pages"),
            output_format: OutputFormat::default(),
            jpeg_quality: 90,
            resize_filter: ResizeFilter::default(),
            normalize_scope: NormalizeScope::default(),
            password: None,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("batch_size", &self.batch_size)
            .field("workers", &self.workers)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("output_dir", &self.output_dir)
            .field("output_format", &self.output_format)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("resize_filter", &self.resize_filter)
            .field("normalize_scope", &self.normalize_scope)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), Pdf2ImgError> {
        if self.batch_size == 0 {
            return Err(Pdf2ImgError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        if self.workers == 0 {
            return Err(Pdf2ImgError::InvalidConfig(
                "Worker count must be ≥ 1".into(),
            ));
        }
        if !(72..=600).contains(&self.dpi) {
            return Err(Pdf2ImgError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                self.dpi
            )));
        }
        if self.max_rendered_pixels < 100 {
            return Err(Pdf2ImgError::InvalidConfig(format!(
                "Max rendered pixels must be ≥ 100, got {}",
                self.max_rendered_pixels
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Pdf2ImgError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                self.jpeg_quality
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Pdf2ImgError::InvalidConfig(
                "Output directory must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Worker count used when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q;
        self
    }

    pub fn resize_filter(mut self, filter: ResizeFilter) -> Self {
        self.config.resize_filter = filter;
        self
    }

    pub fn normalize_scope(mut self, scope: NormalizeScope) -> Self {
        self.config.normalize_scope = scope;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2ImgError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Encoding used for page slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless PNG (default).
    #[default]
    Png,
    /// JPEG at [`ConversionConfig::jpeg_quality`].
    Jpeg,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

/// Downsampling filter for the normaliser.
///
/// All filters are deterministic; Lanczos3 keeps text edges sharpest when
/// shrinking and is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    #[default]
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(f: ResizeFilter) -> Self {
        match f {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Over which set of pages the common (minimum) size is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeScope {
    /// One size for the whole document (default). Pages are staged on disk
    /// between the convert pass and the resize pass.
    #[default]
    Document,
    /// One size per batch. Pages in different batches can end up with
    /// different sizes; kept for compatibility with older output.
    Batch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConversionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 40);
        assert!(config.workers >= 1);
        assert_eq!(config.output_format, OutputFormat::Png);
        assert_eq!(config.normalize_scope, NormalizeScope::Document);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = ConversionConfig::builder().batch_size(0).build().unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("Batch size"));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = ConversionConfig::builder().workers(0).build().unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn dpi_out_of_range_rejected() {
        assert!(ConversionConfig::builder().dpi(50).build().is_err());
        assert!(ConversionConfig::builder().dpi(601).build().is_err());
        assert!(ConversionConfig::builder().dpi(300).build().is_ok());
    }

    #[test]
    fn jpeg_quality_bounds() {
        assert!(ConversionConfig::builder().jpeg_quality(0).build().is_err());
        assert!(ConversionConfig::builder().jpeg_quality(100).build().is_ok());
    }

    #[test]
    fn debug_redacts_password() {
        let config = ConversionConfig::builder()
            .password("hunter2")
            .build()
            .unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn format_extensions() {
        assert_eq!(OutputFormat::Png.extension(), "png");
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
    }

    #[test]
    fn filter_maps_to_image_filter() {
        assert_eq!(FilterType::from(ResizeFilter::Lanczos3), FilterType::Lanczos3);
        assert_eq!(FilterType::from(ResizeFilter::Nearest), FilterType::Nearest);
    }
}
