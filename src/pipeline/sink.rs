//! Output sink: one image file per page in a flat directory.
//!
//! Slot names are derived from the global 0-based page index as
//! `page_{index + 1}.{png|jpg}`, so output order survives batch
//! partitioning and no two workers ever target the same file. Each write
//! goes to `<slot>.tmp` first and is renamed into place; a poller listing
//! the directory never sees a half-written image.
//!
//! At the end of a run, finished or aborted, the orchestrator writes
//! `manifest.json`, which lets a retrieval layer tell a page that failed
//! ([`SlotStatus::Missing`]) from one that has not been written yet
//! ([`SlotStatus::Pending`]).

use crate::config::OutputFormat;
use crate::error::{PageError, Pdf2ImgError};
use crate::output::{NormalizedSize, PageImage};
use crate::pipeline::pool::{TaskError, WorkerPool};
use crate::progress::StageReporter;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// File name of the run manifest inside the output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Slot file names: `page_12.png`, `page_3.jpg`.
static SLOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^page_(\d+)\.(png|jpg)$").unwrap());

/// Leftovers of interrupted atomic writes.
static TMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(page_\d+\.(png|jpg)|manifest\.json)\.tmp$").unwrap());

/// Summary of a finished run, persisted next to the slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub page_count: usize,
    /// 1-based page numbers with a slot file.
    pub produced: Vec<usize>,
    /// 1-based page numbers that failed and have no slot file.
    pub missing: Vec<usize>,
    pub normalized_size: Option<NormalizedSize>,
    pub format: OutputFormat,
    /// The run stopped early (cancelled or failed); pages it never reached
    /// are listed in `missing`.
    #[serde(default)]
    pub aborted: bool,
}

/// What a retrieval layer should make of a requested page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    /// The image exists at this path.
    Ready(PathBuf),
    /// The run finished without producing this page.
    Missing,
    /// No image yet and no finished run says otherwise.
    Pending,
    /// The finished run has fewer pages than requested.
    OutOfRange,
}

/// Parse a slot file name into its 1-based page number.
pub fn parse_slot_name(name: &str) -> Option<usize> {
    SLOT_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Encode `img` in memory.
pub fn encode_image(
    img: &DynamicImage,
    format: OutputFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        }
        OutputFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality);
            encoder.encode_image(&img.to_rgb8())?;
        }
    }
    Ok(buf)
}

/// A directory of page slots.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    format: OutputFormat,
    jpeg_quality: u8,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, format: OutputFormat, jpeg_quality: u8) -> Self {
        Self {
            dir: dir.into(),
            format,
            jpeg_quality,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Create the directory and remove every artifact a previous run left:
    /// slot files of either format, temp files, and the manifest.
    ///
    /// Files the sink does not own are left in place.
    pub fn prepare(&self) -> Result<(), Pdf2ImgError> {
        let dir_err = |source: std::io::Error| Pdf2ImgError::OutputDirFailed {
            path: self.dir.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(dir_err)?;

        let mut removed = 0usize;
        for entry in std::fs::read_dir(&self.dir).map_err(dir_err)? {
            let entry = entry.map_err(dir_err)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let owned = SLOT_RE.is_match(name) || TMP_RE.is_match(name) || name == MANIFEST_FILE;
            if owned && entry.file_type().map_err(dir_err)?.is_file() {
                std::fs::remove_file(entry.path()).map_err(dir_err)?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Cleared {} stale files from {}", removed, self.dir.display());
        }
        Ok(())
    }

    /// Path of the slot for a 0-based global page index.
    pub fn slot_path(&self, page_index: usize) -> PathBuf {
        self.dir
            .join(format!("page_{}.{}", page_index + 1, self.format.extension()))
    }

    /// Encode and atomically write `img` to its slot.
    pub fn save(&self, img: &DynamicImage, page_index: usize) -> Result<PathBuf, PageError> {
        let path = self.slot_path(page_index);
        let fail = |detail: String| PageError::SaveFailed {
            page: page_index + 1,
            path: path.clone(),
            detail,
        };

        let bytes = encode_image(img, self.format, self.jpeg_quality).map_err(|e| fail(e.to_string()))?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, &bytes).map_err(|e| fail(e.to_string()))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(fail(e.to_string()));
        }

        debug!("Saved page {} → {} ({} bytes)", page_index + 1, path.display(), bytes.len());
        Ok(path)
    }

    /// Decode the slot for `page_index`.
    pub fn load(&self, page_index: usize) -> Result<DynamicImage, image::ImageError> {
        image::open(self.slot_path(page_index))
    }

    /// Every slot file currently in the directory, as `(page_num, path)`
    /// sorted by page number.
    pub fn list_slots(&self) -> std::io::Result<Vec<(usize, PathBuf)>> {
        let mut slots = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(num) = entry.file_name().to_str().and_then(parse_slot_name) {
                slots.push((num, entry.path()));
            }
        }
        slots.sort_by_key(|(num, _)| *num);
        Ok(slots)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<(), Pdf2ImgError> {
        let path = self.manifest_path();
        let io_err = |source: std::io::Error| Pdf2ImgError::OutputDirFailed {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| Pdf2ImgError::Internal(format!("Manifest serialisation failed: {}", e)))?;

        let tmp = self.dir.join(format!("{}.tmp", MANIFEST_FILE));
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }

    /// The manifest of the last finished run, if any.
    ///
    /// An unreadable or malformed manifest is treated as absent.
    pub fn read_manifest(&self) -> Option<Manifest> {
        let bytes = std::fs::read(self.manifest_path()).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Ignoring malformed {}: {}", MANIFEST_FILE, e);
                None
            }
        }
    }

    /// Status of the slot for 1-based `page_num`.
    pub fn slot_status(&self, page_num: usize) -> SlotStatus {
        if page_num >= 1 {
            let path = self.slot_path(page_num - 1);
            if path.is_file() {
                return SlotStatus::Ready(path);
            }
        }
        match self.read_manifest() {
            Some(m) if page_num == 0 || page_num > m.page_count => SlotStatus::OutOfRange,
            Some(_) => SlotStatus::Missing,
            None => SlotStatus::Pending,
        }
    }

    /// Page count for paging controls: the manifest's when present,
    /// otherwise the highest slot number on disk.
    pub fn page_count(&self) -> usize {
        if let Some(m) = self.read_manifest() {
            return m.page_count;
        }
        self.list_slots()
            .ok()
            .and_then(|slots| slots.last().map(|(num, _)| *num))
            .unwrap_or(0)
    }
}

/// Save every page of a batch through the worker pool.
///
/// Returns one entry per input page, in input order: `Ok(Some(path))` for a
/// written slot, `Ok(None)` for a hole that was skipped, `Err` for a page
/// whose save failed. Every page is counted once for the save stage.
pub async fn persist_batch(
    pool: &WorkerPool,
    sink: &Arc<DirectorySink>,
    pages: Vec<PageImage>,
    reporter: &StageReporter,
) -> Vec<Result<Option<PathBuf>, PageError>> {
    let indices: Vec<usize> = pages.iter().map(|p| p.page_index).collect();
    let task_sink = Arc::clone(sink);
    let task_reporter = reporter.clone();

    let results = pool
        .run(pages, move |page| {
            let result = match page.bitmap {
                Some(ref bitmap) => task_sink.save(bitmap, page.page_index).map(Some),
                None => Ok(None),
            };
            if let Err(ref e) = result {
                warn!("{}", e);
            }
            task_reporter.page_done(page.page_index, result.as_ref().err());
            result
        })
        .await;

    indices
        .into_iter()
        .zip(results)
        .map(|(idx, r)| match r {
            Ok(saved) => saved,
            Err(e) => {
                let err = PageError::SaveFailed {
                    page: idx + 1,
                    path: sink.slot_path(idx),
                    detail: e.to_string(),
                };
                if let TaskError::Panicked(_) = e {
                    warn!("{}", err);
                    reporter.page_done(idx, Some(&err));
                }
                Err(err)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pool::CancelFlag;
    use crate::progress::{ProgressTracker, Stage};
    use image::RgbImage;

    fn img(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([200, 10, 10])))
    }

    #[test]
    fn slot_names_are_one_based() {
        let sink = DirectorySink::new("out", OutputFormat::Png, 90);
        assert_eq!(sink.slot_path(0), PathBuf::from("out/page_1.png"));
        let jpg = DirectorySink::new("out", OutputFormat::Jpeg, 90);
        assert_eq!(jpg.slot_path(41), PathBuf::from("out/page_42.jpg"));
    }

    #[test]
    fn parse_slot_name_accepts_only_slots() {
        assert_eq!(parse_slot_name("page_7.png"), Some(7));
        assert_eq!(parse_slot_name("page_12.jpg"), Some(12));
        assert_eq!(parse_slot_name("page_7.png.tmp"), None);
        assert_eq!(parse_slot_name("cover.png"), None);
        assert_eq!(parse_slot_name("page_x.png"), None);
    }

    #[test]
    fn save_then_load_keeps_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path(), OutputFormat::Png, 90);
        sink.prepare().unwrap();

        let path = sink.save(&img(31, 17), 4).unwrap();
        assert!(path.ends_with("page_5.png"));
        let back = sink.load(4).unwrap();
        assert_eq!((back.width(), back.height()), (31, 17));
        // no temp file left behind
        assert!(!dir.path().join("page_5.png.tmp").exists());
    }

    #[test]
    fn jpeg_slots_decode() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path(), OutputFormat::Jpeg, 75);
        sink.prepare().unwrap();
        sink.save(&img(16, 16), 0).unwrap();
        let back = image::open(dir.path().join("page_1.jpg")).unwrap();
        assert_eq!(back.width(), 16);
    }

    #[test]
    fn prepare_removes_only_owned_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page_1.png", "page_2.jpg", "page_3.png.tmp", "manifest.json", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"stale").unwrap();
        }
        let sink = DirectorySink::new(dir.path(), OutputFormat::Png, 90);
        sink.prepare().unwrap();

        let left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec!["notes.txt".to_string()]);
    }

    #[test]
    fn prepare_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/pages");
        DirectorySink::new(&nested, OutputFormat::Png, 90).prepare().unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn slot_status_distinguishes_missing_from_pending() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path(), OutputFormat::Png, 90);
        sink.prepare().unwrap();
        sink.save(&img(4, 4), 0).unwrap();

        // run still going: no manifest yet
        assert!(matches!(sink.slot_status(1), SlotStatus::Ready(_)));
        assert_eq!(sink.slot_status(2), SlotStatus::Pending);
        assert_eq!(sink.page_count(), 1);

        sink.write_manifest(&Manifest {
            page_count: 2,
            produced: vec![1],
            missing: vec![2],
            normalized_size: Some(NormalizedSize { width: 4, height: 4 }),
            format: OutputFormat::Png,
            aborted: false,
        })
        .unwrap();

        assert_eq!(sink.slot_status(2), SlotStatus::Missing);
        assert_eq!(sink.slot_status(3), SlotStatus::OutOfRange);
        assert_eq!(sink.slot_status(0), SlotStatus::OutOfRange);
        assert_eq!(sink.page_count(), 2);
        assert_eq!(sink.read_manifest().unwrap().missing, vec![2]);
    }

    #[test]
    fn list_slots_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path(), OutputFormat::Png, 90);
        sink.prepare().unwrap();
        for idx in [9, 1, 0] {
            sink.save(&img(2, 2), idx).unwrap();
        }
        let nums: Vec<usize> = sink.list_slots().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(nums, vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn persist_batch_skips_holes_and_counts_them() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(DirectorySink::new(dir.path(), OutputFormat::Png, 90));
        sink.prepare().unwrap();
        let tracker = Arc::new(ProgressTracker::new());
        tracker.begin(3);
        let reporter = StageReporter::new(Stage::Save, Arc::clone(&tracker), None);
        let pool = WorkerPool::new(2, CancelFlag::new());

        let pages = vec![
            PageImage::rendered(3, img(5, 5)),
            PageImage::missing(
                4,
                PageError::RenderFailed {
                    page: 5,
                    detail: "x".into(),
                },
            ),
            PageImage::rendered(5, img(5, 5)),
        ];
        let results = persist_batch(&pool, &sink, pages, &reporter).await;

        assert!(results[0].as_ref().unwrap().as_ref().unwrap().ends_with("page_4.png"));
        assert_eq!(results[1], Ok(None));
        assert!(results[2].as_ref().unwrap().is_some());
        assert!(!dir.path().join("page_5.png").exists());
        assert_eq!(tracker.completed(Stage::Save), 3);
    }

    #[tokio::test]
    async fn save_into_vanished_directory_is_a_page_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let sink = Arc::new(DirectorySink::new(&gone, OutputFormat::Png, 90));
        let tracker = Arc::new(ProgressTracker::new());
        tracker.begin(1);
        let reporter = StageReporter::new(Stage::Save, Arc::clone(&tracker), None);
        let pool = WorkerPool::new(1, CancelFlag::new());

        let results = persist_batch(&pool, &sink, vec![PageImage::rendered(0, img(3, 3))], &reporter).await;
        assert!(matches!(results[0], Err(PageError::SaveFailed { page: 1, .. })));
        assert_eq!(tracker.completed(Stage::Save), 1);
    }
}
