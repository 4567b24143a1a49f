//! Progress reporting: a pollable [`ProgressTracker`] and a push-style
//! [`ConversionProgressCallback`].
//!
//! The tracker is owned by one [`crate::convert::Converter`] and handed to
//! workers through an `Arc`; it is never a process-wide global, so two
//! converters never share counters. Workers only ever increment; observers
//! only ever load. [`ProgressTracker::value`] is a weighted sum of per-stage
//! completion fractions:
//!
//! | Stage   | Weight |
//! |---------|--------|
//! | Convert | 33     |
//! | Resize  | 33     |
//! | Save    | 34     |
//!
//! Every stage counts each page exactly once (missing pages included), so a
//! finished run reads exactly 100.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2img::{ConversionProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     saved: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, stage: Stage, page_num: usize, percent: f64) {
//!         if stage == Stage::Save {
//!             self.saved.fetch_add(1, Ordering::SeqCst);
//!             eprintln!("page {page_num} saved ({percent:.0}%)");
//!         }
//!     }
//! }
//! ```

use crate::error::{PageError, Pdf2ImgError};
use crate::output::RunOutcome;
use crate::pipeline::source::Batch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// A pipeline stage that contributes to progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Convert,
    Resize,
    Save,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Convert, Stage::Resize, Stage::Save];

    /// Share of the 0–100 range this stage accounts for.
    pub fn weight(self) -> u64 {
        match self {
            Stage::Convert => 33,
            Stage::Resize => 33,
            Stage::Save => 34,
        }
    }

    fn slot(self) -> usize {
        match self {
            Stage::Convert => 0,
            Stage::Resize => 1,
            Stage::Save => 2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Convert => "convert",
            Stage::Resize => "resize",
            Stage::Save => "save",
        };
        f.pad(s)
    }
}

/// Where a run currently is.
///
/// `Idle → Converting → Resizing → Saving → Done`; a fatal error drops back
/// to `Idle`. Per-page failures never change the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Converting,
    Resizing,
    Saving,
    Done,
}

impl RunState {
    fn to_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Converting => 1,
            RunState::Resizing => 2,
            RunState::Saving => 3,
            RunState::Done => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Converting,
            2 => RunState::Resizing,
            3 => RunState::Saving,
            4 => RunState::Done,
            _ => RunState::Idle,
        }
    }

    /// The state a stage runs in.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Convert => RunState::Converting,
            Stage::Resize => RunState::Resizing,
            Stage::Save => RunState::Saving,
        }
    }
}

/// Lock-free progress counters for one run at a time.
#[derive(Debug)]
pub struct ProgressTracker {
    total_units: AtomicU64,
    done: [AtomicU64; 3],
    state: AtomicU8,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total_units: AtomicU64::new(0),
            done: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            state: AtomicU8::new(RunState::Idle.to_u8()),
        }
    }

    /// Zero every counter and return to `Idle`. Called at the start of a run.
    pub fn reset(&self) {
        self.total_units.store(0, Ordering::SeqCst);
        for d in &self.done {
            d.store(0, Ordering::SeqCst);
        }
        self.set_state(RunState::Idle);
    }

    /// Set the number of units (pages) each stage will report.
    pub fn begin(&self, total_units: usize) {
        self.total_units.store(total_units as u64, Ordering::SeqCst);
    }

    /// Record `delta` completed units for `stage`. Safe from any thread.
    pub fn advance(&self, stage: Stage, delta: u64) {
        self.done[stage.slot()].fetch_add(delta, Ordering::SeqCst);
    }

    /// Weighted completion in `[0, 100]`.
    ///
    /// Counters only grow during a run, so successive reads never decrease.
    pub fn value(&self) -> f64 {
        let total = self.total_units.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        let sum: f64 = Stage::ALL
            .iter()
            .map(|&stage| {
                let done = self.done[stage.slot()].load(Ordering::SeqCst).min(total);
                stage.weight() as f64 * done as f64 / total as f64
            })
            .sum();
        sum.min(100.0)
    }

    /// Completed units for one stage.
    pub fn completed(&self, stage: Stage) -> u64 {
        self.done[stage.slot()].load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: RunState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Abandon the run: counters back to zero, state back to `Idle`.
    pub fn fail(&self) {
        self.reset();
    }
}

/// Called by the pipeline as it moves through stages and pages.
///
/// Implementations must be `Send + Sync`: page events arrive concurrently
/// from worker threads, in completion order. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after the document is opened.
    fn on_conversion_start(&self, total_pages: usize, total_batches: usize) {
        let _ = (total_pages, total_batches);
    }

    /// Called when a stage starts working on a batch.
    fn on_stage_start(&self, stage: Stage, batch: &Batch) {
        let _ = (stage, batch);
    }

    /// Called after a page finishes a stage (a skipped hole counts as finished).
    ///
    /// * `page_num` — 1-indexed page number
    /// * `percent`  — tracker value right after this page was counted
    fn on_page_complete(&self, stage: Stage, page_num: usize, percent: f64) {
        let _ = (stage, page_num, percent);
    }

    /// Called when a page fails in a stage and becomes a hole.
    fn on_page_error(&self, stage: Stage, error: &PageError) {
        let _ = (stage, error);
    }

    /// Called once when the run completes (possibly with holes).
    fn on_conversion_complete(&self, outcome: &RunOutcome) {
        let _ = outcome;
    }

    /// Called once when the run aborts with a fatal error.
    fn on_conversion_failed(&self, error: &Pdf2ImgError) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

/// Per-stage progress handle captured by worker closures.
///
/// Bundles the stage identity with the tracker and the optional callback so
/// a worker can attribute its completion without knowing anything else
/// about the run.
#[derive(Clone)]
pub struct StageReporter {
    stage: Stage,
    tracker: Arc<ProgressTracker>,
    callback: Option<ProgressCallback>,
}

impl StageReporter {
    pub fn new(stage: Stage, tracker: Arc<ProgressTracker>, callback: Option<ProgressCallback>) -> Self {
        Self {
            stage,
            tracker,
            callback,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Count one page for this stage and notify the callback.
    pub fn page_done(&self, page_index: usize, error: Option<&PageError>) {
        self.tracker.advance(self.stage, 1);
        if let Some(ref cb) = self.callback {
            if let Some(e) = error {
                cb.on_page_error(self.stage, e);
            }
            cb.on_page_complete(self.stage, page_index + 1, self.tracker.value());
        }
    }

    /// Notify the callback that this stage begins on `batch`.
    pub fn stage_start(&self, batch: &Batch) {
        self.tracker.set_state(RunState::for_stage(self.stage));
        if let Some(ref cb) = self.callback {
            cb.on_stage_start(self.stage, batch);
        }
    }
}
