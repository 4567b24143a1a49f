//! Pipeline stages for PDF-to-image conversion.
//!
//! Each submodule implements exactly one step, so each is testable alone and
//! the rendering backend can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ batch ──▶ normalize ──▶ sink
//! (path)   (batches)  (render)  (min+resize)  (slots)
//! ```
//!
//! 1. [`input`]     — validate the user-supplied path before any backend sees it
//! 2. [`source`]    — open the document, split `[0, page_count)` into batches
//! 3. [`render`]    — the [`render::Rasterizer`] capability and its pdfium backend
//! 4. [`batch`]     — rasterise one batch across the worker pool, order preserved
//! 5. [`normalize`] — barrier: min size over the scope, then parallel resize
//! 6. [`sink`]      — write each page to its numbered slot
//!
//! [`pool`] is the bounded worker pool every parallel stage runs on.

pub mod batch;
pub mod input;
pub mod normalize;
pub mod pool;
pub mod render;
pub mod sink;
pub mod source;
