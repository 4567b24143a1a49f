//! Bounded worker pool for CPU-bound page work.
//!
//! Each item runs on tokio's blocking thread pool via `spawn_blocking`, with
//! at most `workers` items in flight (`buffer_unordered`). Items complete in
//! any order; results are placed back at their submission position so the
//! caller always receives them in input order.
//!
//! A panicking task is isolated to its own slot as [`TaskError::Panicked`].
//! Cancellation is checked when an item is dispatched: items not yet started
//! resolve to [`TaskError::Cancelled`], items already running finish.

use futures::stream::{self, StreamExt};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the flag for the next run.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Why a pool item produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The run was cancelled before this item was dispatched.
    Cancelled,
    /// The task panicked; carries the panic message.
    Panicked(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Cancelled => f.write_str("cancelled before dispatch"),
            TaskError::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fixed-size pool shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    cancel: CancelFlag,
}

impl WorkerPool {
    /// `workers` is clamped to at least 1.
    pub fn new(workers: usize, cancel: CancelFlag) -> Self {
        Self {
            workers: workers.max(1),
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task` over every item with bounded parallelism.
    ///
    /// The returned vector has one entry per input item, in input order.
    pub async fn run<T, R, F>(&self, items: Vec<T>, task: F) -> Vec<Result<R, TaskError>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let n = items.len();
        let task = Arc::new(task);
        let mut slots: Vec<Option<Result<R, TaskError>>> = (0..n).map(|_| None).collect();

        let mut completions = stream::iter(items.into_iter().enumerate().map(|(pos, item)| {
            let task = Arc::clone(&task);
            let cancel = self.cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return (pos, Err(TaskError::Cancelled));
                }
                let result = tokio::task::spawn_blocking(move || task(item))
                    .await
                    .map_err(|e| {
                        if e.is_panic() {
                            TaskError::Panicked(panic_message(e.into_panic()))
                        } else {
                            TaskError::Cancelled
                        }
                    });
                (pos, result)
            }
        }))
        .buffer_unordered(self.workers);

        while let Some((pos, result)) = completions.next().await {
            if let Err(TaskError::Panicked(ref msg)) = result {
                debug!("Worker task {} panicked: {}", pos, msg);
            }
            slots[pos] = Some(result);
        }

        slots
            .into_iter()
            .map(|s| s.unwrap_or(Err(TaskError::Cancelled)))
            .collect()
    }
}
