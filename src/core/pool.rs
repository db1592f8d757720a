//! Short-lived worker pools scoped to one pipeline invocation.
//!
//! Two fetch disciplines share the same pool type:
//! - `fetch_all` for the bands of one window: every read must succeed, the
//!   first error fails the whole batch.
//! - `fetch_isolated` for independent scenes: a failing (or panicking) worker
//!   yields `SourceOutcome::Unavailable` and the rest carry on.
//!
//! Results always come back in input order, whatever order workers finish in.
use std::panic::{AssertUnwindSafe, catch_unwind};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::error::Result;

/// Default worker count for per-window band fetches.
pub const BAND_WORKERS: usize = 3;
/// Default worker count for per-scene fetches.
pub const SCENE_WORKERS: usize = 10;

/// Result of one isolated fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome<T> {
    Available(T),
    Unavailable(String),
}

impl<T> SourceOutcome<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, SourceOutcome::Available(_))
    }

    pub fn available(self) -> Option<T> {
        match self {
            SourceOutcome::Available(v) => Some(v),
            SourceOutcome::Unavailable(_) => None,
        }
    }
}

pub struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Build a dedicated pool of `workers` threads. Dropping it joins them.
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("bandmix-worker-{i}"))
            .build()?;
        debug!("Started worker pool with {} threads", workers);
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` over every item; all-or-nothing.
    pub fn fetch_all<I, T, F>(&self, items: &[I], f: F) -> Result<Vec<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> Result<T> + Sync,
    {
        self.pool.install(|| items.par_iter().map(&f).collect())
    }

    /// Run `f` over every item, turning failures into `Unavailable`.
    /// `label` names an item in log messages.
    pub fn fetch_isolated<I, T, F, L>(&self, items: &[I], label: L, f: F) -> Vec<SourceOutcome<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> Result<T> + Sync,
        L: Fn(&I) -> String + Sync,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| match catch_unwind(AssertUnwindSafe(|| f(item))) {
                    Ok(Ok(v)) => SourceOutcome::Available(v),
                    Ok(Err(e)) => {
                        warn!("Source {} unavailable: {}", label(item), e);
                        SourceOutcome::Unavailable(e.to_string())
                    }
                    Err(_) => {
                        warn!("Source {} unavailable: worker panicked", label(item));
                        SourceOutcome::Unavailable("worker panicked".to_string())
                    }
                })
                .collect()
        })
    }
}
