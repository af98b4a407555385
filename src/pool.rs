//! Bounded worker pool for independent units of work
//!
//! Units are network-bound (one table fetch, one batch write), so they run as
//! concurrent futures with at most `concurrency` in flight. Concurrency 1 is
//! a plain sequential loop.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};

/// Shared flag that stops a pool from dispatching further units
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Results of one pool run
#[derive(Debug)]
pub struct PoolOutcome<R> {
    /// Results in completion order
    pub results: Vec<R>,
    /// Units never started because the token was cancelled
    pub not_dispatched: usize,
}

impl<R> PoolOutcome<R> {
    pub fn cancelled(&self) -> bool {
        self.not_dispatched > 0
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_sequential(&self) -> bool {
        self.concurrency == 1
    }

    /// Run `work` over every unit; cancellation is checked before each dispatch
    pub async fn run<T, R, F, Fut>(&self, units: Vec<T>, work: F) -> PoolOutcome<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let total = units.len();
        let results: Vec<R> = if self.is_sequential() {
            let mut results = Vec::with_capacity(total);
            for unit in units {
                if self.cancel.is_cancelled() {
                    break;
                }
                results.push(work(unit).await);
            }
            results
        } else {
            let cancel = self.cancel.clone();
            stream::iter(units)
                .take_while(move |_| futures::future::ready(!cancel.is_cancelled()))
                .map(|unit| work(unit))
                .buffer_unordered(self.concurrency)
                .collect()
                .await
        };

        let not_dispatched = total - results.len();
        if not_dispatched > 0 {
            tracing::warn!("Cancelled: {} of {} units not dispatched", not_dispatched, total);
        }
        PoolOutcome {
            results,
            not_dispatched,
        }
    }
}

/// Progress bar over `len` units, or None when progress is disabled
pub fn progress_bar(len: usize, enabled: bool) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    Some(pb)
}
