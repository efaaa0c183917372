//! Bounded parallel scan over candidate images.
//!
//! Candidates are scored independently on a dedicated rayon pool. The
//! indexed parallel collect keeps input order, so ranking can rely on scan
//! order for ties after the explicit sort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use uuid::Uuid;

use crate::types::RetrievalError;

/// Shared cancellation flag, checked before each candidate.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with [`RetrievalError::Cancelled`] once cancelled.
    pub fn check(&self) -> Result<(), RetrievalError> {
        if self.is_cancelled() {
            Err(RetrievalError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Cancels the token when dropped unless disarmed.
///
/// Hand one to whatever owns the caller's side of a scan; if it goes away
/// early the scan stops at the next candidate.
#[derive(Debug)]
pub struct CancelOnDrop {
    token: Option<CancellationToken>,
}

impl CancelOnDrop {
    pub fn new(token: CancellationToken) -> Self {
        Self { token: Some(token) }
    }

    /// The scan finished; dropping no longer cancels.
    pub fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

/// Dedicated thread pool for candidate scans.
pub struct ScanPool {
    pool: ThreadPool,
}

impl ScanPool {
    /// `workers == 0` lets rayon pick one thread per core.
    pub fn new(workers: usize) -> Result<Self, RetrievalError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("cbir-scan-{i}"))
            .build()
            .map_err(|e| RetrievalError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Score every candidate, keeping the `Some` results in input order.
    ///
    /// The first error (including cancellation) aborts the scan.
    pub fn scan<T, F>(
        &self,
        candidates: &[Uuid],
        token: &CancellationToken,
        score: F,
    ) -> Result<Vec<T>, RetrievalError>
    where
        T: Send,
        F: Fn(Uuid) -> Result<Option<T>, RetrievalError> + Sync,
    {
        let scored: Vec<Option<T>> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|&id| {
                    token.check()?;
                    score(id)
                })
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(scored.into_iter().flatten().collect())
    }
}

impl std::fmt::Debug for ScanPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanPool")
            .field("workers", &self.workers())
            .finish()
    }
}
