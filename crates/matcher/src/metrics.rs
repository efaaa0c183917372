//! Process-wide observer for descriptor matches.
//!
//! Nothing is recorded until a [`MatchMetrics`] is installed with
//! [`set_match_metrics`]; after that every trained matcher reports one
//! [`MatchReport`] per query matrix.
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::types::MatchReport;

type Slot = RwLock<Option<Arc<dyn MatchMetrics>>>;

static RECORDER: Lazy<Slot> = Lazy::new(|| RwLock::new(None));

/// Receives one call per completed match.
pub trait MatchMetrics: Send + Sync {
    /// `report` carries the detector, both row counts and the rows that fed
    /// the aggregate; `latency` is wall clock for the whole match.
    fn record_match(&self, report: &MatchReport, latency: Duration);
}

/// Snapshot of the installed observer, if any.
pub(crate) fn metrics_recorder() -> Option<Arc<dyn MatchMetrics>> {
    RECORDER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(Arc::clone)
}

/// Replace the observer. `None` turns reporting off.
pub fn set_match_metrics(recorder: Option<Arc<dyn MatchMetrics>>) {
    *RECORDER.write().unwrap_or_else(PoisonError::into_inner) = recorder;
}
