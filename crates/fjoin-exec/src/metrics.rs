//! Join output-assembly observability counters.
//!
//! Process-local counters describing how probe-side channels were
//! represented in drained batches and how many rows flowed through the
//! accumulator.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::assembler::ProbeSelection;

/// Snapshot of join assembly metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinAssemblyMetricsSnapshot {
    /// Drained batches whose probe channels reused the probe blocks directly.
    pub fjoin_batches_reused_total: u64,
    /// Drained batches whose probe channels were contiguous slice views.
    pub fjoin_batches_sliced_total: u64,
    /// Drained batches whose probe channels were dictionary views.
    pub fjoin_batches_dictionary_total: u64,
    /// Drained batches with zero rows.
    pub fjoin_batches_empty_total: u64,
    /// Rows appended with a build-side match.
    pub fjoin_rows_matched_total: u64,
    /// Rows appended with a null build side.
    pub fjoin_rows_unmatched_total: u64,
    /// Rows emitted in drained batches.
    pub fjoin_rows_emitted_total: u64,
}

static BATCHES_REUSED_TOTAL: AtomicU64 = AtomicU64::new(0);
static BATCHES_SLICED_TOTAL: AtomicU64 = AtomicU64::new(0);
static BATCHES_DICTIONARY_TOTAL: AtomicU64 = AtomicU64::new(0);
static BATCHES_EMPTY_TOTAL: AtomicU64 = AtomicU64::new(0);
static ROWS_MATCHED_TOTAL: AtomicU64 = AtomicU64::new(0);
static ROWS_UNMATCHED_TOTAL: AtomicU64 = AtomicU64::new(0);
static ROWS_EMITTED_TOTAL: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record_matched_row() {
    ROWS_MATCHED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_unmatched_row() {
    ROWS_UNMATCHED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_drained_batch(selection: ProbeSelection, rows: usize) {
    let counter = match selection {
        ProbeSelection::Empty => &BATCHES_EMPTY_TOTAL,
        ProbeSelection::Covering => &BATCHES_REUSED_TOTAL,
        ProbeSelection::Run { .. } => &BATCHES_SLICED_TOTAL,
        ProbeSelection::Scattered => &BATCHES_DICTIONARY_TOTAL,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    let rows = u64::try_from(rows).unwrap_or(u64::MAX);
    ROWS_EMITTED_TOTAL.fetch_add(rows, Ordering::Relaxed);
}

/// Return a snapshot of join assembly counters.
#[must_use]
pub fn join_assembly_metrics_snapshot() -> JoinAssemblyMetricsSnapshot {
    JoinAssemblyMetricsSnapshot {
        fjoin_batches_reused_total: BATCHES_REUSED_TOTAL.load(Ordering::Relaxed),
        fjoin_batches_sliced_total: BATCHES_SLICED_TOTAL.load(Ordering::Relaxed),
        fjoin_batches_dictionary_total: BATCHES_DICTIONARY_TOTAL.load(Ordering::Relaxed),
        fjoin_batches_empty_total: BATCHES_EMPTY_TOTAL.load(Ordering::Relaxed),
        fjoin_rows_matched_total: ROWS_MATCHED_TOTAL.load(Ordering::Relaxed),
        fjoin_rows_unmatched_total: ROWS_UNMATCHED_TOTAL.load(Ordering::Relaxed),
        fjoin_rows_emitted_total: ROWS_EMITTED_TOTAL.load(Ordering::Relaxed),
    }
}

/// Reset all join assembly counters.
pub fn reset_join_assembly_metrics() {
    BATCHES_REUSED_TOTAL.store(0, Ordering::Relaxed);
    BATCHES_SLICED_TOTAL.store(0, Ordering::Relaxed);
    BATCHES_DICTIONARY_TOTAL.store(0, Ordering::Relaxed);
    BATCHES_EMPTY_TOTAL.store(0, Ordering::Relaxed);
    ROWS_MATCHED_TOTAL.store(0, Ordering::Relaxed);
    ROWS_UNMATCHED_TOTAL.store(0, Ordering::Relaxed);
    ROWS_EMITTED_TOTAL.store(0, Ordering::Relaxed);
}
