//! Probe-side block selection for drained join batches.
//!
//! Build channels are always fresh flat columns.  Probe channels are views
//! over the probe batch, chosen from the shape of the recorded positions:
//!
//! - a run covering the whole probe batch reuses its blocks as-is,
//! - any other contiguous run becomes a slice view,
//! - everything else becomes dictionary views sharing one id array.

use std::fmt;
use std::sync::Arc;

use fjoin_error::{JoinError, Result};
use fjoin_vector::{Batch, Block};

/// How probe channels are represented in an output batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSelection {
    /// No rows were recorded.
    Empty,
    /// Positions are exactly `0..probe_row_count`.
    Covering,
    /// Positions are `start..start + len`, a strict subset of the batch.
    Run { start: usize, len: usize },
    /// Positions repeat, skip or go backwards.
    Scattered,
}

impl ProbeSelection {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Covering => "reused",
            Self::Run { .. } => "slice",
            Self::Scattered => "dictionary",
        }
    }
}

impl fmt::Display for ProbeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether every position is its predecessor plus one.
///
/// Empty and single-element sequences are contiguous.  Stops at the first
/// break.
#[must_use]
pub fn is_contiguous_run(positions: &[u32]) -> bool {
    positions
        .windows(2)
        .all(|pair| pair[0].checked_add(1) == Some(pair[1]))
}

/// Classify recorded positions against a probe batch of `probe_row_count`
/// rows.  Range checks are left to [`assemble_probe_blocks`].
#[must_use]
pub fn classify_positions(positions: &[u32], probe_row_count: usize) -> ProbeSelection {
    let Some(&first) = positions.first() else {
        return ProbeSelection::Empty;
    };
    if !is_contiguous_run(positions) {
        return ProbeSelection::Scattered;
    }
    let start = first as usize;
    let len = positions.len();
    if start == 0 && len == probe_row_count {
        ProbeSelection::Covering
    } else {
        ProbeSelection::Run { start, len }
    }
}

/// Probe-side blocks of an output batch, one per entry of `output_channels`.
///
/// # Errors
///
/// Returns [`JoinError::PositionOutOfRange`] when a position lies outside
/// `batch` and [`JoinError::ChannelOutOfRange`] for an unknown channel.
pub fn assemble_probe_blocks(
    batch: &Batch,
    output_channels: &[usize],
    positions: &[u32],
    selection: ProbeSelection,
) -> Result<Vec<Block>> {
    let row_count = batch.row_count();
    if let Some(&max) = positions
        .iter()
        .max()
        .filter(|&&max| max as usize >= row_count)
    {
        return Err(JoinError::PositionOutOfRange {
            position: max as usize,
            row_count,
        });
    }

    // One id array backs every dictionary channel.
    let ids: Arc<[u32]> = if matches!(selection, ProbeSelection::Scattered) {
        Arc::from(positions)
    } else {
        Arc::from(Vec::new())
    };

    output_channels
        .iter()
        .map(|&channel| {
            let block = batch.block(channel)?;
            match selection {
                ProbeSelection::Covering => Ok(block.clone()),
                ProbeSelection::Run { start, len } => block.slice(start, len),
                ProbeSelection::Empty | ProbeSelection::Scattered => block.take(&ids),
            }
        })
        .collect()
}
