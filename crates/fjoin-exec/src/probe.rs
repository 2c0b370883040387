//! Probe-side cursor over one input batch.

use std::sync::Arc;

use fjoin_error::{JoinError, Result};
use fjoin_vector::Batch;

/// Iterates the rows of one probe batch, one position at a time.
///
/// The accumulator only reads the cursor: it records `current_position()`
/// and, at drain time, builds views over `source_batch()` restricted to
/// `output_channels()`.
pub trait ProbeCursor {
    /// Move to the next row.  Returns `false` once the batch is exhausted.
    fn advance(&mut self) -> bool;

    /// Row the cursor is on; `None` before the first advance and after
    /// exhaustion.
    fn current_position(&self) -> Option<usize>;

    /// Batch being iterated.
    fn source_batch(&self) -> &Arc<Batch>;

    /// Probe channels projected into the join output, in output order.
    fn output_channels(&self) -> &[usize];
}

/// [`ProbeCursor`] over an in-memory [`Batch`].
#[derive(Debug, Clone)]
pub struct BatchProbeCursor {
    batch: Arc<Batch>,
    output_channels: Vec<usize>,
    key_channels: Vec<usize>,
    position: Option<usize>,
    exhausted: bool,
}

impl BatchProbeCursor {
    /// Cursor positioned before the first row of `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::ChannelOutOfRange`] when an output or key channel
    /// does not exist in `batch`.
    pub fn try_new(
        batch: Arc<Batch>,
        output_channels: Vec<usize>,
        key_channels: Vec<usize>,
    ) -> Result<Self> {
        let channel_count = batch.channel_count();
        if let Some(&channel) = output_channels
            .iter()
            .chain(&key_channels)
            .find(|&&channel| channel >= channel_count)
        {
            return Err(JoinError::ChannelOutOfRange {
                channel,
                channel_count,
            });
        }
        Ok(Self {
            batch,
            output_channels,
            key_channels,
            position: None,
            exhausted: false,
        })
    }

    /// Cursor projecting every channel of `batch`, with no join keys.
    #[must_use]
    pub fn all_channels(batch: Arc<Batch>) -> Self {
        let output_channels = (0..batch.channel_count()).collect();
        Self {
            batch,
            output_channels,
            key_channels: Vec::new(),
            position: None,
            exhausted: false,
        }
    }

    /// Probe channels holding the join key, in key order.
    #[must_use]
    pub fn key_channels(&self) -> &[usize] {
        &self.key_channels
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl ProbeCursor for BatchProbeCursor {
    fn advance(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        let next = self.position.map_or(0, |position| position + 1);
        if next < self.batch.row_count() {
            self.position = Some(next);
            true
        } else {
            self.position = None;
            self.exhausted = true;
            false
        }
    }

    fn current_position(&self) -> Option<usize> {
        self.position
    }

    fn source_batch(&self) -> &Arc<Batch> {
        &self.batch
    }

    fn output_channels(&self) -> &[usize] {
        &self.output_channels
    }
}
