//! Lookup-join probe loop.
//!
//! Walks a probe batch against a [`BuildIndex`], feeding a
//! [`JoinRowAccumulator`] and handing out a batch each time the accumulator
//! reports full.  A probe row's match chain may span several output
//! batches.

use fjoin_error::{JoinError, Result};
use fjoin_vector::Batch;

use crate::accumulator::JoinRowAccumulator;
use crate::build_index::{BuildIndex, JoinPosition};
use crate::probe::{BatchProbeCursor, ProbeCursor};

/// Supported join variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// Emit one row per matching build row.
    Inner,
    /// Like `Inner`, plus one null-padded row per probe row without matches.
    ProbeOuter,
}

/// Drives one probe batch through an accumulator.
///
/// Output rows follow probe order; matches of one probe row follow build
/// order.
pub struct LookupJoinProbe<'a, I: BuildIndex + ?Sized> {
    index: &'a I,
    accumulator: &'a mut JoinRowAccumulator,
    cursor: BatchProbeCursor,
    join_type: JoinType,
    /// Next chain entry to emit for the current probe row.
    pending: Option<JoinPosition>,
    finished: bool,
}

impl<'a, I: BuildIndex + ?Sized> LookupJoinProbe<'a, I> {
    /// Start probing `cursor`'s batch.  The accumulator is reset first.
    ///
    /// # Errors
    ///
    /// Returns an error when the accumulator still holds undrained rows or
    /// its build channels differ from the index's.
    pub fn new(
        index: &'a I,
        accumulator: &'a mut JoinRowAccumulator,
        cursor: BatchProbeCursor,
        join_type: JoinType,
    ) -> Result<Self> {
        if !accumulator.is_empty() && !accumulator.is_drained() {
            return Err(JoinError::internal(format!(
                "accumulator holds {} undrained rows",
                accumulator.row_count()
            )));
        }
        if accumulator.build_specs() != index.output_specs() {
            return Err(JoinError::internal(
                "accumulator build channels do not match the build index",
            ));
        }
        accumulator.reset();
        tracing::trace!(
            probe_rows = cursor.source_batch().row_count(),
            build_rows = index.join_position_count(),
            ?join_type,
            "starting lookup join probe"
        );
        Ok(Self {
            index,
            accumulator,
            cursor,
            join_type,
            pending: None,
            finished: false,
        })
    }

    #[must_use]
    pub const fn join_type(&self) -> JoinType {
        self.join_type
    }

    #[must_use]
    pub const fn cursor(&self) -> &BatchProbeCursor {
        &self.cursor
    }

    /// Next output batch, or `None` once the probe batch is exhausted and the
    /// last non-empty batch was handed out.  Errors end the probe.
    ///
    /// # Errors
    ///
    /// Propagates accumulator and index errors.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }
        let result = self.fill();
        if result.is_err() {
            self.finished = true;
        }
        result
    }

    fn fill(&mut self) -> Result<Option<Batch>> {
        loop {
            while let Some(position) = self.pending {
                self.accumulator
                    .append_match(&self.cursor, self.index, position)?;
                self.pending = self.index.next_join_position(position);
                if self.accumulator.is_full() {
                    return self.flush().map(Some);
                }
            }

            if !self.cursor.advance() {
                self.finished = true;
                if self.accumulator.is_empty() {
                    self.accumulator.reset();
                    return Ok(None);
                }
                return self.flush().map(Some);
            }
            let row = self
                .cursor
                .current_position()
                .ok_or(JoinError::CursorNotPositioned)?;
            let first = self.index.join_position(
                self.cursor.source_batch(),
                self.cursor.key_channels(),
                row,
            )?;
            match first {
                Some(position) => self.pending = Some(position),
                None if self.join_type == JoinType::ProbeOuter => {
                    self.accumulator.append_unmatched(&self.cursor)?;
                    if self.accumulator.is_full() {
                        return self.flush().map(Some);
                    }
                }
                None => {}
            }
        }
    }

    fn flush(&mut self) -> Result<Batch> {
        let batch = self.accumulator.drain(&self.cursor)?;
        self.accumulator.reset();
        tracing::trace!(
            output_rows = batch.row_count(),
            probe_position = ?self.cursor.current_position(),
            "flushed lookup join batch"
        );
        Ok(batch)
    }
}

impl<I: BuildIndex + ?Sized> Iterator for LookupJoinProbe<'_, I> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}
