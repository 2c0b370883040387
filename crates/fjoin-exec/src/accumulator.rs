//! Row accumulator for lookup-join output.
//!
//! [`JoinRowAccumulator`] collects join output one row at a time.  Per row it
//! records the probe position and either asks the [`BuildIndex`] to copy the
//! matched build row into its builders or appends nulls.  [`drain`] turns the
//! pending rows into a [`Batch`]: probe channels become views over the probe
//! batch (see [`crate::assembler`]), build channels are the built columns.
//!
//! Lifecycle: accumulate, drain, reset, accumulate again.  Buffers keep
//! their capacity across cycles.
//!
//! [`drain`]: JoinRowAccumulator::drain

use std::fmt;
use std::sync::Arc;

use fjoin_error::{JoinError, Result};
use fjoin_vector::{Batch, Block, ColumnBuilder, ColumnSpec};

use crate::assembler::{assemble_probe_blocks, classify_positions};
use crate::build_index::{BuildIndex, JoinPosition};
use crate::config::BatchSizePolicy;
use crate::metrics::{record_drained_batch, record_matched_row, record_unmatched_row};
use crate::probe::ProbeCursor;

/// Bytes charged per recorded probe position.
const POSITION_ENTRY_BYTES: usize = std::mem::size_of::<u32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccumulatorState {
    Accumulating,
    Drained,
}

/// Pending join output rows for one probe batch.
#[derive(Debug)]
pub struct JoinRowAccumulator {
    policy: BatchSizePolicy,
    build_specs: Vec<ColumnSpec>,
    /// Probe row of each pending output row.
    positions: Vec<u32>,
    /// One builder per build output channel, each `positions.len()` long.
    build_builders: Vec<ColumnBuilder>,
    /// Probe batch the positions refer to; pinned by the first append.
    probe_batch: Option<Arc<Batch>>,
    estimated_probe_bytes: usize,
    state: AccumulatorState,
}

impl JoinRowAccumulator {
    /// Accumulator producing build channels typed by `build_specs`.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidConfig`] when `policy` is unusable.
    pub fn try_new(build_specs: &[ColumnSpec], policy: BatchSizePolicy) -> Result<Self> {
        if let Err(err) = policy.validate() {
            tracing::warn!(error = %err, ?policy, "rejecting join batch size policy");
            return Err(err);
        }
        Ok(Self::with_policy(build_specs, policy))
    }

    /// Accumulator with the default [`BatchSizePolicy`].
    #[must_use]
    pub fn new(build_specs: &[ColumnSpec]) -> Self {
        Self::with_policy(build_specs, BatchSizePolicy::default())
    }

    fn with_policy(build_specs: &[ColumnSpec], policy: BatchSizePolicy) -> Self {
        let capacity = policy.initial_capacity();
        Self {
            policy,
            build_specs: build_specs.to_vec(),
            positions: Vec::with_capacity(capacity),
            build_builders: build_specs
                .iter()
                .map(|spec| ColumnBuilder::new(spec.clone(), capacity))
                .collect(),
            probe_batch: None,
            estimated_probe_bytes: 0,
            state: AccumulatorState::Accumulating,
        }
    }

    /// Accumulator whose build channels match `index`.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidConfig`] when `policy` is unusable.
    pub fn for_index<I: BuildIndex + ?Sized>(index: &I, policy: BatchSizePolicy) -> Result<Self> {
        Self::try_new(index.output_specs(), policy)
    }

    // ── Appends ────────────────────────────────────────────────────────────

    /// Append one output row pairing the cursor's current probe row with the
    /// build row at `join_position`.
    ///
    /// Index failures propagate unchanged.  Nothing is recorded when a
    /// precondition fails.
    pub fn append_match<P, I>(
        &mut self,
        probe: &P,
        index: &I,
        join_position: JoinPosition,
    ) -> Result<()>
    where
        P: ProbeCursor + ?Sized,
        I: BuildIndex + ?Sized,
    {
        let position = self.check_append(probe)?;
        if index.channel_count() != self.build_builders.len() {
            return Err(JoinError::internal(format!(
                "build index copies {} channels, accumulator holds {}",
                index.channel_count(),
                self.build_builders.len()
            )));
        }
        index.copy_row_into(join_position, &mut self.build_builders, 0)?;
        self.commit(probe, position);
        record_matched_row();
        Ok(())
    }

    /// Append one output row for the cursor's current probe row with every
    /// build channel null.  May be called repeatedly for the same row.
    pub fn append_unmatched<P: ProbeCursor + ?Sized>(&mut self, probe: &P) -> Result<()> {
        let position = self.check_append(probe)?;
        for builder in &mut self.build_builders {
            builder.append_null();
        }
        self.commit(probe, position);
        record_unmatched_row();
        Ok(())
    }

    fn check_append<P: ProbeCursor + ?Sized>(&self, probe: &P) -> Result<u32> {
        if self.state == AccumulatorState::Drained {
            return Err(JoinError::AppendAfterDrain);
        }
        let position = probe
            .current_position()
            .ok_or(JoinError::CursorNotPositioned)?;
        let batch = probe.source_batch();
        if self
            .probe_batch
            .as_ref()
            .is_some_and(|pinned| !Arc::ptr_eq(pinned, batch))
        {
            return Err(JoinError::ProbeBatchMismatch);
        }
        if position >= batch.row_count() {
            return Err(JoinError::PositionOutOfRange {
                position,
                row_count: batch.row_count(),
            });
        }
        if let Some(&channel) = probe
            .output_channels()
            .iter()
            .find(|&&channel| channel >= batch.channel_count())
        {
            return Err(JoinError::ChannelOutOfRange {
                channel,
                channel_count: batch.channel_count(),
            });
        }
        u32::try_from(position).map_err(|_| JoinError::PositionOverflow(position))
    }

    fn commit<P: ProbeCursor + ?Sized>(&mut self, probe: &P, position: u32) {
        let batch = self
            .probe_batch
            .get_or_insert_with(|| Arc::clone(probe.source_batch()));
        self.estimated_probe_bytes += POSITION_ENTRY_BYTES;
        // Variable-width probe values are charged once per run of equal positions.
        if self.positions.last() != Some(&position) {
            let row = position as usize;
            self.estimated_probe_bytes += probe
                .output_channels()
                .iter()
                .filter_map(|&channel| batch.blocks().get(channel))
                .filter(|block| block.vector_type().is_variable_width())
                .map(|block| block.value_size_bytes(row))
                .sum::<usize>();
        }
        self.positions.push(position);
    }

    // ── State ──────────────────────────────────────────────────────────────

    /// Whether the pending rows reached the row or size limit of the policy.
    /// Advisory: appends past the limit still succeed.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.row_count() >= self.policy.max_row_count
            || self.estimated_size_bytes() >= self.policy.max_size_bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Whether [`drain`](Self::drain) ran since the last reset.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.state == AccumulatorState::Drained
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.positions.len()
    }

    /// Recorded probe positions, in output order.
    #[must_use]
    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    /// Estimated footprint of the pending output batch.
    #[must_use]
    pub fn estimated_size_bytes(&self) -> usize {
        self.estimated_probe_bytes
            + self
                .build_builders
                .iter()
                .map(ColumnBuilder::size_in_bytes)
                .sum::<usize>()
    }

    #[must_use]
    pub fn build_specs(&self) -> &[ColumnSpec] {
        &self.build_specs
    }

    #[must_use]
    pub const fn policy(&self) -> &BatchSizePolicy {
        &self.policy
    }

    /// Discard pending rows and unpin the probe batch, keeping buffer
    /// capacity.  The accumulator accepts appends again afterwards.
    pub fn reset(&mut self) {
        tracing::trace!(
            discarded_rows = self.positions.len(),
            was_drained = self.is_drained(),
            "reset join row accumulator"
        );
        self.positions.clear();
        for builder in &mut self.build_builders {
            builder.reset();
        }
        self.probe_batch = None;
        self.estimated_probe_bytes = 0;
        self.state = AccumulatorState::Accumulating;
    }

    // ── Drain ──────────────────────────────────────────────────────────────

    /// Assemble the pending rows into a batch: the cursor's probe output
    /// channels first, then the build channels.
    ///
    /// Pending rows stay in place until [`reset`](Self::reset); further
    /// appends fail with [`JoinError::AppendAfterDrain`].
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::ProbeBatchMismatch`] when `probe` iterates a
    /// different batch than the recorded rows, range errors for positions or
    /// channels the probe batch does not have, and [`JoinError::Internal`]
    /// when a builder lost track of the row count.
    pub fn drain<P: ProbeCursor + ?Sized>(&mut self, probe: &P) -> Result<Batch> {
        let batch = probe.source_batch();
        if self
            .probe_batch
            .as_ref()
            .is_some_and(|pinned| !Arc::ptr_eq(pinned, batch))
        {
            return Err(JoinError::ProbeBatchMismatch);
        }
        let row_count = self.positions.len();
        if let Some((channel, builder)) = self
            .build_builders
            .iter()
            .enumerate()
            .find(|(_, builder)| builder.len() != row_count)
        {
            return Err(JoinError::internal(format!(
                "build channel {channel} ({}) holds {} rows, accumulator recorded {row_count}",
                builder.spec().name,
                builder.len()
            )));
        }

        let selection = classify_positions(&self.positions, batch.row_count());
        let _span = tracing::debug_span!(
            "join_batch",
            output_rows = row_count,
            probe_rows = batch.row_count(),
            probe_channels = probe.output_channels().len(),
            build_channels = self.build_builders.len(),
            shape = selection.as_str(),
        )
        .entered();

        let mut blocks =
            assemble_probe_blocks(batch, probe.output_channels(), &self.positions, selection)?;
        blocks.reserve(self.build_builders.len());
        for builder in &self.build_builders {
            blocks.push(Block::from(builder.build()?));
        }
        let output = Batch::try_new(blocks, row_count)?;

        self.state = AccumulatorState::Drained;
        record_drained_batch(selection, row_count);
        tracing::debug!(
            retained_bytes = output.retained_size_in_bytes(),
            "drained join batch"
        );
        Ok(output)
    }
}

impl fmt::Display for JoinRowAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JoinRowAccumulator{{estimatedSize={}, positionCount={}}}",
            self.estimated_size_bytes(),
            self.positions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_index::HashBuildIndex;
    use crate::probe::BatchProbeCursor;
    use fjoin_vector::{BlockKind, ColumnVectorType, ScalarValue};

    fn probe_batch(rows: i64) -> Arc<Batch> {
        let specs = [
            ColumnSpec::new("pk", ColumnVectorType::Int64),
            ColumnSpec::new("label", ColumnVectorType::Text),
        ];
        let rows: Vec<Vec<ScalarValue>> = (0..rows)
            .map(|i| vec![ScalarValue::Integer(i), ScalarValue::from(format!("p{i}").as_str())])
            .collect();
        Arc::new(Batch::from_rows(&rows, &specs).expect("probe batch"))
    }

    fn identity_index(rows: i64) -> HashBuildIndex {
        let specs = [
            ColumnSpec::new("bk", ColumnVectorType::Int64),
            ColumnSpec::new("payload", ColumnVectorType::Float64),
        ];
        let rows: Vec<Vec<ScalarValue>> = (0..rows)
            .map(|i| vec![ScalarValue::Integer(i), ScalarValue::Float(i as f64 / 2.0)])
            .collect();
        let batch = Arc::new(Batch::from_rows(&rows, &specs).expect("build batch"));
        HashBuildIndex::build(batch, vec![0], vec![0, 1]).expect("index")
    }

    fn seek(cursor: &mut BatchProbeCursor, position: usize) {
        while cursor.current_position() != Some(position) {
            assert!(cursor.advance(), "cursor ran out before {position}");
        }
    }

    #[test]
    fn matched_and_unmatched_rows_interleave() {
        let index = identity_index(4);
        let mut acc = JoinRowAccumulator::for_index(&index, BatchSizePolicy::default())
            .expect("accumulator");
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(4));
        seek(&mut cursor, 1);
        acc.append_match(&cursor, &index, 3).expect("match");
        acc.append_unmatched(&cursor).expect("unmatched");
        seek(&mut cursor, 3);
        acc.append_match(&cursor, &index, 0).expect("match");

        let batch = acc.drain(&cursor).expect("drain");
        assert_eq!(batch.row_count(), 3);
        assert_eq!(batch.channel_count(), 4);
        assert_eq!(batch.block(0).expect("pk").kind(), BlockKind::Dictionary);
        assert_eq!(
            batch.to_rows().expect("rows"),
            vec![
                vec![
                    ScalarValue::Integer(1),
                    ScalarValue::from("p1"),
                    ScalarValue::Integer(3),
                    ScalarValue::Float(1.5)
                ],
                vec![
                    ScalarValue::Integer(1),
                    ScalarValue::from("p1"),
                    ScalarValue::Null,
                    ScalarValue::Null
                ],
                vec![
                    ScalarValue::Integer(3),
                    ScalarValue::from("p3"),
                    ScalarValue::Integer(0),
                    ScalarValue::Float(0.0)
                ],
            ]
        );
    }

    #[test]
    fn append_requires_positioned_cursor() {
        let index = identity_index(1);
        let mut acc = JoinRowAccumulator::new(index.output_specs());
        let cursor = BatchProbeCursor::all_channels(probe_batch(1));
        assert_eq!(
            acc.append_unmatched(&cursor).unwrap_err(),
            JoinError::CursorNotPositioned
        );
        assert_eq!(
            acc.append_match(&cursor, &index, 0).unwrap_err(),
            JoinError::CursorNotPositioned
        );
        assert!(acc.is_empty());
    }

    #[test]
    fn append_after_drain_fails_until_reset() {
        let index = identity_index(2);
        let mut acc = JoinRowAccumulator::new(index.output_specs());
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(2));
        assert!(cursor.advance());
        acc.append_match(&cursor, &index, 0).expect("match");
        acc.drain(&cursor).expect("drain");
        assert!(acc.is_drained());
        assert_eq!(
            acc.append_unmatched(&cursor).unwrap_err(),
            JoinError::AppendAfterDrain
        );
        acc.reset();
        assert!(acc.is_empty());
        acc.append_unmatched(&cursor).expect("append after reset");
        assert_eq!(acc.row_count(), 1);
    }

    #[test]
    fn foreign_probe_batch_is_rejected() {
        let index = identity_index(2);
        let mut acc = JoinRowAccumulator::new(index.output_specs());
        let mut first = BatchProbeCursor::all_channels(probe_batch(2));
        let mut second = BatchProbeCursor::all_channels(probe_batch(2));
        assert!(first.advance());
        assert!(second.advance());
        acc.append_unmatched(&first).expect("append");
        assert_eq!(
            acc.append_unmatched(&second).unwrap_err(),
            JoinError::ProbeBatchMismatch
        );
        assert_eq!(acc.drain(&second).unwrap_err(), JoinError::ProbeBatchMismatch);
        assert_eq!(acc.row_count(), 1);
    }

    #[test]
    fn failed_index_copy_records_nothing() {
        let index = identity_index(2);
        let mut acc = JoinRowAccumulator::new(index.output_specs());
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(2));
        assert!(cursor.advance());
        assert!(matches!(
            acc.append_match(&cursor, &index, 99),
            Err(JoinError::InvalidJoinPosition { .. })
        ));
        assert!(acc.is_empty());
        let batch = acc.drain(&cursor).expect("drain");
        assert_eq!(batch.row_count(), 0);
    }

    /// Index that writes the first build channel and then fails.
    struct PartialWriteIndex {
        specs: Vec<ColumnSpec>,
    }

    impl PartialWriteIndex {
        fn new() -> Self {
            Self {
                specs: vec![
                    ColumnSpec::new("a", ColumnVectorType::Int64),
                    ColumnSpec::new("b", ColumnVectorType::Int64),
                ],
            }
        }
    }

    impl BuildIndex for PartialWriteIndex {
        fn output_specs(&self) -> &[ColumnSpec] {
            &self.specs
        }

        fn join_position_count(&self) -> u64 {
            1
        }

        fn in_memory_size_bytes(&self) -> usize {
            0
        }

        fn copy_row_into(
            &self,
            _join_position: JoinPosition,
            builders: &mut [ColumnBuilder],
            channel_offset: usize,
        ) -> Result<()> {
            builders[channel_offset].append_null();
            Err(JoinError::internal("build row vanished"))
        }

        fn join_position(
            &self,
            _probe_batch: &Batch,
            _key_channels: &[usize],
            _row: usize,
        ) -> Result<Option<JoinPosition>> {
            Ok(Some(0))
        }

        fn next_join_position(&self, _current: JoinPosition) -> Option<JoinPosition> {
            None
        }
    }

    #[test]
    fn partial_index_write_is_caught_at_drain_and_cleared_by_reset() {
        let index = PartialWriteIndex::new();
        let mut acc = JoinRowAccumulator::new(index.output_specs());
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(2));
        assert!(cursor.advance());
        assert!(acc.append_match(&cursor, &index, 0).is_err());
        assert!(acc.is_empty());
        assert!(matches!(acc.drain(&cursor), Err(JoinError::Internal(_))));

        acc.reset();
        assert_eq!(acc.estimated_size_bytes(), 0);
        let batch = acc.drain(&cursor).expect("drain after reset");
        assert_eq!(batch.row_count(), 0);
        assert_eq!(batch.channel_count(), 4);
        assert_eq!(
            batch.block(2).expect("a").vector_type(),
            ColumnVectorType::Int64
        );

        acc.reset();
        acc.append_unmatched(&cursor).expect("append after reset");
        let batch = acc.drain(&cursor).expect("drain");
        assert_eq!(batch.row_count(), 1);
        assert!(batch.block(3).expect("b").is_null(0));
    }

    #[test]
    fn reset_on_clean_accumulator_clears_stale_builders() {
        let index = PartialWriteIndex::new();
        let mut acc = JoinRowAccumulator::new(index.output_specs());
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(1));
        assert!(cursor.advance());
        for _ in 0..3 {
            assert!(acc.append_match(&cursor, &index, 0).is_err());
        }
        assert!(acc.is_empty() && !acc.is_drained());
        acc.reset();
        acc.reset();
        acc.append_unmatched(&cursor).expect("append");
        assert_eq!(acc.drain(&cursor).expect("drain").row_count(), 1);
    }

    /// Cursor over a batch whose output channels are not checked.
    struct UncheckedCursor {
        batch: Arc<Batch>,
        output_channels: Vec<usize>,
    }

    impl ProbeCursor for UncheckedCursor {
        fn advance(&mut self) -> bool {
            false
        }

        fn current_position(&self) -> Option<usize> {
            Some(0)
        }

        fn source_batch(&self) -> &Arc<Batch> {
            &self.batch
        }

        fn output_channels(&self) -> &[usize] {
            &self.output_channels
        }
    }

    #[test]
    fn bad_output_channel_fails_the_append() {
        let index = identity_index(1);
        let mut acc = JoinRowAccumulator::new(index.output_specs());
        let cursor = UncheckedCursor {
            batch: probe_batch(1),
            output_channels: vec![1, 5],
        };
        assert_eq!(
            acc.append_unmatched(&cursor).unwrap_err(),
            JoinError::ChannelOutOfRange {
                channel: 5,
                channel_count: 2
            }
        );
        assert!(matches!(
            acc.append_match(&cursor, &index, 0),
            Err(JoinError::ChannelOutOfRange { channel: 5, .. })
        ));
        assert!(acc.is_empty());
        assert_eq!(acc.estimated_size_bytes(), 0);
    }

    #[test]
    fn full_by_row_count() {
        let index = identity_index(8);
        let policy = BatchSizePolicy::default().with_max_row_count(3);
        let mut acc = JoinRowAccumulator::for_index(&index, policy).expect("accumulator");
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(8));
        for _ in 0..3 {
            assert!(!acc.is_full());
            assert!(cursor.advance());
            acc.append_unmatched(&cursor).expect("append");
        }
        assert!(acc.is_full());
        acc.append_unmatched(&cursor).expect("limit is advisory");
        assert_eq!(acc.row_count(), 4);
    }

    #[test]
    fn full_by_estimated_size() {
        let index = identity_index(8);
        let policy = BatchSizePolicy::default().with_max_size_bytes(64);
        let mut acc = JoinRowAccumulator::for_index(&index, policy).expect("accumulator");
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(8));
        let mut appended = 0;
        while !acc.is_full() {
            assert!(cursor.advance());
            acc.append_match(&cursor, &index, 0).expect("match");
            appended += 1;
        }
        assert!(acc.estimated_size_bytes() >= 64);
        assert!(appended < 8, "size limit should trip before the row limit");
    }

    #[test]
    fn variable_width_probe_values_count_once_per_position() {
        let mut acc = JoinRowAccumulator::new(&[]);
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(2));
        assert!(cursor.advance());
        acc.append_unmatched(&cursor).expect("append");
        let once = acc.estimated_size_bytes();
        acc.append_unmatched(&cursor).expect("append");
        assert_eq!(acc.estimated_size_bytes(), once + POSITION_ENTRY_BYTES);
        assert_eq!(once, POSITION_ENTRY_BYTES + "p0".len());
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let err = JoinRowAccumulator::try_new(&[], BatchSizePolicy::default().with_max_row_count(0))
            .unwrap_err();
        assert!(matches!(err, JoinError::InvalidConfig(_)));
    }

    #[test]
    fn display_reports_position_count() {
        let mut acc = JoinRowAccumulator::new(&[]);
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(3));
        while cursor.advance() {
            acc.append_unmatched(&cursor).expect("append");
        }
        let text = acc.to_string();
        assert!(text.starts_with("JoinRowAccumulator{estimatedSize="));
        assert!(text.contains("positionCount=3"), "got {text}");
    }

    #[test]
    fn reset_keeps_builders_typed() {
        let index = identity_index(3);
        let mut acc = JoinRowAccumulator::new(index.output_specs());
        let mut cursor = BatchProbeCursor::all_channels(probe_batch(3));
        while cursor.advance() {
            acc.append_match(&cursor, &index, 2).expect("match");
        }
        acc.reset();
        let batch = acc.drain(&cursor).expect("drain");
        assert_eq!(batch.row_count(), 0);
        assert_eq!(batch.channel_count(), 4);
        assert_eq!(
            batch.block(3).expect("payload").vector_type(),
            ColumnVectorType::Float64
        );
    }
}
