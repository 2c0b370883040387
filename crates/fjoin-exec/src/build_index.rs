//! Build-side index consulted by the row accumulator.
//!
//! The accumulator never reads build columns itself: for every matched row it
//! asks a [`BuildIndex`] to copy the build row identified by a
//! [`JoinPosition`] into its builders.  [`HashBuildIndex`] is the in-memory
//! chained hash table used by [`crate::join::LookupJoinProbe`].

use std::sync::Arc;

use fjoin_error::{JoinError, Result};
use fjoin_vector::{Batch, Block, ColumnBuilder, ColumnSpec, ScalarValue};
use hashbrown::HashMap;
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

/// Opaque handle identifying one build-side row.
pub type JoinPosition = u64;

/// Random-access source of build-side rows.
pub trait BuildIndex {
    /// Types of the build channels copied into join output, in order.
    fn output_specs(&self) -> &[ColumnSpec];

    /// Number of build channels copied per row.
    fn channel_count(&self) -> usize {
        self.output_specs().len()
    }

    /// Number of addressable join positions.
    fn join_position_count(&self) -> u64;

    /// Approximate bytes held by the index.
    fn in_memory_size_bytes(&self) -> usize;

    /// Append the build row at `join_position` to
    /// `builders[channel_offset..channel_offset + channel_count()]`.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidJoinPosition`] for an unknown position and
    /// [`JoinError::ChannelOutOfRange`] when too few builders are supplied.
    fn copy_row_into(
        &self,
        join_position: JoinPosition,
        builders: &mut [ColumnBuilder],
        channel_offset: usize,
    ) -> Result<()>;

    /// First build row whose key equals the key of `row` in `probe_batch`.
    /// A probe key containing NULL never matches.
    ///
    /// # Errors
    ///
    /// Returns an error when the probe key channels do not line up with the
    /// build key channels or `row` is out of range.
    fn join_position(
        &self,
        probe_batch: &Batch,
        key_channels: &[usize],
        row: usize,
    ) -> Result<Option<JoinPosition>>;

    /// Next build row after `current` carrying the same key, in build order.
    fn next_join_position(&self, current: JoinPosition) -> Option<JoinPosition>;
}

// ── Keys ───────────────────────────────────────────────────────────────────

/// Comparable, hashable form of one non-null key column value.
#[derive(Debug, Clone, PartialEq)]
enum KeyValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl KeyValue {
    fn from_scalar(value: ScalarValue) -> Option<Self> {
        match value {
            ScalarValue::Null => None,
            ScalarValue::Integer(i) => Some(Self::Integer(i)),
            // -0.0 and 0.0 compare equal, so they must hash alike.
            ScalarValue::Float(f) => Some(Self::Float(if f == 0.0 { 0.0 } else { f })),
            ScalarValue::Text(s) => Some(Self::Text(s)),
            ScalarValue::Blob(b) => Some(Self::Blob(b)),
        }
    }

    fn hash_into(&self, hasher: &mut Xxh3) {
        match self {
            Self::Integer(i) => {
                hasher.update(&[1]);
                hasher.update(&i.to_le_bytes());
            }
            Self::Float(f) => {
                hasher.update(&[2]);
                hasher.update(&f.to_bits().to_le_bytes());
            }
            Self::Text(s) => {
                hasher.update(&[3]);
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Self::Blob(b) => {
                hasher.update(&[4]);
                hasher.update(&(b.len() as u64).to_le_bytes());
                hasher.update(b);
            }
        }
    }
}

type Key = SmallVec<[KeyValue; 2]>;

/// Read the key of `row`; `None` when any key column is NULL.
fn extract_key(batch: &Batch, key_channels: &[usize], row: usize) -> Result<Option<Key>> {
    let mut key = Key::with_capacity(key_channels.len());
    for &channel in key_channels {
        match KeyValue::from_scalar(batch.block(channel)?.value_at(row)?) {
            Some(value) => key.push(value),
            None => return Ok(None),
        }
    }
    Ok(Some(key))
}

fn hash_key(key: &[KeyValue]) -> u64 {
    let mut hasher = Xxh3::new();
    for value in key {
        value.hash_into(&mut hasher);
    }
    hasher.digest()
}

// ── Hash build index ───────────────────────────────────────────────────────

/// First and last build rows of one hash chain.
#[derive(Debug, Clone, Copy)]
struct ChainEnds {
    head: usize,
    tail: usize,
}

/// Chained hash table over one build batch.
///
/// Join positions are build row numbers.  Chains link rows with equal key
/// hashes in build order; rows whose key contains NULL are never linked.
#[derive(Debug)]
pub struct HashBuildIndex {
    batch: Arc<Batch>,
    key_channels: Vec<usize>,
    output_channels: Vec<usize>,
    output_specs: Vec<ColumnSpec>,
    /// Key of each build row, `None` for NULL keys.
    keys: Vec<Option<Key>>,
    chains: HashMap<u64, ChainEnds>,
    /// Next row in the same hash chain, parallel to `keys`.
    next: Vec<Option<usize>>,
}

impl HashBuildIndex {
    /// Index every row of `batch` by `key_channels`; `output_channels` are
    /// the build channels copied into join output.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::ChannelOutOfRange`] when a channel does not exist
    /// in `batch`.
    pub fn build(
        batch: Arc<Batch>,
        key_channels: Vec<usize>,
        output_channels: Vec<usize>,
    ) -> Result<Self> {
        let output_specs = output_channels
            .iter()
            .map(|&channel| batch.block(channel).map(|block| block.spec().clone()))
            .collect::<Result<Vec<_>>>()?;
        for &channel in &key_channels {
            batch.block(channel)?;
        }

        let row_count = batch.row_count();
        let mut keys = Vec::with_capacity(row_count);
        let mut next = vec![None; row_count];
        let mut chains: HashMap<u64, ChainEnds> = HashMap::with_capacity(row_count);
        for row in 0..row_count {
            let key = extract_key(&batch, &key_channels, row)?;
            if let Some(key) = &key {
                let hash = hash_key(key);
                match chains.get_mut(&hash) {
                    Some(ends) => {
                        next[ends.tail] = Some(row);
                        ends.tail = row;
                    }
                    None => {
                        chains.insert(
                            hash,
                            ChainEnds {
                                head: row,
                                tail: row,
                            },
                        );
                    }
                }
            }
            keys.push(key);
        }

        tracing::debug!(
            build_rows = row_count,
            distinct_hashes = chains.len(),
            key_channels = key_channels.len(),
            "built join hash index"
        );

        Ok(Self {
            batch,
            key_channels,
            output_channels,
            output_specs,
            keys,
            chains,
            next,
        })
    }

    #[must_use]
    pub fn key_channels(&self) -> &[usize] {
        &self.key_channels
    }

    #[must_use]
    pub fn batch(&self) -> &Arc<Batch> {
        &self.batch
    }

    fn row_of(&self, join_position: JoinPosition) -> Result<usize> {
        usize::try_from(join_position)
            .ok()
            .filter(|&row| row < self.keys.len())
            .ok_or(JoinError::InvalidJoinPosition {
                join_position,
                join_position_count: self.join_position_count(),
            })
    }

    /// Walk the chain from `current` to the first row whose key is `key`.
    fn find_in_chain(&self, mut current: Option<usize>, key: &[KeyValue]) -> Option<usize> {
        while let Some(row) = current {
            if self.keys[row].as_deref() == Some(key) {
                return Some(row);
            }
            current = self.next[row];
        }
        None
    }
}

impl BuildIndex for HashBuildIndex {
    fn output_specs(&self) -> &[ColumnSpec] {
        &self.output_specs
    }

    fn join_position_count(&self) -> u64 {
        self.keys.len() as u64
    }

    fn in_memory_size_bytes(&self) -> usize {
        let key_bytes: usize = self
            .keys
            .iter()
            .flatten()
            .flat_map(|key| key.iter())
            .map(|value| match value {
                KeyValue::Integer(_) | KeyValue::Float(_) => 8,
                KeyValue::Text(s) => s.len(),
                KeyValue::Blob(b) => b.len(),
            })
            .sum();
        self.batch.retained_size_in_bytes()
            + key_bytes
            + self.keys.len() * std::mem::size_of::<Option<Key>>()
            + self.next.len() * std::mem::size_of::<Option<usize>>()
            + self.chains.capacity() * std::mem::size_of::<(u64, ChainEnds)>()
    }

    fn copy_row_into(
        &self,
        join_position: JoinPosition,
        builders: &mut [ColumnBuilder],
        channel_offset: usize,
    ) -> Result<()> {
        let row = self.row_of(join_position)?;
        let end = channel_offset + self.output_channels.len();
        if end > builders.len() {
            return Err(JoinError::ChannelOutOfRange {
                channel: end - 1,
                channel_count: builders.len(),
            });
        }
        let targets = &mut builders[channel_offset..end];

        // Check every channel before writing so a failure leaves no partial row.
        let mut sources: SmallVec<[&Block; 8]> = SmallVec::with_capacity(targets.len());
        for (builder, &channel) in targets.iter().zip(&self.output_channels) {
            let block = self.batch.block(channel)?;
            if block.vector_type() != builder.spec().vector_type {
                return Err(JoinError::TypeMismatch {
                    column: builder.spec().name.clone(),
                    expected: builder.spec().vector_type.as_str(),
                    actual: block.vector_type().as_str(),
                });
            }
            sources.push(block);
        }
        for (builder, block) in targets.iter_mut().zip(sources) {
            builder.append_from_block(block, row)?;
        }
        Ok(())
    }

    fn join_position(
        &self,
        probe_batch: &Batch,
        key_channels: &[usize],
        row: usize,
    ) -> Result<Option<JoinPosition>> {
        if key_channels.len() != self.key_channels.len() {
            return Err(JoinError::KeyArityMismatch {
                build: self.key_channels.len(),
                probe: key_channels.len(),
            });
        }
        let Some(key) = extract_key(probe_batch, key_channels, row)? else {
            return Ok(None);
        };
        let head = self.chains.get(&hash_key(&key)).map(|ends| ends.head);
        Ok(self
            .find_in_chain(head, &key)
            .map(|row| row as JoinPosition))
    }

    fn next_join_position(&self, current: JoinPosition) -> Option<JoinPosition> {
        let row = self.row_of(current).ok()?;
        let key = self.keys[row].as_deref()?;
        self.find_in_chain(self.next[row], key)
            .map(|row| row as JoinPosition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjoin_vector::ColumnVectorType;

    fn build_batch(rows: &[(Option<i64>, &str)]) -> Arc<Batch> {
        let specs = [
            ColumnSpec::new("k", ColumnVectorType::Int64),
            ColumnSpec::new("name", ColumnVectorType::Text),
        ];
        let rows: Vec<Vec<ScalarValue>> = rows
            .iter()
            .map(|&(k, name)| vec![ScalarValue::from(k), ScalarValue::from(name)])
            .collect();
        Arc::new(Batch::from_rows(&rows, &specs).expect("build batch"))
    }

    fn probe_keys(keys: &[Option<i64>]) -> Batch {
        let specs = [ColumnSpec::new("pk", ColumnVectorType::Int64)];
        let rows: Vec<Vec<ScalarValue>> = keys.iter().map(|&k| vec![ScalarValue::from(k)]).collect();
        Batch::from_rows(&rows, &specs).expect("probe batch")
    }

    fn all_matches(index: &HashBuildIndex, probe: &Batch, row: usize) -> Vec<JoinPosition> {
        let mut out = Vec::new();
        let mut current = index.join_position(probe, &[0], row).expect("lookup");
        while let Some(position) = current {
            out.push(position);
            current = index.next_join_position(position);
        }
        out
    }

    #[test]
    fn duplicate_keys_chain_in_build_order() {
        let index = HashBuildIndex::build(
            build_batch(&[(Some(1), "a"), (Some(2), "b"), (Some(1), "c"), (Some(1), "d")]),
            vec![0],
            vec![1],
        )
        .expect("index");
        let probe = probe_keys(&[Some(1), Some(2), Some(3)]);
        assert_eq!(all_matches(&index, &probe, 0), vec![0, 2, 3]);
        assert_eq!(all_matches(&index, &probe, 1), vec![1]);
        assert!(all_matches(&index, &probe, 2).is_empty());
    }

    #[test]
    fn null_keys_never_match() {
        let index = HashBuildIndex::build(
            build_batch(&[(None, "null"), (Some(7), "seven")]),
            vec![0],
            vec![1],
        )
        .expect("index");
        let probe = probe_keys(&[None, Some(7)]);
        assert!(all_matches(&index, &probe, 0).is_empty());
        assert_eq!(all_matches(&index, &probe, 1), vec![1]);
        assert_eq!(index.next_join_position(0), None, "null build row is unlinked");
    }

    #[test]
    fn copy_row_into_writes_at_channel_offset() {
        let index = HashBuildIndex::build(
            build_batch(&[(Some(1), "a"), (Some(2), "b")]),
            vec![0],
            vec![1, 0],
        )
        .expect("index");
        let mut builders = vec![
            ColumnBuilder::new(ColumnSpec::new("pad", ColumnVectorType::Int64), 4),
            ColumnBuilder::new(ColumnSpec::new("name", ColumnVectorType::Text), 4),
            ColumnBuilder::new(ColumnSpec::new("k", ColumnVectorType::Int64), 4),
        ];
        index.copy_row_into(1, &mut builders, 1).expect("copy");
        assert_eq!(builders[0].len(), 0);
        let name = builders[1].build().expect("name column");
        let key = builders[2].build().expect("key column");
        assert_eq!(name.value_at(0).expect("name"), ScalarValue::from("b"));
        assert_eq!(key.integer_at(0), Some(2));
    }

    #[test]
    fn copy_row_into_rejects_bad_positions_and_short_builders() {
        let index = HashBuildIndex::build(build_batch(&[(Some(1), "a")]), vec![0], vec![1])
            .expect("index");
        let mut builders = vec![ColumnBuilder::new(
            ColumnSpec::new("name", ColumnVectorType::Text),
            1,
        )];
        assert_eq!(
            index.copy_row_into(5, &mut builders, 0).unwrap_err(),
            JoinError::InvalidJoinPosition {
                join_position: 5,
                join_position_count: 1
            }
        );
        assert!(matches!(
            index.copy_row_into(0, &mut builders, 1),
            Err(JoinError::ChannelOutOfRange { .. })
        ));
        assert!(builders[0].is_empty());
    }

    #[test]
    fn copy_row_into_checks_types_before_writing() {
        let index = HashBuildIndex::build(build_batch(&[(Some(1), "a")]), vec![0], vec![0, 1])
            .expect("index");
        let mut builders = vec![
            ColumnBuilder::new(ColumnSpec::new("k", ColumnVectorType::Int64), 1),
            ColumnBuilder::new(ColumnSpec::new("name", ColumnVectorType::Binary), 1),
        ];
        assert!(matches!(
            index.copy_row_into(0, &mut builders, 0),
            Err(JoinError::TypeMismatch { .. })
        ));
        assert!(builders.iter().all(ColumnBuilder::is_empty));
    }

    #[test]
    fn probe_key_arity_must_match() {
        let index = HashBuildIndex::build(build_batch(&[(Some(1), "a")]), vec![0], vec![1])
            .expect("index");
        let probe = probe_keys(&[Some(1)]);
        assert_eq!(
            index.join_position(&probe, &[0, 0], 0).unwrap_err(),
            JoinError::KeyArityMismatch { build: 1, probe: 2 }
        );
    }

    #[test]
    fn signed_zero_floats_join() {
        let specs = [ColumnSpec::new("f", ColumnVectorType::Float64)];
        let build = Arc::new(
            Batch::from_rows(&[vec![ScalarValue::Float(-0.0)]], &specs).expect("build"),
        );
        let probe = Batch::from_rows(&[vec![ScalarValue::Float(0.0)]], &specs).expect("probe");
        let index = HashBuildIndex::build(build, vec![0], vec![0]).expect("index");
        assert_eq!(index.join_position(&probe, &[0], 0).expect("lookup"), Some(0));
    }

    #[test]
    fn reports_statistics() {
        let index = HashBuildIndex::build(
            build_batch(&[(Some(1), "a"), (Some(2), "b")]),
            vec![0],
            vec![0, 1],
        )
        .expect("index");
        assert_eq!(index.join_position_count(), 2);
        assert_eq!(index.channel_count(), 2);
        assert!(index.in_memory_size_bytes() > index.batch().retained_size_in_bytes());
    }
}
