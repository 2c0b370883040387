//! Column blocks: flat columns and zero-copy views over them.
//!
//! A [`Block`] is what a batch channel holds.  It is either a flat column or
//! a view that reads through to a shared source column:
//!
//! - a *slice* view (`offset`, `len`): a contiguous region of the source;
//! - a *dictionary* view (`ids`): row `i` reads source row `ids[i]`.
//!
//! Views hold an `Arc` of their source column, so the source storage stays
//! alive for as long as any view over it exists.  Composing views never
//! stacks indirections: slicing a slice adds offsets, and taking positions
//! from any view yields a single dictionary over the underlying source.

use std::fmt;
use std::sync::Arc;

use fjoin_error::{JoinError, Result};

use crate::builder::ColumnBuilder;
use crate::column::{Column, ColumnSpec, ColumnVectorType};
use crate::value::ScalarValue;

/// Physical shape of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Flat,
    Slice,
    Dictionary,
}

impl BlockKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Slice => "slice",
            Self::Dictionary => "dictionary",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One channel's worth of rows.
#[derive(Debug, Clone)]
pub enum Block {
    Flat(Arc<Column>),
    Slice {
        source: Arc<Column>,
        offset: usize,
        len: usize,
    },
    Dictionary {
        source: Arc<Column>,
        ids: Arc<[u32]>,
    },
}

impl From<Column> for Block {
    fn from(column: Column) -> Self {
        Self::Flat(Arc::new(column))
    }
}

impl From<Arc<Column>> for Block {
    fn from(column: Arc<Column>) -> Self {
        Self::Flat(column)
    }
}

impl Block {
    /// Empty flat block of the given spec.
    #[must_use]
    pub fn empty(spec: ColumnSpec) -> Self {
        Self::from(Column::empty(spec))
    }

    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        match self {
            Self::Flat(_) => BlockKind::Flat,
            Self::Slice { .. } => BlockKind::Slice,
            Self::Dictionary { .. } => BlockKind::Dictionary,
        }
    }

    #[must_use]
    pub const fn is_dictionary(&self) -> bool {
        matches!(self, Self::Dictionary { .. })
    }

    /// Column whose storage backs this block.
    #[must_use]
    pub fn source(&self) -> &Arc<Column> {
        match self {
            Self::Flat(source) | Self::Slice { source, .. } | Self::Dictionary { source, .. } => {
                source
            }
        }
    }

    #[must_use]
    pub fn spec(&self) -> &ColumnSpec {
        &self.source().spec
    }

    #[must_use]
    pub fn vector_type(&self) -> ColumnVectorType {
        self.source().vector_type()
    }

    /// Dictionary ids, when this block is a dictionary view.
    #[must_use]
    pub fn dictionary_ids(&self) -> Option<&Arc<[u32]>> {
        match self {
            Self::Dictionary { ids, .. } => Some(ids),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(source) => source.len(),
            Self::Slice { len, .. } => *len,
            Self::Dictionary { ids, .. } => ids.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row of the source column that logical row `row` reads, if in range.
    #[inline]
    #[must_use]
    pub fn source_row(&self, row: usize) -> Option<usize> {
        if row >= self.len() {
            return None;
        }
        match self {
            Self::Flat(_) => Some(row),
            Self::Slice { offset, .. } => Some(offset + row),
            Self::Dictionary { ids, .. } => Some(ids[row] as usize),
        }
    }

    /// Whether logical row `row` is null.  Rows past the end read as null.
    #[inline]
    #[must_use]
    pub fn is_null(&self, row: usize) -> bool {
        self.source_row(row)
            .is_none_or(|source_row| self.source().is_null(source_row))
    }

    /// Read logical row `row` as a scalar.
    ///
    /// # Errors
    ///
    /// Returns an error when `row` is out of range.
    pub fn value_at(&self, row: usize) -> Result<ScalarValue> {
        let source_row = self.source_row(row).ok_or(JoinError::PositionOutOfRange {
            position: row,
            row_count: self.len(),
        })?;
        self.source().value_at(source_row)
    }

    /// Integer value of logical row `row`, or `None` when null, out of range,
    /// or not an integer column.
    #[must_use]
    pub fn integer_at(&self, row: usize) -> Option<i64> {
        self.source_row(row)
            .and_then(|source_row| self.source().integer_at(source_row))
    }

    /// Payload bytes of logical row `row` (zero when out of range).
    #[must_use]
    pub fn value_size_bytes(&self, row: usize) -> usize {
        self.source_row(row)
            .map_or(0, |source_row| self.source().value_size_bytes(source_row))
    }

    /// Contiguous region `[offset, offset + len)` of this block, without copying.
    ///
    /// # Errors
    ///
    /// Returns an error when the region extends past the end of the block.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self> {
        let end = offset.checked_add(len).ok_or(JoinError::PositionOverflow(offset))?;
        if end > self.len() {
            return Err(JoinError::PositionOutOfRange {
                position: end.saturating_sub(1),
                row_count: self.len(),
            });
        }
        Ok(match self {
            Self::Flat(source) => Self::Slice {
                source: Arc::clone(source),
                offset,
                len,
            },
            Self::Slice {
                source,
                offset: base,
                ..
            } => Self::Slice {
                source: Arc::clone(source),
                offset: base + offset,
                len,
            },
            Self::Dictionary { source, ids } => Self::Dictionary {
                source: Arc::clone(source),
                ids: Arc::from(&ids[offset..end]),
            },
        })
    }

    /// Dictionary view selecting logical rows `ids`, in order, without
    /// copying values.  For a flat block the `ids` allocation is shared as-is,
    /// so one id array can back several channels.
    ///
    /// # Errors
    ///
    /// Returns an error when any id is out of range.
    pub fn take(&self, ids: &Arc<[u32]>) -> Result<Self> {
        let len = self.len();
        if let Some(&bad) = ids.iter().find(|&&id| id as usize >= len) {
            return Err(JoinError::PositionOutOfRange {
                position: bad as usize,
                row_count: len,
            });
        }
        Ok(match self {
            Self::Flat(source) => Self::Dictionary {
                source: Arc::clone(source),
                ids: Arc::clone(ids),
            },
            Self::Slice { source, offset, .. } => {
                let base = u32::try_from(*offset).map_err(|_| JoinError::PositionOverflow(*offset))?;
                Self::Dictionary {
                    source: Arc::clone(source),
                    ids: ids.iter().map(|&id| base + id).collect(),
                }
            }
            Self::Dictionary {
                source,
                ids: inner,
            } => Self::Dictionary {
                source: Arc::clone(source),
                ids: ids.iter().map(|&id| inner[id as usize]).collect(),
            },
        })
    }

    /// Copy this block's logical rows into a fresh flat column.
    ///
    /// # Errors
    ///
    /// Returns an error when source offsets are corrupt.
    pub fn materialize(&self) -> Result<Column> {
        if let Self::Flat(source) = self {
            return Ok(Column::clone(source));
        }
        let mut builder = ColumnBuilder::new(self.spec().clone(), self.len());
        for row in 0..self.len() {
            builder.append_from_block(self, row)?;
        }
        builder.build()
    }

    /// Bytes this block adds on top of storage it shares with other blocks.
    #[must_use]
    pub fn retained_size_in_bytes(&self) -> usize {
        match self {
            Self::Flat(source) => source.size_in_bytes(),
            Self::Slice { .. } => 0,
            Self::Dictionary { ids, .. } => ids.len() * 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(n: i64) -> Block {
        let values: Vec<ScalarValue> = (0..n).map(ScalarValue::Integer).collect();
        Block::from(
            Column::from_values(ColumnSpec::new("v", ColumnVectorType::Int64), &values)
                .expect("int column"),
        )
    }

    fn read_all(block: &Block) -> Vec<Option<i64>> {
        (0..block.len()).map(|row| block.integer_at(row)).collect()
    }

    #[test]
    fn slice_of_flat_reads_offset_rows() {
        let block = ints(10);
        let slice = block.slice(3, 4).unwrap();
        assert_eq!(slice.kind(), BlockKind::Slice);
        assert!(Arc::ptr_eq(slice.source(), block.source()));
        assert_eq!(read_all(&slice), vec![Some(3), Some(4), Some(5), Some(6)]);
    }

    #[test]
    fn slice_of_slice_collapses_offsets() {
        let block = ints(10);
        let nested = block.slice(2, 6).unwrap().slice(1, 3).unwrap();
        match &nested {
            Block::Slice { offset, len, .. } => {
                assert_eq!((*offset, *len), (3, 3));
            }
            other => panic!("expected slice, got {:?}", other.kind()),
        }
        assert_eq!(read_all(&nested), vec![Some(3), Some(4), Some(5)]);
    }

    #[test]
    fn slice_rejects_overrun() {
        let block = ints(5);
        assert!(block.slice(3, 3).is_err());
        assert!(block.slice(5, 0).unwrap().is_empty());
    }

    #[test]
    fn take_of_flat_shares_ids() {
        let block = ints(10);
        let ids: Arc<[u32]> = Arc::from(vec![9_u32, 0, 9, 4]);
        let dict = block.take(&ids).unwrap();
        assert!(dict.is_dictionary());
        assert!(Arc::ptr_eq(dict.dictionary_ids().unwrap(), &ids));
        assert_eq!(read_all(&dict), vec![Some(9), Some(0), Some(9), Some(4)]);
    }

    #[test]
    fn take_of_views_composes_to_single_dictionary() {
        let block = ints(10);
        let ids: Arc<[u32]> = Arc::from(vec![1_u32, 0]);

        let from_slice = block.slice(5, 3).unwrap().take(&ids).unwrap();
        assert!(Arc::ptr_eq(from_slice.source(), block.source()));
        assert_eq!(read_all(&from_slice), vec![Some(6), Some(5)]);

        let inner: Arc<[u32]> = Arc::from(vec![7_u32, 2, 8]);
        let from_dict = block.take(&inner).unwrap().take(&ids).unwrap();
        assert!(Arc::ptr_eq(from_dict.source(), block.source()));
        assert_eq!(read_all(&from_dict), vec![Some(2), Some(7)]);
    }

    #[test]
    fn take_rejects_out_of_range_ids() {
        let block = ints(3);
        let ids: Arc<[u32]> = Arc::from(vec![0_u32, 3]);
        assert_eq!(
            block.take(&ids).unwrap_err(),
            JoinError::PositionOutOfRange {
                position: 3,
                row_count: 3
            }
        );
    }

    #[test]
    fn slice_of_dictionary_stays_dictionary() {
        let block = ints(10);
        let ids: Arc<[u32]> = Arc::from(vec![8_u32, 6, 4, 2]);
        let sliced = block.take(&ids).unwrap().slice(1, 2).unwrap();
        assert!(sliced.is_dictionary());
        assert_eq!(read_all(&sliced), vec![Some(6), Some(4)]);
    }

    #[test]
    fn materialize_flattens_views_with_nulls() {
        let column = Column::from_values(
            ColumnSpec::new("t", ColumnVectorType::Text),
            &[
                ScalarValue::from("a"),
                ScalarValue::Null,
                ScalarValue::from("c"),
            ],
        )
        .unwrap();
        let block = Block::from(column);
        let ids: Arc<[u32]> = Arc::from(vec![2_u32, 1, 0]);
        let flat = block.take(&ids).unwrap().materialize().unwrap();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat.value_at(0).unwrap(), ScalarValue::from("c"));
        assert!(flat.is_null(1));
        assert_eq!(flat.value_at(2).unwrap(), ScalarValue::from("a"));
    }

    #[test]
    fn out_of_range_rows_read_as_null() {
        let block = ints(2);
        assert!(!block.is_null(1));
        assert!(block.is_null(2));
        assert!(block.value_at(2).is_err());
    }

    mod prop {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn composed_views_read_like_direct_indexing(
                len in 1_usize..64,
                offset_seed in 0_usize..64,
                picks in proptest::collection::vec(0_usize..64, 0..32),
            ) {
                let block = ints(len as i64);
                let offset = offset_seed % len;
                let slice = block.slice(offset, len - offset).unwrap();
                let ids: Arc<[u32]> = picks
                    .iter()
                    .map(|&p| (p % slice.len()) as u32)
                    .collect();
                let dict = slice.take(&ids).unwrap();

                prop_assert!(Arc::ptr_eq(dict.source(), block.source()));
                prop_assert_eq!(dict.len(), ids.len());
                for (row, &id) in ids.iter().enumerate() {
                    prop_assert_eq!(dict.integer_at(row), Some((offset + id as usize) as i64));
                }
            }
        }
    }
}
