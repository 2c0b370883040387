//! Columnar batches: an ordered set of equally long blocks.

use fjoin_error::{JoinError, Result};

use crate::block::Block;
use crate::builder::ColumnBuilder;
use crate::column::{Column, ColumnSpec};
use crate::value::ScalarValue;

/// An ordered list of channels, each exactly `row_count` rows long.
#[derive(Debug, Clone)]
pub struct Batch {
    blocks: Vec<Block>,
    row_count: usize,
}

impl Batch {
    /// Assemble a batch after checking that every block has `row_count` rows.
    ///
    /// # Errors
    ///
    /// Returns an error when a block length differs from `row_count`.
    pub fn try_new(blocks: Vec<Block>, row_count: usize) -> Result<Self> {
        if let Some((channel, block)) = blocks
            .iter()
            .enumerate()
            .find(|(_, block)| block.len() != row_count)
        {
            return Err(JoinError::internal(format!(
                "channel {channel} ({}) holds {} rows, batch expects {row_count}",
                block.spec().name,
                block.len()
            )));
        }
        Ok(Self { blocks, row_count })
    }

    /// Batch of flat columns; the row count is taken from the first column.
    ///
    /// # Errors
    ///
    /// Returns an error when the columns differ in length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let row_count = columns.first().map_or(0, Column::len);
        Self::try_new(columns.into_iter().map(Block::from).collect(), row_count)
    }

    /// Batch built from row-oriented values.
    ///
    /// # Errors
    ///
    /// Returns an error when a row is too short or a value does not fit its
    /// column type.
    pub fn from_rows(rows: &[Vec<ScalarValue>], specs: &[ColumnSpec]) -> Result<Self> {
        let mut builders: Vec<ColumnBuilder> = specs
            .iter()
            .map(|spec| ColumnBuilder::new(spec.clone(), rows.len()))
            .collect();
        for row in rows {
            if row.len() != specs.len() {
                return Err(JoinError::ChannelOutOfRange {
                    channel: row.len().min(specs.len()),
                    channel_count: specs.len(),
                });
            }
            for (builder, value) in builders.iter_mut().zip(row) {
                builder.append_value(value)?;
            }
        }
        let columns = builders
            .iter()
            .map(ColumnBuilder::build)
            .collect::<Result<Vec<_>>>()?;
        Self::try_new(columns.into_iter().map(Block::from).collect(), rows.len())
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Block at `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error when `channel` is out of range.
    pub fn block(&self, channel: usize) -> Result<&Block> {
        self.blocks.get(channel).ok_or(JoinError::ChannelOutOfRange {
            channel,
            channel_count: self.blocks.len(),
        })
    }

    #[must_use]
    pub fn specs(&self) -> Vec<ColumnSpec> {
        self.blocks.iter().map(|block| block.spec().clone()).collect()
    }

    /// Values of one row across every channel.
    ///
    /// # Errors
    ///
    /// Returns an error when `row` is out of range.
    pub fn row(&self, row: usize) -> Result<Vec<ScalarValue>> {
        self.blocks.iter().map(|block| block.value_at(row)).collect()
    }

    /// Materialize every row; useful for comparing against row-at-a-time
    /// reference output.
    ///
    /// # Errors
    ///
    /// Returns an error when a block cannot be read.
    pub fn to_rows(&self) -> Result<Vec<Vec<ScalarValue>>> {
        (0..self.row_count).map(|row| self.row(row)).collect()
    }

    /// Bytes retained by this batch beyond storage shared with views.
    #[must_use]
    pub fn retained_size_in_bytes(&self) -> usize {
        self.blocks.iter().map(Block::retained_size_in_bytes).sum()
    }
}
