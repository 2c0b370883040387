//! Growable, reusable column builders.
//!
//! A builder is owned by a long-lived producer (the join row accumulator),
//! appended to row by row, materialized with [`ColumnBuilder::build`], and
//! then [`reset`](ColumnBuilder::reset) for the next batch.  Reset keeps every
//! buffer's capacity so steady-state batches do not reallocate.

use std::sync::Arc;

use fjoin_error::{JoinError, Result};

use crate::block::Block;
use crate::column::{
    Column, ColumnData, ColumnSpec, ColumnVectorType, NullBitmap, checked_offset_span,
};
use crate::value::ScalarValue;

#[derive(Debug, Clone)]
enum BuilderValues {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Text { offsets: Vec<u32>, data: Vec<u8> },
    Binary { offsets: Vec<u32>, data: Vec<u8> },
}

impl BuilderValues {
    fn with_capacity(vector_type: ColumnVectorType, rows: usize) -> Self {
        match vector_type {
            ColumnVectorType::Int32 => Self::Int32(Vec::with_capacity(rows)),
            ColumnVectorType::Int64 => Self::Int64(Vec::with_capacity(rows)),
            ColumnVectorType::Float64 => Self::Float64(Vec::with_capacity(rows)),
            ColumnVectorType::Text => Self::Text {
                offsets: varlen_offsets(rows),
                data: Vec::new(),
            },
            ColumnVectorType::Binary => Self::Binary {
                offsets: varlen_offsets(rows),
                data: Vec::new(),
            },
        }
    }
}

fn type_mismatch(spec: &ColumnSpec, actual: &'static str) -> JoinError {
    JoinError::TypeMismatch {
        column: spec.name.clone(),
        expected: spec.vector_type.as_str(),
        actual,
    }
}

fn varlen_offsets(rows: usize) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(rows + 1);
    offsets.push(0);
    offsets
}

fn push_varlen(offsets: &mut Vec<u32>, data: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    data.extend_from_slice(bytes);
    let end = u32::try_from(data.len()).map_err(|_| {
        JoinError::internal(format!(
            "variable-width builder exceeded u32 offsets ({} bytes)",
            data.len()
        ))
    })?;
    offsets.push(end);
    Ok(())
}

/// Append-only builder for one column.
#[derive(Debug, Clone)]
pub struct ColumnBuilder {
    spec: ColumnSpec,
    values: BuilderValues,
    validity: Vec<u8>,
    len: usize,
}

impl ColumnBuilder {
    /// Create a builder sized for `expected_rows` rows.
    #[must_use]
    pub fn new(spec: ColumnSpec, expected_rows: usize) -> Self {
        let values = BuilderValues::with_capacity(spec.vector_type, expected_rows);
        Self {
            spec,
            values,
            validity: Vec::with_capacity(expected_rows.div_ceil(8)),
            len: 0,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push_validity(&mut self, valid: bool) {
        let bit = self.len % 8;
        if bit == 0 {
            self.validity.push(0);
        }
        if valid {
            if let Some(last) = self.validity.last_mut() {
                *last |= 1_u8 << bit;
            }
        }
        self.len += 1;
    }

    /// Append a null row.
    pub fn append_null(&mut self) {
        match &mut self.values {
            BuilderValues::Int32(v) => v.push(0),
            BuilderValues::Int64(v) => v.push(0),
            BuilderValues::Float64(v) => v.push(0.0),
            BuilderValues::Text { offsets, .. } | BuilderValues::Binary { offsets, .. } => {
                let end = offsets.last().copied().unwrap_or_default();
                offsets.push(end);
            }
        }
        self.push_validity(false);
    }

    /// Append a scalar; `ScalarValue::Null` appends a null row.
    ///
    /// # Errors
    ///
    /// Returns an error when the scalar does not fit the builder's type.
    pub fn append_value(&mut self, value: &ScalarValue) -> Result<()> {
        if value.is_null() {
            self.append_null();
            return Ok(());
        }
        match (&mut self.values, value) {
            (BuilderValues::Int32(v), ScalarValue::Integer(x)) => {
                let narrowed = i32::try_from(*x).map_err(|_| JoinError::TypeMismatch {
                    column: self.spec.name.clone(),
                    expected: ColumnVectorType::Int32.as_str(),
                    actual: ColumnVectorType::Int64.as_str(),
                })?;
                v.push(narrowed);
            }
            (BuilderValues::Int64(v), ScalarValue::Integer(x)) => v.push(*x),
            (BuilderValues::Float64(v), ScalarValue::Float(x)) => v.push(*x),
            (BuilderValues::Text { offsets, data }, ScalarValue::Text(s)) => {
                push_varlen(offsets, data, s.as_bytes())?;
            }
            (BuilderValues::Binary { offsets, data }, ScalarValue::Blob(b)) => {
                push_varlen(offsets, data, b)?;
            }
            (_, other) => return Err(type_mismatch(&self.spec, other.type_name())),
        }
        self.push_validity(true);
        Ok(())
    }

    /// Copy row `row` of a flat column, including its null flag.
    ///
    /// # Errors
    ///
    /// Returns an error when the column type differs from the builder type or
    /// `row` is out of range.
    pub fn append_from_column(&mut self, column: &Column, row: usize) -> Result<()> {
        if row >= column.len() {
            return Err(JoinError::PositionOutOfRange {
                position: row,
                row_count: column.len(),
            });
        }
        if column.vector_type() != self.spec.vector_type {
            return Err(type_mismatch(&self.spec, column.vector_type().as_str()));
        }
        if column.is_null(row) {
            self.append_null();
            return Ok(());
        }
        match (&mut self.values, &column.data) {
            (BuilderValues::Int32(dst), ColumnData::Int32(src)) => dst.push(src[row]),
            (BuilderValues::Int64(dst), ColumnData::Int64(src)) => dst.push(src[row]),
            (BuilderValues::Float64(dst), ColumnData::Float64(src)) => dst.push(src[row]),
            (
                BuilderValues::Text { offsets, data },
                ColumnData::Text {
                    offsets: src_offsets,
                    data: src,
                },
            )
            | (
                BuilderValues::Binary { offsets, data },
                ColumnData::Binary {
                    offsets: src_offsets,
                    data: src,
                },
            ) => {
                let (start, end) =
                    checked_offset_span(src_offsets, src.len(), row, &column.spec.name)?;
                push_varlen(offsets, data, &src[start..end])?;
            }
            _ => return Err(type_mismatch(&self.spec, column.vector_type().as_str())),
        }
        self.push_validity(true);
        Ok(())
    }

    /// Copy logical row `row` of any block, resolving views to their source.
    ///
    /// # Errors
    ///
    /// Returns an error when the row is out of range or the types differ.
    pub fn append_from_block(&mut self, block: &Block, row: usize) -> Result<()> {
        let source_row = block.source_row(row).ok_or(JoinError::PositionOutOfRange {
            position: row,
            row_count: block.len(),
        })?;
        self.append_from_column(block.source(), source_row)
    }

    /// Estimated bytes held by appended data (not by spare capacity).
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        let values = match &self.values {
            BuilderValues::Int32(v) => v.len() * 4,
            BuilderValues::Int64(v) => v.len() * 8,
            BuilderValues::Float64(v) => v.len() * 8,
            BuilderValues::Text { offsets, data } | BuilderValues::Binary { offsets, data } => {
                offsets.len() * 4 + data.len()
            }
        };
        values + self.validity.len()
    }

    /// Drop all rows while keeping allocated capacity.
    pub fn reset(&mut self) {
        match &mut self.values {
            BuilderValues::Int32(v) => v.clear(),
            BuilderValues::Int64(v) => v.clear(),
            BuilderValues::Float64(v) => v.clear(),
            BuilderValues::Text { offsets, data } | BuilderValues::Binary { offsets, data } => {
                offsets.clear();
                offsets.push(0);
                data.clear();
            }
        }
        self.validity.clear();
        self.len = 0;
    }

    /// Materialize the appended rows into an immutable column.
    ///
    /// The builder keeps its contents; call [`reset`](Self::reset) before
    /// reusing it for the next batch.
    ///
    /// # Errors
    ///
    /// Returns an error only if the builder's internal buffers disagree.
    pub fn build(&self) -> Result<Column> {
        let data = match &self.values {
            BuilderValues::Int32(v) => ColumnData::Int32(Arc::from(v.as_slice())),
            BuilderValues::Int64(v) => ColumnData::Int64(Arc::from(v.as_slice())),
            BuilderValues::Float64(v) => ColumnData::Float64(Arc::from(v.as_slice())),
            BuilderValues::Text { offsets, data } => ColumnData::Text {
                offsets: Arc::from(offsets.as_slice()),
                data: Arc::from(data.as_slice()),
            },
            BuilderValues::Binary { offsets, data } => ColumnData::Binary {
                offsets: Arc::from(offsets.as_slice()),
                data: Arc::from(data.as_slice()),
            },
        };
        let validity = NullBitmap::from_bytes(Arc::from(self.validity.as_slice()), self.len)?;
        Column::try_new(self.spec.clone(), data, validity)
    }
}
