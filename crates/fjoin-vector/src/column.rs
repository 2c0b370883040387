//! Flat column storage: type tags, validity bitmaps and immutable value buffers.

use std::sync::Arc;

use fjoin_error::{JoinError, Result};
use serde::{Deserialize, Serialize};

use crate::builder::ColumnBuilder;
use crate::value::ScalarValue;

// ── Column types ───────────────────────────────────────────────────────────

/// Physical vector type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnVectorType {
    Int32,
    Int64,
    Float64,
    Text,
    Binary,
}

impl ColumnVectorType {
    /// Stable label used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }

    /// Byte width of one value, or `None` for variable-width types.
    #[must_use]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Int32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::Text | Self::Binary => None,
        }
    }

    #[must_use]
    pub const fn is_variable_width(self) -> bool {
        self.fixed_width().is_none()
    }
}

/// Name and type of one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub vector_type: ColumnVectorType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, vector_type: ColumnVectorType) -> Self {
        Self {
            name: name.into(),
            vector_type,
        }
    }
}

// ── Validity ───────────────────────────────────────────────────────────────

/// Packed validity bitmap; bit `i` set means row `i` holds a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullBitmap {
    bytes: Arc<[u8]>,
    len: usize,
}

impl NullBitmap {
    /// Bitmap with every row valid.
    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        Self {
            bytes: Arc::from(vec![0xFF_u8; len.div_ceil(8)]),
            len,
        }
    }

    /// Wrap packed validity bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when `bytes` is too short for `len` rows.
    pub fn from_bytes(bytes: Arc<[u8]>, len: usize) -> Result<Self> {
        if bytes.len() < len.div_ceil(8) {
            return Err(JoinError::internal(format!(
                "validity bitmap holds {} bytes, {len} rows need {}",
                bytes.len(),
                len.div_ceil(8)
            )));
        }
        Ok(Self { bytes, len })
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self, idx: usize) -> bool {
        idx < self.len && self.bytes[idx / 8] & (1_u8 << (idx % 8)) != 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        (0..self.len).filter(|&idx| !self.is_valid(idx)).count()
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

// ── Data ───────────────────────────────────────────────────────────────────

/// Immutable, shareable value buffers of one column.
///
/// Variable-width columns store `len + 1` offsets into a shared byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int32(Arc<[i32]>),
    Int64(Arc<[i64]>),
    Float64(Arc<[f64]>),
    Text { offsets: Arc<[u32]>, data: Arc<[u8]> },
    Binary { offsets: Arc<[u32]>, data: Arc<[u8]> },
}

impl ColumnData {
    /// Zero-row buffers of the given type.
    #[must_use]
    pub fn empty(vector_type: ColumnVectorType) -> Self {
        match vector_type {
            ColumnVectorType::Int32 => Self::Int32(Arc::from(Vec::<i32>::new())),
            ColumnVectorType::Int64 => Self::Int64(Arc::from(Vec::<i64>::new())),
            ColumnVectorType::Float64 => Self::Float64(Arc::from(Vec::<f64>::new())),
            ColumnVectorType::Text => Self::Text {
                offsets: Arc::from(vec![0_u32]),
                data: Arc::from(Vec::<u8>::new()),
            },
            ColumnVectorType::Binary => Self::Binary {
                offsets: Arc::from(vec![0_u32]),
                data: Arc::from(Vec::<u8>::new()),
            },
        }
    }

    #[must_use]
    pub const fn vector_type(&self) -> ColumnVectorType {
        match self {
            Self::Int32(_) => ColumnVectorType::Int32,
            Self::Int64(_) => ColumnVectorType::Int64,
            Self::Float64(_) => ColumnVectorType::Float64,
            Self::Text { .. } => ColumnVectorType::Text,
            Self::Binary { .. } => ColumnVectorType::Binary,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Text { offsets, .. } | Self::Binary { offsets, .. } => {
                offsets.len().saturating_sub(1)
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by the value buffers.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::Int32(v) => v.len() * 4,
            Self::Int64(v) => v.len() * 8,
            Self::Float64(v) => v.len() * 8,
            Self::Text { offsets, data } | Self::Binary { offsets, data } => {
                offsets.len() * 4 + data.len()
            }
        }
    }
}

/// Validated `[start, end)` byte span of row `row_idx` in a variable-width buffer.
pub(crate) fn checked_offset_span(
    offsets: &[u32],
    data_len: usize,
    row_idx: usize,
    column: &str,
) -> Result<(usize, usize)> {
    if row_idx + 1 >= offsets.len() {
        return Err(JoinError::PositionOutOfRange {
            position: row_idx,
            row_count: offsets.len().saturating_sub(1),
        });
    }
    let start = offsets[row_idx] as usize;
    let end = offsets[row_idx + 1] as usize;
    if start > end || end > data_len {
        return Err(JoinError::internal(format!(
            "column {column} has invalid offset range [{start}, {end}) for row {row_idx} \
             (data_len={data_len})"
        )));
    }
    Ok((start, end))
}

// ── Column ─────────────────────────────────────────────────────────────────

/// A fully materialized column: spec, values and validity.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub spec: ColumnSpec,
    pub data: ColumnData,
    pub validity: NullBitmap,
}

impl Column {
    /// Assemble a column after checking that its parts agree.
    ///
    /// # Errors
    ///
    /// Returns an error when the data type differs from the spec or when the
    /// validity bitmap and the data disagree on row count.
    pub fn try_new(spec: ColumnSpec, data: ColumnData, validity: NullBitmap) -> Result<Self> {
        if data.vector_type() != spec.vector_type {
            return Err(JoinError::TypeMismatch {
                column: spec.name,
                expected: spec.vector_type.as_str(),
                actual: data.vector_type().as_str(),
            });
        }
        if data.len() != validity.len() {
            return Err(JoinError::internal(format!(
                "column {} holds {} values but {} validity bits",
                spec.name,
                data.len(),
                validity.len()
            )));
        }
        Ok(Self {
            spec,
            data,
            validity,
        })
    }

    /// Zero-row column of the given spec.
    #[must_use]
    pub fn empty(spec: ColumnSpec) -> Self {
        let data = ColumnData::empty(spec.vector_type);
        Self {
            spec,
            data,
            validity: NullBitmap::all_valid(0),
        }
    }

    /// Build a column from row values; `ScalarValue::Null` becomes a null row.
    ///
    /// # Errors
    ///
    /// Returns an error when a value does not fit the spec's vector type.
    pub fn from_values(spec: ColumnSpec, values: &[ScalarValue]) -> Result<Self> {
        let mut builder = ColumnBuilder::new(spec, values.len());
        for value in values {
            builder.append_value(value)?;
        }
        builder.build()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub const fn vector_type(&self) -> ColumnVectorType {
        self.data.vector_type()
    }

    #[inline]
    #[must_use]
    pub fn is_null(&self, row: usize) -> bool {
        !self.validity.is_valid(row)
    }

    /// Read row `row` as a scalar.
    ///
    /// # Errors
    ///
    /// Returns an error when `row` is out of range, a variable-width value
    /// has corrupt offsets, or a text value is not valid UTF-8.
    pub fn value_at(&self, row: usize) -> Result<ScalarValue> {
        if row >= self.len() {
            return Err(JoinError::PositionOutOfRange {
                position: row,
                row_count: self.len(),
            });
        }
        if self.is_null(row) {
            return Ok(ScalarValue::Null);
        }
        match &self.data {
            ColumnData::Int32(v) => Ok(ScalarValue::Integer(i64::from(v[row]))),
            ColumnData::Int64(v) => Ok(ScalarValue::Integer(v[row])),
            ColumnData::Float64(v) => Ok(ScalarValue::Float(v[row])),
            ColumnData::Text { offsets, data } => {
                let (start, end) = checked_offset_span(offsets, data.len(), row, &self.spec.name)?;
                let text = String::from_utf8(data[start..end].to_vec()).map_err(|err| {
                    JoinError::internal(format!(
                        "column {} row {row} holds invalid utf-8: {err}",
                        self.spec.name
                    ))
                })?;
                Ok(ScalarValue::Text(text))
            }
            ColumnData::Binary { offsets, data } => {
                let (start, end) = checked_offset_span(offsets, data.len(), row, &self.spec.name)?;
                Ok(ScalarValue::Blob(data[start..end].to_vec()))
            }
        }
    }

    /// Integer value of `row`, or `None` when null, out of range or not integral.
    #[must_use]
    pub fn integer_at(&self, row: usize) -> Option<i64> {
        if row >= self.len() || self.is_null(row) {
            return None;
        }
        match &self.data {
            ColumnData::Int32(v) => Some(i64::from(v[row])),
            ColumnData::Int64(v) => Some(v[row]),
            _ => None,
        }
    }

    /// Data bytes attributable to a single row.
    ///
    /// Fixed-width rows report their width; variable-width rows report the
    /// length of their payload (zero when the offsets are unusable).
    #[must_use]
    pub fn value_size_bytes(&self, row: usize) -> usize {
        match &self.data {
            ColumnData::Text { offsets, data } | ColumnData::Binary { offsets, data } => {
                checked_offset_span(offsets, data.len(), row, &self.spec.name)
                    .map_or(0, |(start, end)| end - start)
            }
            fixed => fixed.vector_type().fixed_width().unwrap_or(0),
        }
    }

    /// Bytes held by values and validity.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.data.size_in_bytes() + self.validity.byte_len()
    }
}
