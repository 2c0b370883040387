//! Columnar primitives for vectorized join output.
//!
//! Batches are lists of [`Block`]s.  A block is either a flat [`Column`] or a
//! zero-copy view (slice or dictionary) over one; [`ColumnBuilder`] grows new
//! flat columns row by row and can be reset without releasing its buffers.

pub mod batch;
pub mod block;
pub mod builder;
pub mod column;
pub mod value;

pub use batch::Batch;
pub use block::{Block, BlockKind};
pub use builder::ColumnBuilder;
pub use column::{Column, ColumnData, ColumnSpec, ColumnVectorType, NullBitmap};
pub use value::ScalarValue;

/// Default number of rows a producer sizes its buffers for.
pub const DEFAULT_BATCH_ROW_CAPACITY: usize = 1024;
