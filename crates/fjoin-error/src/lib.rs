//! Error type shared by the join output-assembly crates.
//!
//! Every failure in the assembly path is fatal for the current operator
//! invocation: nothing here is retried, and callers propagate with `?` until
//! the operator turns the error into a query failure.

use thiserror::Error;

/// Errors raised while accumulating or assembling join output batches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// An append was attempted on an accumulator that was drained but not reset.
    #[error("append after drain: the accumulator must be reset before it accepts new rows")]
    AppendAfterDrain,

    /// The probe cursor's batch is not the batch whose positions were recorded.
    #[error("probe batch mismatch: positions were recorded against a different probe batch")]
    ProbeBatchMismatch,

    /// The probe cursor has not been advanced onto a row.
    #[error("probe cursor is not positioned on a row")]
    CursorNotPositioned,

    /// A recorded probe position lies outside the probe batch.
    #[error("probe position {position} out of range for batch of {row_count} rows")]
    PositionOutOfRange { position: usize, row_count: usize },

    /// A probe position does not fit the 32-bit position buffer.
    #[error("probe position {0} does not fit into a u32 position entry")]
    PositionOverflow(usize),

    /// A join position does not identify a live row of the build index.
    #[error("join position {join_position} is invalid (index holds {join_position_count} rows)")]
    InvalidJoinPosition {
        join_position: u64,
        join_position_count: u64,
    },

    /// A channel index addresses a column that does not exist.
    #[error("channel {channel} out of range ({channel_count} channels)")]
    ChannelOutOfRange { channel: usize, channel_count: usize },

    /// A value or block of one column type was routed to another.
    #[error("type mismatch on column {column}: expected {expected}, found {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Probe key channels and build key channels disagree in arity.
    #[error("join key arity mismatch: build side has {build} keys, probe side has {probe}")]
    KeyArityMismatch { build: usize, probe: usize },

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl JoinError {
    /// Build an [`JoinError::Internal`] from any message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error reports a caller-side precondition violation
    /// rather than a configuration problem or an internal fault.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::AppendAfterDrain
                | Self::ProbeBatchMismatch
                | Self::CursorNotPositioned
                | Self::PositionOutOfRange { .. }
                | Self::PositionOverflow(_)
                | Self::InvalidJoinPosition { .. }
                | Self::ChannelOutOfRange { .. }
                | Self::TypeMismatch { .. }
                | Self::KeyArityMismatch { .. }
        )
    }
}

/// Result alias used across the join assembly crates.
pub type Result<T> = std::result::Result<T, JoinError>;
