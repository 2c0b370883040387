//! Output batch sizing policy.

use fjoin_error::{JoinError, Result};
use serde::{Deserialize, Serialize};

/// Default row limit of one join output batch.
pub const DEFAULT_MAX_ROW_COUNT: usize = 64 * 1024;

/// Default byte limit of one join output batch.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 1024 * 1024;

/// Default number of rows builders are pre-sized for.
pub const DEFAULT_EXPECTED_ROW_COUNT: usize = fjoin_vector::DEFAULT_BATCH_ROW_CAPACITY;

/// When a join output batch counts as full.
///
/// A batch is full once it holds `max_row_count` rows or its estimated
/// footprint reaches `max_size_bytes`.  Missing fields deserialize to their
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSizePolicy {
    pub max_row_count: usize,
    pub max_size_bytes: usize,
    /// Capacity hint for builders and the position buffer.
    pub expected_row_count: usize,
}

impl Default for BatchSizePolicy {
    fn default() -> Self {
        Self {
            max_row_count: DEFAULT_MAX_ROW_COUNT,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            expected_row_count: DEFAULT_EXPECTED_ROW_COUNT,
        }
    }
}

impl BatchSizePolicy {
    #[must_use]
    pub const fn with_max_row_count(mut self, max_row_count: usize) -> Self {
        self.max_row_count = max_row_count;
        self
    }

    #[must_use]
    pub const fn with_max_size_bytes(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    #[must_use]
    pub const fn with_expected_row_count(mut self, expected_row_count: usize) -> Self {
        self.expected_row_count = expected_row_count;
        self
    }

    /// Reject limits under which no batch could ever hold a row.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidConfig`] when a limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_row_count == 0 {
            return Err(JoinError::InvalidConfig(
                "max_row_count must be positive".to_owned(),
            ));
        }
        if self.max_size_bytes == 0 {
            return Err(JoinError::InvalidConfig(
                "max_size_bytes must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Capacity to pre-size buffers with: the hint, capped by the row limit.
    #[must_use]
    pub fn initial_capacity(&self) -> usize {
        self.expected_row_count.min(self.max_row_count)
    }
}
