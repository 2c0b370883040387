//! Lookup-join output batch assembly.
//!
//! A hash join's probe phase emits output rows one at a time into a
//! [`JoinRowAccumulator`].  Draining the accumulator yields a columnar
//! [`fjoin_vector::Batch`] whose probe channels are zero-copy views over the
//! probe batch (reused as-is, sliced, or dictionary-wrapped depending on the
//! recorded positions) and whose build channels are freshly built columns.
//!
//! [`LookupJoinProbe`] drives the accumulator over a probe batch and a
//! [`BuildIndex`] for inner and probe-outer joins.

pub mod accumulator;
pub mod assembler;
pub mod build_index;
pub mod config;
pub mod join;
pub mod metrics;
pub mod probe;

pub use accumulator::JoinRowAccumulator;
pub use assembler::{ProbeSelection, assemble_probe_blocks, classify_positions, is_contiguous_run};
pub use build_index::{BuildIndex, HashBuildIndex, JoinPosition};
pub use config::BatchSizePolicy;
pub use join::{JoinType, LookupJoinProbe};
pub use metrics::{
    JoinAssemblyMetricsSnapshot, join_assembly_metrics_snapshot, reset_join_assembly_metrics,
};
pub use probe::{BatchProbeCursor, ProbeCursor};
