//! Error types for fusion and warp estimation.

use glam::IVec3;
use thiserror::Error;

/// Result type alias for fusion operations.
pub type FusionResult<T> = Result<T, FusionError>;

/// Fixed-capacity resource that can run out during allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
  /// The voxel block pool.
  BlockStore,
  /// The hash collision excess list.
  ExcessList,
}

impl std::fmt::Display for Resource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Resource::BlockStore => f.write_str("voxel block store"),
      Resource::ExcessList => f.write_str("hash excess list"),
    }
  }
}

/// Errors raised by the fusion core.
///
/// Reading an unallocated region is not an error: samplers return the
/// truncated default. Hitting the iteration cap is not an error either;
/// it is reported through [`crate::tracker::FrameReport::converged`].
#[derive(Debug, Error)]
pub enum FusionError {
  /// Capacity of the index or the block store was exceeded while allocating.
  #[error("{resource} exhausted (capacity {capacity}) while allocating block {block}")]
  ResourceExhausted {
    resource: Resource,
    capacity: usize,
    block: IVec3,
  },

  /// A warp update evaluated to NaN or infinity.
  #[error("non-finite warp update {value} at voxel {voxel} (block {block})")]
  NumericDegeneracy {
    block: IVec3,
    voxel: IVec3,
    value: glam::Vec3,
  },

  /// A configuration value is out of its valid range.
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  /// A checkpoint could not be restored.
  #[error("checkpoint mismatch: {0}")]
  CheckpointMismatch(String),
}

impl FusionError {
  /// Create an invalid configuration error.
  #[must_use]
  pub fn invalid_config(msg: impl Into<String>) -> Self {
    Self::InvalidConfig(msg.into())
  }
}
