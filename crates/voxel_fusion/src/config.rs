//! Configuration for scenes, the spatial index and the warp solver.
//!
//! Everything numeric the algorithm depends on lives here and is passed in
//! by value. Defaults follow the reference KillingFusion setup
//! (4 mm voxels, 2 cm truncation band).

use glam::IVec3;

use crate::constants::{DEFAULT_BLOCK_CAPACITY, DEFAULT_BUCKET_COUNT, DEFAULT_EXCESS_CAPACITY};
use crate::error::{FusionError, FusionResult};

// =============================================================================
// SceneParams
// =============================================================================

/// Global parameters of a scene.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SceneParams {
  /// Voxel edge length in metres.
  pub voxel_size: f32,

  /// Truncation band in metres. Stored distances are divided by this.
  pub truncation_distance: f32,

  /// Cap for depth and colour weights.
  pub max_weight: u8,
}

impl Default for SceneParams {
  fn default() -> Self {
    Self {
      voxel_size: 0.004,
      truncation_distance: 0.02,
      max_weight: 100,
    }
  }
}

impl SceneParams {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_voxel_size(mut self, voxel_size: f32) -> Self {
    self.voxel_size = voxel_size;
    self
  }

  pub fn with_truncation_distance(mut self, truncation_distance: f32) -> Self {
    self.truncation_distance = truncation_distance;
    self
  }

  pub fn with_max_weight(mut self, max_weight: u8) -> Self {
    self.max_weight = max_weight;
    self
  }

  /// Truncation band expressed in voxels.
  #[inline]
  pub fn truncation_voxels(&self) -> f32 {
    self.truncation_distance / self.voxel_size
  }

  pub fn validate(&self) -> FusionResult<()> {
    if !(self.voxel_size > 0.0 && self.voxel_size.is_finite()) {
      return Err(FusionError::invalid_config(format!(
        "voxel_size must be positive, got {}",
        self.voxel_size
      )));
    }
    if !(self.truncation_distance >= self.voxel_size && self.truncation_distance.is_finite()) {
      return Err(FusionError::invalid_config(format!(
        "truncation_distance {} must be at least one voxel ({})",
        self.truncation_distance, self.voxel_size
      )));
    }
    if self.max_weight == 0 {
      return Err(FusionError::invalid_config("max_weight must be non-zero"));
    }
    Ok(())
  }
}

// =============================================================================
// IndexConfig
// =============================================================================

/// Capacities of the spatial hash and the block pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexConfig {
  /// Number of primary hash buckets. Must be a power of two.
  pub bucket_count: usize,

  /// Number of collision slots shared by all buckets.
  pub excess_capacity: usize,

  /// Maximum number of voxel blocks.
  pub block_capacity: usize,
}

impl IndexConfig {
  /// Default capacities for a full-size reconstruction volume.
  pub const DEFAULT: Self = Self {
    bucket_count: DEFAULT_BUCKET_COUNT,
    excess_capacity: DEFAULT_EXCESS_CAPACITY,
    block_capacity: DEFAULT_BLOCK_CAPACITY,
  };

  /// Small capacities for unit tests and examples.
  pub const SMALL: Self = Self {
    bucket_count: 0x400,
    excess_capacity: 0x100,
    block_capacity: 0x400,
  };

  pub fn with_bucket_count(mut self, bucket_count: usize) -> Self {
    self.bucket_count = bucket_count;
    self
  }

  pub fn with_excess_capacity(mut self, excess_capacity: usize) -> Self {
    self.excess_capacity = excess_capacity;
    self
  }

  pub fn with_block_capacity(mut self, block_capacity: usize) -> Self {
    self.block_capacity = block_capacity;
    self
  }

  pub fn validate(&self) -> FusionResult<()> {
    if !self.bucket_count.is_power_of_two() {
      return Err(FusionError::invalid_config(format!(
        "bucket_count must be a power of two, got {}",
        self.bucket_count
      )));
    }
    if self.block_capacity == 0 || self.block_capacity > i32::MAX as usize {
      return Err(FusionError::invalid_config(format!(
        "block_capacity out of range: {}",
        self.block_capacity
      )));
    }
    if self.excess_capacity >= i32::MAX as usize {
      return Err(FusionError::invalid_config("excess_capacity out of range"));
    }
    Ok(())
  }
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}

// =============================================================================
// SolverConfig
// =============================================================================

/// Parameters of the warp-field energy minimisation.
///
/// Term weights of zero skip the corresponding computation entirely.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfig {
  /// Killing rigidity factor γ. 0 gives pure Laplacian smoothing.
  pub rigidity: f32,

  /// Weight of the data term.
  pub weight_data: f32,

  /// Weight of the level-set term.
  pub weight_level_set: f32,

  /// Weight of the Killing term.
  pub weight_killing: f32,

  /// Weight of the colour contribution inside the data term.
  pub weight_color: f32,

  /// Gradient descent step size.
  pub learning_rate: f32,

  /// Stop when the largest update is at or below this length, in metres.
  pub convergence_threshold: f32,

  /// Iteration cap per frame.
  pub max_iterations: u32,

  /// Run the Sobolev smoothing passes between compute and apply.
  pub enable_smoothing: bool,

  /// Colour is used only where |canonical sdf| (normalized) is below this.
  pub color_sdf_threshold: f32,

  /// Guard added to the gradient norm in the level-set denominator.
  pub epsilon: f32,

  /// Voxel whose per-term vectors are reported to observers every iteration.
  pub focus_voxel: Option<IVec3>,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      rigidity: 0.1,
      weight_data: 1.0,
      weight_level_set: 0.2,
      weight_killing: 0.5,
      weight_color: 0.0,
      learning_rate: 0.1,
      convergence_threshold: 1.0e-4,
      max_iterations: 200,
      enable_smoothing: true,
      color_sdf_threshold: 0.25,
      epsilon: f32::EPSILON,
      focus_voxel: None,
    }
  }
}

impl SolverConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_rigidity(mut self, rigidity: f32) -> Self {
    self.rigidity = rigidity;
    self
  }

  pub fn with_term_weights(mut self, data: f32, level_set: f32, killing: f32) -> Self {
    self.weight_data = data;
    self.weight_level_set = level_set;
    self.weight_killing = killing;
    self
  }

  pub fn with_color(mut self, weight: f32, sdf_threshold: f32) -> Self {
    self.weight_color = weight;
    self.color_sdf_threshold = sdf_threshold;
    self
  }

  pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
    self.learning_rate = learning_rate;
    self
  }

  pub fn with_convergence_threshold(mut self, threshold: f32) -> Self {
    self.convergence_threshold = threshold;
    self
  }

  pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
    self.max_iterations = max_iterations;
    self
  }

  pub fn with_smoothing(mut self, enable: bool) -> Self {
    self.enable_smoothing = enable;
    self
  }

  pub fn with_epsilon(mut self, epsilon: f32) -> Self {
    self.epsilon = epsilon;
    self
  }

  pub fn with_focus_voxel(mut self, voxel: IVec3) -> Self {
    self.focus_voxel = Some(voxel);
    self
  }

  /// Convergence threshold converted to voxel units.
  #[inline]
  pub fn convergence_threshold_voxels(&self, params: &SceneParams) -> f32 {
    self.convergence_threshold / params.voxel_size
  }

  #[inline]
  pub(crate) fn color_enabled(&self) -> bool {
    self.weight_color != 0.0
  }

  pub fn validate(&self) -> FusionResult<()> {
    let finite = [
      ("rigidity", self.rigidity),
      ("weight_data", self.weight_data),
      ("weight_level_set", self.weight_level_set),
      ("weight_killing", self.weight_killing),
      ("weight_color", self.weight_color),
      ("learning_rate", self.learning_rate),
      ("convergence_threshold", self.convergence_threshold),
      ("color_sdf_threshold", self.color_sdf_threshold),
      ("epsilon", self.epsilon),
    ];
    for (name, value) in finite {
      if !value.is_finite() {
        return Err(FusionError::invalid_config(format!("{name} must be finite")));
      }
    }
    if self.rigidity < 0.0 {
      return Err(FusionError::invalid_config("rigidity must be non-negative"));
    }
    if self.learning_rate <= 0.0 {
      return Err(FusionError::invalid_config("learning_rate must be positive"));
    }
    if self.epsilon <= 0.0 {
      return Err(FusionError::invalid_config("epsilon must be positive"));
    }
    if self.convergence_threshold < 0.0 {
      return Err(FusionError::invalid_config(
        "convergence_threshold must be non-negative",
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
