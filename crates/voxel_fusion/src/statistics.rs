//! Read-only reductions over a scene.
//!
//! Every statistic is computed per block in parallel and combined by
//! addition, min or max; no shared accumulator is touched by workers.

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::constants::{BLOCK_SIZE, BLOCK_SIZE_CB};
use crate::scene::{voxel_position, Scene};
use crate::types::{Voxel, WarpVoxel};

/// Voxel-space axis-aligned bounds, `max` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoxelBounds {
  pub min: IVec3,
  pub max: IVec3,
}

impl VoxelBounds {
  pub const EMPTY: Self = Self {
    min: IVec3::ZERO,
    max: IVec3::ZERO,
  };

  pub fn extent(&self) -> IVec3 {
    self.max - self.min
  }

  pub fn is_empty(&self) -> bool {
    self.extent().cmple(IVec3::ZERO).any()
  }

  pub fn contains(&self, voxel: IVec3) -> bool {
    voxel.cmpge(self.min).all() && voxel.cmplt(self.max).all()
  }
}

/// Distance summary of all allocated voxels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SdfSummary {
  pub voxel_count: usize,
  /// Voxels with `|sdf| >= 1`.
  pub truncated_count: usize,
  pub non_truncated_count: usize,
  pub truncated_abs_sum: f64,
  pub non_truncated_abs_sum: f64,
  /// Voxels with a non-zero depth weight.
  pub weighted_count: usize,
}

impl SdfSummary {
  fn merge(self, other: Self) -> Self {
    Self {
      voxel_count: self.voxel_count + other.voxel_count,
      truncated_count: self.truncated_count + other.truncated_count,
      non_truncated_count: self.non_truncated_count + other.non_truncated_count,
      truncated_abs_sum: self.truncated_abs_sum + other.truncated_abs_sum,
      non_truncated_abs_sum: self.non_truncated_abs_sum + other.non_truncated_abs_sum,
      weighted_count: self.weighted_count + other.weighted_count,
    }
  }

  /// Mean `|sdf|` over non-truncated voxels, 0 when there are none.
  pub fn mean_non_truncated_abs(&self) -> f64 {
    if self.non_truncated_count == 0 {
      0.0
    } else {
      self.non_truncated_abs_sum / self.non_truncated_count as f64
    }
  }
}

/// Warp field summary over voxels with a non-zero depth weight.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WarpSummary {
  pub voxel_count: usize,
  pub mean_warp: Vec3,
  pub max_warp_length: f32,
  /// Voxel holding the longest warp.
  pub max_warp_voxel: IVec3,
}

/// Allocated block coordinates, in allocation order.
pub fn allocated_blocks<V: Voxel>(scene: &Scene<V>) -> Vec<IVec3> {
  scene.block_positions().to_vec()
}

/// Number of voxels in allocated blocks.
pub fn voxel_count<V: Voxel>(scene: &Scene<V>) -> usize {
  scene.block_count() * BLOCK_SIZE_CB
}

/// Tight voxel-space bounds of all allocated blocks; zero extent when empty.
pub fn bounds<V: Voxel>(scene: &Scene<V>) -> VoxelBounds {
  let block = IVec3::splat(BLOCK_SIZE as i32);
  scene
    .block_positions()
    .par_iter()
    .map(|pos| {
      let min = *pos * block;
      VoxelBounds { min, max: min + block }
    })
    .reduce_with(|a, b| VoxelBounds {
      min: a.min.min(b.min),
      max: a.max.max(b.max),
    })
    .unwrap_or(VoxelBounds::EMPTY)
}

/// Counts and `|sdf|` sums split by truncation.
pub fn sdf_summary<V: Voxel>(scene: &Scene<V>) -> SdfSummary {
  scene
    .par_blocks()
    .map(|(_, _, block)| {
      let mut s = SdfSummary::default();
      for voxel in block {
        let abs = voxel.sdf().abs();
        s.voxel_count += 1;
        if abs >= 1.0 {
          s.truncated_count += 1;
          s.truncated_abs_sum += abs as f64;
        } else {
          s.non_truncated_count += 1;
          s.non_truncated_abs_sum += abs as f64;
        }
        if voxel.depth_weight() > 0 {
          s.weighted_count += 1;
        }
      }
      s
    })
    .reduce(SdfSummary::default, SdfSummary::merge)
}

/// Mean and maximum warp over weighted voxels.
pub fn warp_summary<C: WarpVoxel>(scene: &Scene<C>) -> WarpSummary {
  let (count, sum, max_len, max_voxel) = scene
    .par_blocks()
    .map(|(_, pos, block)| {
      let mut acc = (0usize, Vec3::ZERO, 0.0f32, IVec3::ZERO);
      for (idx, voxel) in block.iter().enumerate() {
        if voxel.depth_weight() == 0 {
          continue;
        }
        let warp = voxel.warp();
        acc.0 += 1;
        acc.1 += warp;
        let len = warp.length();
        if len > acc.2 {
          acc.2 = len;
          acc.3 = voxel_position(pos, idx);
        }
      }
      acc
    })
    .reduce(
      || (0, Vec3::ZERO, 0.0, IVec3::ZERO),
      |a, b| {
        let (max_len, max_voxel) = if b.2 > a.2 { (b.2, b.3) } else { (a.2, a.3) };
        (a.0 + b.0, a.1 + b.1, max_len, max_voxel)
      },
    );

  WarpSummary {
    voxel_count: count,
    mean_warp: if count == 0 { Vec3::ZERO } else { sum / count as f32 },
    max_warp_length: max_len,
    max_warp_voxel: max_voxel,
  }
}

#[cfg(test)]
#[path = "statistics_test.rs"]
mod statistics_test;
