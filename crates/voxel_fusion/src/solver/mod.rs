//! Warp field solver.
//!
//! One gradient-descent iteration is two passes over the canonical scene:
//!
//! 1. **compute** reads both scenes immutably, evaluates the weighted energy
//!    gradient of every canonical voxel and writes `learning_rate * gradient`
//!    into the voxel's pending update slot;
//! 2. **apply** subtracts the pending update from the warp and reports the
//!    largest update length.
//!
//! Updates are computed from the warps of the previous iteration only
//! (Jacobi style), so block order never changes the result.

pub mod terms;

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::cache::IndexCache;
use crate::config::SolverConfig;
use crate::constants::BLOCK_SIZE_CB;
use crate::error::{FusionError, FusionResult};
use crate::sampling::{live_derivatives, warp_derivatives, LiveQuery};
use crate::scene::{voxel_position, Scene};
use crate::types::{Voxel, WarpVoxel};

/// Number of bins in [`UpdateHistogram`].
pub const HISTOGRAM_BINS: usize = 16;

// =============================================================================
// Reports
// =============================================================================

/// Summed energies of one iteration, before term weighting.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EnergyStatistics {
  pub data: f64,
  pub color: f64,
  pub level_set: f64,
  pub killing: f64,
  /// Weighted total.
  pub total: f64,
}

impl EnergyStatistics {
  fn merge(self, other: Self) -> Self {
    Self {
      data: self.data + other.data,
      color: self.color + other.color,
      level_set: self.level_set + other.level_set,
      killing: self.killing + other.killing,
      total: self.total + other.total,
    }
  }
}

/// Every per-term vector computed for one voxel in one iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FocusVoxelTrace {
  pub voxel: IVec3,
  pub warp: Vec3,
  pub canonical_sdf: f32,
  pub live_sdf: f32,
  pub data: Vec3,
  pub color: Vec3,
  pub level_set: Vec3,
  pub killing: Vec3,
  /// Final update, learning rate applied.
  pub update: Vec3,
}

/// Distribution of update lengths relative to the largest update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateHistogram {
  pub bins: [u64; HISTOGRAM_BINS],
}

impl UpdateHistogram {
  fn record(&mut self, length: f32, max: f32) {
    let bin = if max > 0.0 {
      ((length / max) * HISTOGRAM_BINS as f32) as usize
    } else {
      0
    };
    self.bins[bin.min(HISTOGRAM_BINS - 1)] += 1;
  }

  fn merge(mut self, other: Self) -> Self {
    for (a, b) in self.bins.iter_mut().zip(other.bins) {
      *a += b;
    }
    self
  }

  pub fn total(&self) -> u64 {
    self.bins.iter().sum()
  }
}

/// Result of the compute pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ComputeOutcome {
  pub energy: EnergyStatistics,
  pub focus: Option<FocusVoxelTrace>,
}

/// Result of the apply pass. Lengths are in voxels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ApplyOutcome {
  pub max_update: f32,
  pub max_update_voxel: IVec3,
  pub histogram: UpdateHistogram,
}

// =============================================================================
// Solver
// =============================================================================

/// Per-block summary of the compute pass; the updates themselves go to the
/// solver's scratch buffer.
struct BlockSummary {
  energy: EnergyStatistics,
  focus: Option<FocusVoxelTrace>,
}

/// Gradient-descent optimiser for the canonical-to-live warp field.
#[derive(Clone, Debug)]
pub struct WarpFieldSolver {
  config: SolverConfig,
  /// Pending updates of the current compute pass, block after block.
  /// Reused across iterations.
  updates: Vec<Vec3>,
}

impl WarpFieldSolver {
  pub fn new(config: SolverConfig) -> FusionResult<Self> {
    config.validate()?;
    Ok(Self {
      config,
      updates: Vec::new(),
    })
  }

  pub fn config(&self) -> &SolverConfig {
    &self.config
  }

  /// Evaluate the energy gradient of every canonical voxel and store
  /// `learning_rate * gradient` as its pending update.
  ///
  /// Fails with [`FusionError::NumericDegeneracy`] if any update is not
  /// finite; in that case no voxel is modified.
  #[tracing::instrument(skip_all, name = "solver::compute_updates")]
  pub fn compute_updates<C, L>(
    &mut self,
    canonical: &mut Scene<C>,
    live: &Scene<L>,
  ) -> FusionResult<ComputeOutcome>
  where
    C: WarpVoxel,
    L: Voxel,
  {
    let cfg = &self.config;
    let updates = &mut self.updates;
    updates.clear();
    updates.resize(canonical.block_count() * BLOCK_SIZE_CB, Vec3::ZERO);

    let summaries = {
      let canonical: &Scene<C> = canonical;
      updates
        .par_chunks_mut(BLOCK_SIZE_CB)
        .zip(canonical.par_blocks())
        .map_init(
          || (IndexCache::new(), IndexCache::new()),
          |(canonical_cache, live_cache), (out, (_, pos, block))| {
            compute_block(cfg, canonical, live, pos, block, out, canonical_cache, live_cache)
          },
        )
        .collect::<FusionResult<Vec<_>>>()?
    };

    canonical
      .par_blocks_mut()
      .zip(updates.par_chunks(BLOCK_SIZE_CB))
      .for_each(|((_, _, block), values)| {
        for (voxel, update) in block.iter_mut().zip(values) {
          voxel.set_warp_update(*update);
        }
      });

    let energy = summaries
      .iter()
      .fold(EnergyStatistics::default(), |acc, s| acc.merge(s.energy));
    let focus = summaries.iter().find_map(|s| s.focus);
    Ok(ComputeOutcome { energy, focus })
  }

  /// Subtract every pending update from its warp.
  ///
  /// The maximum is reduced from per-block partial maxima after the
  /// parallel phase.
  #[tracing::instrument(skip_all, name = "solver::apply_updates")]
  pub fn apply_updates<C: WarpVoxel>(&self, canonical: &mut Scene<C>) -> ApplyOutcome {
    let (max_update, max_update_voxel) = canonical
      .par_blocks_mut()
      .map(|(_, pos, block)| {
        let mut best = (0.0f32, IVec3::ZERO);
        for (idx, voxel) in block.iter_mut().enumerate() {
          let update = voxel.warp_update();
          voxel.set_warp(voxel.warp() - update);
          let len = update.length();
          if len > best.0 {
            best = (len, voxel_position(pos, idx));
          }
        }
        best
      })
      .reduce(|| (0.0, IVec3::ZERO), |a, b| if b.0 > a.0 { b } else { a });

    let histogram = canonical
      .par_blocks()
      .map(|(_, _, block)| {
        let mut h = UpdateHistogram::default();
        for voxel in block {
          h.record(voxel.warp_update().length(), max_update);
        }
        h
      })
      .reduce(UpdateHistogram::default, UpdateHistogram::merge);

    ApplyOutcome {
      max_update,
      max_update_voxel,
      histogram,
    }
  }
}

/// Gradient of every voxel of one block, written to `out`.
#[allow(clippy::too_many_arguments)]
fn compute_block<C, L>(
  cfg: &SolverConfig,
  canonical: &Scene<C>,
  live: &Scene<L>,
  pos: IVec3,
  block: &[C],
  out: &mut [Vec3],
  canonical_cache: &mut IndexCache,
  live_cache: &mut IndexCache,
) -> FusionResult<BlockSummary>
where
  C: WarpVoxel,
  L: Voxel,
{
  let scale = canonical.params().truncation_voxels();
  let use_color = cfg.color_enabled() && C::LAYOUT.has_color && L::LAYOUT.has_color;
  let query = LiveQuery {
    hessian: cfg.weight_level_set != 0.0,
    color: use_color,
  };
  let sample_live = cfg.weight_data != 0.0 || cfg.weight_level_set != 0.0;

  let mut summary = BlockSummary {
    energy: EnergyStatistics::default(),
    focus: None,
  };

  for (idx, voxel) in block.iter().enumerate() {
    let voxel_pos = voxel_position(pos, idx);
    let warp = voxel.warp();
    let canonical_sdf = voxel.sdf() * scale;

    let mut data = Vec3::ZERO;
    let mut color = Vec3::ZERO;
    let mut level_set = Vec3::ZERO;
    let mut killing = Vec3::ZERO;
    let mut live_sdf = 0.0;

    // Unobserved voxels are only moved by the regulariser.
    if sample_live && voxel.depth_weight() > 0 {
      let d = live_derivatives(live, voxel_pos.as_vec3() + warp, query, live_cache)
        .scale_distance(scale);
      live_sdf = d.sample.sdf;

      if cfg.weight_data != 0.0 {
        data = terms::data_term(live_sdf, canonical_sdf, d.gradient);
        summary.energy.data += terms::data_energy(live_sdf, canonical_sdf) as f64;

        if use_color && voxel.sdf().abs() < cfg.color_sdf_threshold {
          color = terms::color_term(d.sample.color, voxel.color(), d.color_jacobian);
          summary.energy.color +=
            terms::color_energy(d.sample.color, voxel.color(), cfg.weight_color) as f64;
        }
      }
      if cfg.weight_level_set != 0.0 {
        level_set = terms::level_set_term(d.gradient, d.hessian, cfg.epsilon);
        summary.energy.level_set += terms::level_set_energy(d.gradient) as f64;
      }
    }

    if cfg.weight_killing != 0.0 {
      let d = warp_derivatives(canonical, voxel_pos, warp, canonical_cache);
      killing = terms::killing_term(&d, cfg.rigidity);
      summary.energy.killing += terms::killing_energy(&d.jacobian, cfg.rigidity) as f64;
    }

    let gradient = cfg.weight_data * (data + cfg.weight_color * color)
      + cfg.weight_level_set * level_set
      + cfg.weight_killing * killing;
    let update = cfg.learning_rate * gradient;
    if !update.is_finite() {
      return Err(FusionError::NumericDegeneracy {
        block: pos,
        voxel: voxel_pos,
        value: update,
      });
    }
    out[idx] = update;

    if cfg.focus_voxel == Some(voxel_pos) {
      summary.focus = Some(FocusVoxelTrace {
        voxel: voxel_pos,
        warp,
        canonical_sdf,
        live_sdf,
        data,
        color,
        level_set,
        killing,
        update,
      });
    }
  }

  let e = &mut summary.energy;
  e.total = cfg.weight_data as f64 * (e.data + e.color)
    + cfg.weight_level_set as f64 * e.level_set
    + cfg.weight_killing as f64 * e.killing;
  Ok(summary)
}

#[cfg(test)]
#[path = "solver_test.rs"]
mod solver_test;
