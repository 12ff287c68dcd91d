//! Motion tracker - per-frame state machine.
//!
//! Each frame runs Allocate → Iterate → Fuse → Advance:
//!
//! - **Allocate**: canonical blocks are inserted wherever the live scene has
//!   data. This is the only structural mutation of the frame.
//! - **Iterate**: compute → optional smoothing → apply, until the largest
//!   update falls below the convergence threshold or the iteration cap is
//!   reached.
//! - **Fuse**: the live scene is blended in along the final warp.
//! - **Advance**: the frame index is incremented.
//!
//! The tracker owns no voxel data; both scenes are borrowed for one frame.

use glam::{IVec3, Vec3};
use smallvec::SmallVec;
use web_time::Instant;

use crate::config::SolverConfig;
use crate::constants::{block_origin, voxel_to_block, BLOCK_SIZE};
use crate::error::FusionResult;
use crate::fusion::{fuse, FusionReport};
use crate::metrics::TrackerMetrics;
use crate::observer::{IterationEvent, NoopObserver, TrackerObserver};
use crate::scene::Scene;
use crate::smoothing::GradientSmoother;
use crate::solver::{EnergyStatistics, WarpFieldSolver};
use crate::statistics::warp_summary;
use crate::types::{Voxel, WarpVoxel};

/// How live block coordinates are mapped into canonical space before
/// allocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AllocationMode {
  /// Allocate the same block coordinates as the live scene.
  #[default]
  Direct,
  /// Additionally allocate the blocks covered by each live block moved back
  /// by the mean canonical warp.
  OffsetByMeanWarp,
}

/// Insert into `canonical` every block the live scene needs.
///
/// Returns the number of newly created blocks. Fails with
/// [`crate::FusionError::ResourceExhausted`] when the index or store runs
/// out of room; blocks allocated before the failure stay allocated.
#[tracing::instrument(skip_all, name = "tracker::allocate_from_live")]
pub fn allocate_from_live<C, L>(
  canonical: &mut Scene<C>,
  live: &Scene<L>,
  mode: AllocationMode,
) -> FusionResult<usize>
where
  C: WarpVoxel,
  L: Voxel,
{
  let offset = match mode {
    AllocationMode::Direct => None,
    AllocationMode::OffsetByMeanWarp => {
      let summary = warp_summary(canonical);
      (summary.voxel_count > 0 && summary.mean_warp != Vec3::ZERO).then_some(summary.mean_warp)
    }
  };

  let mut created = 0;
  for &pos in live.block_positions() {
    for candidate in candidate_blocks(pos, offset) {
      if canonical.allocate_block(candidate)?.created {
        created += 1;
      }
    }
  }
  Ok(created)
}

/// The live block itself, plus every block overlapped by its box moved by
/// `-offset`.
fn candidate_blocks(live_block: IVec3, offset: Option<Vec3>) -> SmallVec<[IVec3; 8]> {
  let mut out = SmallVec::new();
  out.push(live_block);
  let Some(offset) = offset else {
    return out;
  };

  let min = block_origin(live_block).as_vec3() - offset;
  let max = min + Vec3::splat(BLOCK_SIZE as f32 - 1.0);
  let lo = voxel_to_block(min.floor().as_ivec3());
  let hi = voxel_to_block(max.ceil().as_ivec3());
  for z in lo.z..=hi.z {
    for y in lo.y..=hi.y {
      for x in lo.x..=hi.x {
        let pos = IVec3::new(x, y, z);
        if !out.contains(&pos) {
          out.push(pos);
        }
      }
    }
  }
  out
}

/// Outcome of one processed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameReport {
  pub frame_index: u32,
  pub iterations: u32,
  /// `false` when the iteration cap was reached first.
  pub converged: bool,
  /// Largest update of the last iteration, in voxels.
  pub final_max_update: f32,
  /// Canonical blocks created during allocation.
  pub allocated_blocks: usize,
  /// Energies of the last iteration.
  pub energy: EnergyStatistics,
  pub fusion: FusionReport,
  pub elapsed_us: u64,
}

/// Drives the solver, smoother and fusion for a sequence of frames.
pub struct MotionTracker {
  solver: WarpFieldSolver,
  smoother: GradientSmoother,
  allocation_mode: AllocationMode,
  frame_index: u32,
  metrics: TrackerMetrics,
}

impl MotionTracker {
  pub fn new(config: SolverConfig) -> FusionResult<Self> {
    Ok(Self {
      solver: WarpFieldSolver::new(config)?,
      smoother: GradientSmoother::new(),
      allocation_mode: AllocationMode::default(),
      frame_index: 0,
      metrics: TrackerMetrics::new(),
    })
  }

  pub fn with_allocation_mode(mut self, mode: AllocationMode) -> Self {
    self.allocation_mode = mode;
    self
  }

  pub fn with_smoother(mut self, smoother: GradientSmoother) -> Self {
    self.smoother = smoother;
    self
  }

  /// Index of the next frame to be processed.
  pub fn frame_index(&self) -> u32 {
    self.frame_index
  }

  pub fn config(&self) -> &SolverConfig {
    self.solver.config()
  }

  pub fn metrics(&self) -> &TrackerMetrics {
    &self.metrics
  }

  pub fn process_frame<C, L>(
    &mut self,
    canonical: &mut Scene<C>,
    live: &Scene<L>,
  ) -> FusionResult<FrameReport>
  where
    C: WarpVoxel,
    L: Voxel,
  {
    self.process_frame_observed(canonical, live, &mut NoopObserver)
  }

  /// Track and fuse one live frame.
  ///
  /// On error the frame index is not advanced. A
  /// [`crate::FusionError::NumericDegeneracy`] leaves the warps of the
  /// failing iteration untouched.
  pub fn process_frame_observed<C, L, O>(
    &mut self,
    canonical: &mut Scene<C>,
    live: &Scene<L>,
    observer: &mut O,
  ) -> FusionResult<FrameReport>
  where
    C: WarpVoxel,
    L: Voxel,
    O: TrackerObserver<C> + ?Sized,
  {
    let frame = self.frame_index;
    let _span = tracing::info_span!("frame", frame).entered();
    let frame_start = Instant::now();
    observer.on_frame_start(frame, canonical);

    let allocated_blocks = {
      let _span = tracing::info_span!("allocate").entered();
      allocate_from_live(canonical, live, self.allocation_mode)?
    };

    let threshold = self
      .solver
      .config()
      .convergence_threshold_voxels(canonical.params());
    let max_iterations = self.solver.config().max_iterations;
    let smoothing = self.solver.config().enable_smoothing;

    let mut iterations = 0;
    let mut converged = false;
    let mut final_max_update = 0.0;
    let mut energy = EnergyStatistics::default();
    {
      let _span = tracing::info_span!("optimize").entered();
      while iterations < max_iterations {
        let iteration = iterations;
        observer.on_iteration_start(frame, iteration, canonical);
        let iteration_start = Instant::now();

        let computed = self.solver.compute_updates(canonical, live)?;
        if let Some(trace) = &computed.focus {
          observer.on_focus_voxel(frame, iteration, trace);
        }
        if smoothing {
          self.smoother.smooth(canonical);
        }
        let applied = self.solver.apply_updates(canonical);

        let elapsed_us = iteration_start.elapsed().as_micros() as u64;
        self.metrics.record_iteration(elapsed_us, applied.max_update);
        iterations += 1;
        final_max_update = applied.max_update;
        energy = computed.energy;

        tracing::debug!(
          frame,
          iteration,
          max_update = applied.max_update,
          energy = computed.energy.total,
          "iteration finished"
        );
        observer.on_iteration_end(
          &IterationEvent {
            frame,
            iteration,
            max_update: applied.max_update,
            energy: computed.energy,
            histogram: applied.histogram,
            elapsed_us,
          },
          canonical,
        );

        if applied.max_update <= threshold {
          converged = true;
          break;
        }
      }
    }

    if !converged {
      tracing::warn!(
        frame,
        iterations,
        max_update = final_max_update,
        threshold,
        "warp field did not converge"
      );
    }

    let fusion = {
      let _span = tracing::info_span!("fuse").entered();
      fuse(canonical, live)
    };

    let elapsed_us = frame_start.elapsed().as_micros() as u64;
    self.metrics.record_frame(elapsed_us, iterations, converged);
    let report = FrameReport {
      frame_index: frame,
      iterations,
      converged,
      final_max_update,
      allocated_blocks,
      energy,
      fusion,
      elapsed_us,
    };
    tracing::info!(
      frame,
      iterations,
      converged,
      allocated_blocks,
      fused = fusion.fused,
      elapsed_us,
      "frame processed"
    );
    observer.on_frame_end(&report, canonical);

    self.frame_index += 1;
    Ok(report)
  }
}

#[cfg(test)]
#[path = "tracker_test.rs"]
mod tracker_test;
