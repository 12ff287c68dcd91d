//! Sobolev gradient smoothing.
//!
//! Separable 7-tap filter applied to the pending warp updates in three axis
//! passes: X reads the update slot and writes buffer 0, Y reads buffer 0 and
//! writes buffer 1, Z reads buffer 1 and writes the update slot back.
//!
//! Each pass filters into a scratch buffer from an immutable view of the
//! scene, then scatters into the destination slot, so no voxel is read after
//! being written within a pass. The next pass reads that slot.

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::cache::IndexCache;
use crate::constants::BLOCK_SIZE_CB;
use crate::scene::{voxel_position, Scene};
use crate::types::{GradientSlot, WarpVoxel};

/// Sobolev kernel coefficients as published, before normalization.
pub const SOBOLEV_KERNEL: [f32; 7] = [
  2.995_861_1e-4,
  4.410_932_4e-3,
  6.571_314_3e-2,
  9.956_527_9e-1,
  6.571_314_3e-2,
  4.410_932_4e-3,
  2.995_861_1e-4,
];

const HALF_WIDTH: i32 = 3;

/// Three-pass separable smoother over warp updates.
#[derive(Clone, Debug)]
pub struct GradientSmoother {
  kernel: [f32; 7],
  /// Filtered values of the running pass, block after block. Reused across
  /// passes and calls.
  scratch: Vec<Vec3>,
}

impl Default for GradientSmoother {
  fn default() -> Self {
    Self::new()
  }
}

impl GradientSmoother {
  /// Smoother with the Sobolev kernel scaled to unit sum.
  pub fn new() -> Self {
    Self::with_kernel(SOBOLEV_KERNEL)
  }

  /// Smoother with arbitrary taps; they are divided by their sum.
  pub fn with_kernel(raw: [f32; 7]) -> Self {
    let sum: f64 = raw.iter().map(|&k| k as f64).sum();
    let kernel = raw.map(|k| (k as f64 / sum) as f32);
    Self {
      kernel,
      scratch: Vec::new(),
    }
  }

  /// Applied taps, summing to 1.
  pub fn kernel(&self) -> &[f32; 7] {
    &self.kernel
  }

  /// Run the X, Y and Z passes.
  #[tracing::instrument(skip_all, name = "smoothing::smooth")]
  pub fn smooth<C: WarpVoxel>(&mut self, scene: &mut Scene<C>) {
    self.pass(scene, IVec3::X, GradientSlot::Update, GradientSlot::Buffer0);
    self.pass(scene, IVec3::Y, GradientSlot::Buffer0, GradientSlot::Buffer1);
    self.pass(scene, IVec3::Z, GradientSlot::Buffer1, GradientSlot::Update);
  }

  fn pass<C: WarpVoxel>(
    &mut self,
    scene: &mut Scene<C>,
    axis: IVec3,
    src: GradientSlot,
    dst: GradientSlot,
  ) {
    let kernel = &self.kernel;
    let scratch = &mut self.scratch;
    scratch.clear();
    scratch.resize(scene.block_count() * BLOCK_SIZE_CB, Vec3::ZERO);

    {
      let scene: &Scene<C> = scene;
      scratch
        .par_chunks_mut(BLOCK_SIZE_CB)
        .zip(scene.par_blocks())
        .for_each_init(IndexCache::new, |cache, (out, (_, pos, block))| {
          for (idx, voxel) in block.iter().enumerate() {
            let center_pos = voxel_position(pos, idx);
            let center = voxel.gradient(src);
            let mut acc = Vec3::ZERO;
            for (tap, k) in kernel.iter().enumerate() {
              let offset = tap as i32 - HALF_WIDTH;
              let value = if offset == 0 {
                center
              } else {
                scene
                  .voxel(center_pos + axis * offset, cache)
                  .map_or(center, |v| v.gradient(src))
              };
              acc += *k * value;
            }
            out[idx] = acc;
          }
        });
    }

    scene
      .par_blocks_mut()
      .zip(scratch.par_chunks(BLOCK_SIZE_CB))
      .for_each(|((_, _, block), values)| {
        for (voxel, value) in block.iter_mut().zip(values) {
          voxel.set_gradient(dst, *value);
        }
      });
  }
}

#[cfg(test)]
#[path = "smoothing_test.rs"]
mod smoothing_test;
