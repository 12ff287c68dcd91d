//! Fusion of the live measurement into the canonical scene along the warp.

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::cache::IndexCache;
use crate::error::FusionResult;
use crate::sampling::sample;
use crate::scene::{voxel_position, Scene};
use crate::types::{Voxel, WarpVoxel};

/// Voxel counts of one fusion pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FusionReport {
  /// Voxels that received live data.
  pub fused: usize,
  /// Voxels whose warped position saw no live observation.
  pub skipped: usize,
}

impl FusionReport {
  fn merge(self, other: Self) -> Self {
    Self {
      fused: self.fused + other.fused,
      skipped: self.skipped + other.skipped,
    }
  }
}

/// Blend the live scene, sampled at `voxel + warp`, into every canonical
/// voxel.
///
/// Distance and colour are running weighted averages; depth and colour
/// weights saturate at `max_weight`; confidence accumulates the live depth
/// weight without bound.
#[tracing::instrument(skip_all, name = "fusion::fuse")]
pub fn fuse<C, L>(canonical: &mut Scene<C>, live: &Scene<L>) -> FusionReport
where
  C: WarpVoxel,
  L: Voxel,
{
  let max_weight = canonical.params().max_weight as f32;

  canonical
    .par_blocks_mut()
    .map_init(IndexCache::new, |cache, (_, pos, block)| {
      let mut report = FusionReport::default();
      for (idx, voxel) in block.iter_mut().enumerate() {
        let point = voxel_position(pos, idx).as_vec3() + voxel.warp();
        let s = sample(live, point, cache);
        if s.depth_weight <= 0.0 {
          report.skipped += 1;
          continue;
        }

        let w = voxel.depth_weight() as f32;
        voxel.set_sdf((w * voxel.sdf() + s.depth_weight * s.sdf) / (w + s.depth_weight));
        voxel.set_depth_weight(observed(w + s.depth_weight, max_weight));

        if C::LAYOUT.has_color && s.color_weight > 0.0 {
          let wc = voxel.color_weight() as f32;
          let color = (wc * voxel.color() + s.color_weight * s.color) / (wc + s.color_weight);
          voxel.set_color(color);
          voxel.set_color_weight(observed(wc + s.color_weight, max_weight));
        }
        if C::LAYOUT.has_confidence {
          voxel.set_confidence(voxel.confidence() + s.depth_weight);
        }
        report.fused += 1;
      }
      report
    })
    .reduce(FusionReport::default, FusionReport::merge)
}

#[inline]
fn saturate(weight: f32, max_weight: f32) -> u8 {
  weight.min(max_weight).round() as u8
}

/// Saturated weight of a voxel that just received data; never rounds to 0.
#[inline]
fn observed(weight: f32, max_weight: f32) -> u8 {
  saturate(weight, max_weight).max(1)
}

/// Resample the canonical scene into a fresh scene at warped positions.
///
/// Each weighted canonical voxel is forward-mapped to the voxel nearest to
/// `voxel + warp`; targets hit more than once average their sources by
/// depth weight. Used for visual inspection of the current warp.
#[tracing::instrument(skip_all, name = "fusion::warp_canonical_to_live")]
pub fn warp_canonical_to_live<C, L>(canonical: &Scene<C>) -> FusionResult<Scene<L>>
where
  C: WarpVoxel,
  L: Voxel,
{
  let mut target = Scene::<L>::new(*canonical.params(), *canonical.index_config())?;
  let max_weight = canonical.params().max_weight as f32;

  for (pos, block) in canonical.blocks() {
    for (idx, voxel) in block.iter().enumerate() {
      if voxel.depth_weight() == 0 {
        continue;
      }
      let dest: IVec3 = (voxel_position(pos, idx).as_vec3() + voxel.warp()).round().as_ivec3();
      let mut out = target.voxel_mut(dest).copied().unwrap_or_default();

      let w = out.depth_weight() as f32;
      let wv = voxel.depth_weight() as f32;
      out.set_sdf((w * out.sdf() + wv * voxel.sdf()) / (w + wv));
      out.set_depth_weight(saturate(w + wv, max_weight));
      if L::LAYOUT.has_color && C::LAYOUT.has_color {
        let color: Vec3 = (w * out.color() + wv * voxel.color()) / (w + wv);
        out.set_color(color);
        out.set_color_weight(out.color_weight().max(voxel.color_weight()));
      }
      target.set_voxel(dest, out)?;
    }
  }
  Ok(target)
}

#[cfg(test)]
#[path = "fusion_test.rs"]
mod fusion_test;
