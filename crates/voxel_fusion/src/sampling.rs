//! Sampling through the spatial index.
//!
//! Trilinear interpolation of distance, colour and weights at arbitrary
//! voxel-space points, plus finite-difference derivatives of the live field
//! and of the canonical warp field. Unallocated voxels read as the truncated
//! default (`sdf = 1`, weights 0), so sampling never fails.

use glam::{IVec3, Mat3, Vec3};

use crate::cache::IndexCache;
use crate::scene::Scene;
use crate::types::{Voxel, WarpVoxel};

/// Unit steps along x, y, z.
const AXES: [Vec3; 3] = [Vec3::X, Vec3::Y, Vec3::Z];
const IAXES: [IVec3; 3] = [IVec3::X, IVec3::Y, IVec3::Z];

/// Interpolated channels at one point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrilinearSample {
  /// Normalized signed distance.
  pub sdf: f32,
  /// Colour in [0, 1]; zero for layouts without colour.
  pub color: Vec3,
  pub depth_weight: f32,
  pub color_weight: f32,
  /// At least one of the eight corners lies in an allocated block.
  pub found: bool,
}

impl Default for TrilinearSample {
  fn default() -> Self {
    Self {
      sdf: 1.0,
      color: Vec3::ZERO,
      depth_weight: 0.0,
      color_weight: 0.0,
      found: false,
    }
  }
}

/// Trilinear interpolation of every channel at `point` (voxel units).
pub fn sample<V: Voxel>(scene: &Scene<V>, point: Vec3, cache: &mut IndexCache) -> TrilinearSample {
  let base = point.floor();
  let t = point - base;
  let base = base.as_ivec3();

  let mut out = TrilinearSample {
    sdf: 0.0,
    ..TrilinearSample::default()
  };
  for corner in 0..8 {
    let offset = IVec3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
    let w = corner_weight(t, offset);
    let voxel = match scene.voxel(base + offset, cache) {
      Some(v) => {
        out.found = true;
        *v
      }
      None => V::default(),
    };
    out.sdf += w * voxel.sdf();
    out.depth_weight += w * voxel.depth_weight() as f32;
    if V::LAYOUT.has_color {
      out.color += w * voxel.color();
      out.color_weight += w * voxel.color_weight() as f32;
    }
  }
  if !out.found {
    return TrilinearSample::default();
  }
  out
}

/// Interpolated normalized distance only.
#[inline]
pub fn sample_sdf<V: Voxel>(scene: &Scene<V>, point: Vec3, cache: &mut IndexCache) -> f32 {
  let base = point.floor();
  let t = point - base;
  let base = base.as_ivec3();

  let mut sdf = 0.0;
  let mut found = false;
  for corner in 0..8 {
    let offset = IVec3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
    let value = match scene.voxel(base + offset, cache) {
      Some(v) => {
        found = true;
        v.sdf()
      }
      None => 1.0,
    };
    sdf += corner_weight(t, offset) * value;
  }
  if found {
    sdf
  } else {
    1.0
  }
}

#[inline(always)]
fn corner_weight(t: Vec3, offset: IVec3) -> f32 {
  let wx = if offset.x == 1 { t.x } else { 1.0 - t.x };
  let wy = if offset.y == 1 { t.y } else { 1.0 - t.y };
  let wz = if offset.z == 1 { t.z } else { 1.0 - t.z };
  wx * wy * wz
}

// =============================================================================
// Live field derivatives
// =============================================================================

/// Live distance with its first and second derivatives at one point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LiveDerivatives {
  pub sample: TrilinearSample,
  pub gradient: Vec3,
  /// Symmetric; `hessian.col(j)[i] = ∂²φ/∂x_i∂x_j`. Only the diagonal is
  /// filled unless the Hessian was requested.
  pub hessian: Mat3,
  /// `color_jacobian.col(j) = ∂c/∂x_j`; zero unless requested.
  pub color_jacobian: Mat3,
}

impl LiveDerivatives {
  /// Rescale the distance channel and its derivatives, e.g. from normalized
  /// units to voxels.
  pub fn scale_distance(mut self, scale: f32) -> Self {
    self.sample.sdf *= scale;
    self.gradient *= scale;
    self.hessian *= scale;
    self
  }
}

/// Which optional derivatives [`live_derivatives`] computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveQuery {
  /// Mixed second differences (12 extra samples).
  pub hessian: bool,
  /// Colour Jacobian.
  pub color: bool,
}

impl LiveQuery {
  pub const GRADIENT: Self = Self {
    hessian: false,
    color: false,
  };
  pub const FULL: Self = Self {
    hessian: true,
    color: true,
  };
}

/// Central-difference gradient and second-difference Hessian of the live
/// distance at `point`, step one voxel.
pub fn live_derivatives<V: Voxel>(
  scene: &Scene<V>,
  point: Vec3,
  query: LiveQuery,
  cache: &mut IndexCache,
) -> LiveDerivatives {
  let center = sample(scene, point, cache);
  let mut plus = [0.0f32; 3];
  let mut minus = [0.0f32; 3];
  let mut color_cols = [Vec3::ZERO; 3];

  for axis in 0..3 {
    if query.color && V::LAYOUT.has_color {
      let p = sample(scene, point + AXES[axis], cache);
      let m = sample(scene, point - AXES[axis], cache);
      plus[axis] = p.sdf;
      minus[axis] = m.sdf;
      color_cols[axis] = (p.color - m.color) * 0.5;
    } else {
      plus[axis] = sample_sdf(scene, point + AXES[axis], cache);
      minus[axis] = sample_sdf(scene, point - AXES[axis], cache);
    }
  }

  let gradient = Vec3::new(
    (plus[0] - minus[0]) * 0.5,
    (plus[1] - minus[1]) * 0.5,
    (plus[2] - minus[2]) * 0.5,
  );

  let mut h = [[0.0f32; 3]; 3];
  for i in 0..3 {
    h[i][i] = plus[i] - 2.0 * center.sdf + minus[i];
    if !query.hessian {
      continue;
    }
    for j in (i + 1)..3 {
      let (ei, ej) = (AXES[i], AXES[j]);
      let pp = sample_sdf(scene, point + ei + ej, cache);
      let pm = sample_sdf(scene, point + ei - ej, cache);
      let mp = sample_sdf(scene, point - ei + ej, cache);
      let mm = sample_sdf(scene, point - ei - ej, cache);
      let mixed = (pp - pm - mp + mm) * 0.25;
      h[i][j] = mixed;
      h[j][i] = mixed;
    }
  }
  let hessian = Mat3::from_cols(
    Vec3::new(h[0][0], h[1][0], h[2][0]),
    Vec3::new(h[0][1], h[1][1], h[2][1]),
    Vec3::new(h[0][2], h[1][2], h[2][2]),
  );

  LiveDerivatives {
    sample: center,
    gradient,
    hessian,
    color_jacobian: Mat3::from_cols(color_cols[0], color_cols[1], color_cols[2]),
  }
}

// =============================================================================
// Warp field derivatives
// =============================================================================

/// First and second derivatives of the warp field at a voxel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WarpDerivatives {
  /// `jacobian.col(j) = ∂ψ/∂x_j`.
  pub jacobian: Mat3,
  /// `second[i][j] = ∂²ψ/∂x_i∂x_j` (all three components).
  pub second: [[Vec3; 3]; 3],
}

impl WarpDerivatives {
  /// Hessian of warp component `k`.
  pub fn hessian(&self, k: usize) -> Mat3 {
    let s = &self.second;
    Mat3::from_cols(
      Vec3::new(s[0][0][k], s[1][0][k], s[2][0][k]),
      Vec3::new(s[0][1][k], s[1][1][k], s[2][1][k]),
      Vec3::new(s[0][2][k], s[1][2][k], s[2][2][k]),
    )
  }
}

/// Finite differences of neighbour warps around `voxel`. Neighbours in
/// unallocated blocks reuse the centre warp.
pub fn warp_derivatives<C: WarpVoxel>(
  scene: &Scene<C>,
  voxel: IVec3,
  center: Vec3,
  cache: &mut IndexCache,
) -> WarpDerivatives {
  let mut warp_at = |pos: IVec3| scene.voxel(pos, cache).map_or(center, |v| v.warp());

  let mut plus = [Vec3::ZERO; 3];
  let mut minus = [Vec3::ZERO; 3];
  for axis in 0..3 {
    plus[axis] = warp_at(voxel + IAXES[axis]);
    minus[axis] = warp_at(voxel - IAXES[axis]);
  }

  let jacobian = Mat3::from_cols(
    (plus[0] - minus[0]) * 0.5,
    (plus[1] - minus[1]) * 0.5,
    (plus[2] - minus[2]) * 0.5,
  );

  let mut second = [[Vec3::ZERO; 3]; 3];
  for i in 0..3 {
    second[i][i] = plus[i] - 2.0 * center + minus[i];
    for j in (i + 1)..3 {
      let (ei, ej) = (IAXES[i], IAXES[j]);
      let pp = warp_at(voxel + ei + ej);
      let pm = warp_at(voxel + ei - ej);
      let mp = warp_at(voxel - ei + ej);
      let mm = warp_at(voxel - ei - ej);
      let mixed = (pp - pm - mp + mm) * 0.25;
      second[i][j] = mixed;
      second[j][i] = mixed;
    }
  }

  WarpDerivatives { jacobian, second }
}

#[cfg(test)]
#[path = "sampling_test.rs"]
mod sampling_test;
