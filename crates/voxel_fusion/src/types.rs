//! Voxel layouts and the traits the solver and fusion engine are generic over.
//!
//! A voxel type advertises which optional channels it stores through its
//! [`VoxelLayout`] constant. Accessors for absent channels have no-op default
//! implementations, so generic code branches on `V::LAYOUT.has_color` and the
//! untaken side is removed at compile time.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// SDF conversion utilities for quantized storage.
///
/// Maps a normalized truncated distance in [-1, 1] to i16 [-32767, +32767].
/// A normalized value of ±1 means "at or beyond the truncation band".
pub mod sdf_conversion {
  /// Largest stored magnitude.
  pub const MAX_STORAGE: i16 = i16::MAX;

  /// Scale factor: 32767 per unit of normalized distance.
  pub const SCALE: f32 = MAX_STORAGE as f32;

  /// Inverse scale for converting back to float.
  pub const INV_SCALE: f32 = 1.0 / SCALE;

  /// Convert normalized SDF to quantized storage, clamping to [-1, 1].
  #[inline(always)]
  pub fn to_storage(sdf: f32) -> i16 {
    (sdf.clamp(-1.0, 1.0) * SCALE).round() as i16
  }

  /// Convert quantized storage back to normalized SDF.
  #[inline(always)]
  pub fn to_float(value: i16) -> f32 {
    value as f32 / SCALE
  }

  /// Normalize a metric distance by the truncation band.
  #[inline(always)]
  pub fn normalize(distance: f32, truncation_distance: f32) -> f32 {
    (distance / truncation_distance).clamp(-1.0, 1.0)
  }
}

/// Optional channels carried by a voxel type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoxelLayout {
  pub has_color: bool,
  pub has_confidence: bool,
  pub has_warp: bool,
}

impl VoxelLayout {
  /// Distance and depth weight only.
  pub const DEPTH_ONLY: Self = Self {
    has_color: false,
    has_confidence: false,
    has_warp: false,
  };
}

/// Per-voxel storage shared by canonical and live scenes.
///
/// `sdf` is normalized by the truncation band. Colour is linear in [0, 1].
pub trait Voxel: Copy + Default + Send + Sync + 'static {
  const LAYOUT: VoxelLayout;

  fn sdf(&self) -> f32;
  fn set_sdf(&mut self, sdf: f32);

  fn depth_weight(&self) -> u8;
  fn set_depth_weight(&mut self, weight: u8);

  #[inline(always)]
  fn color(&self) -> Vec3 {
    Vec3::ZERO
  }

  #[inline(always)]
  fn set_color(&mut self, _color: Vec3) {}

  #[inline(always)]
  fn color_weight(&self) -> u8 {
    0
  }

  #[inline(always)]
  fn set_color_weight(&mut self, _weight: u8) {}

  #[inline(always)]
  fn confidence(&self) -> f32 {
    0.0
  }

  #[inline(always)]
  fn set_confidence(&mut self, _confidence: f32) {}
}

/// Gradient storage a warp voxel exposes to the smoother.
///
/// `Update` aliases the pending warp update; the two buffers are scratch
/// slots the smoothing passes alternate between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradientSlot {
  Update,
  Buffer0,
  Buffer1,
}

/// Voxel carrying a displacement field and its optimisation state.
pub trait WarpVoxel: Voxel {
  fn warp(&self) -> Vec3;
  fn set_warp(&mut self, warp: Vec3);

  fn warp_update(&self) -> Vec3;
  fn set_warp_update(&mut self, update: Vec3);

  fn gradient(&self, slot: GradientSlot) -> Vec3;
  fn set_gradient(&mut self, slot: GradientSlot, value: Vec3);
}

#[inline(always)]
fn color_to_storage(color: Vec3) -> [u8; 3] {
  let c = (color.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
  [c.x as u8, c.y as u8, c.z as u8]
}

#[inline(always)]
fn color_to_float(color: [u8; 3]) -> Vec3 {
  Vec3::new(color[0] as f32, color[1] as f32, color[2] as f32) / 255.0
}

// =============================================================================
// Concrete layouts
// =============================================================================

/// Canonical-scene voxel: every channel present.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalVoxel {
  pub sdf: i16,
  pub w_depth: u8,
  pub w_color: u8,
  pub clr: [u8; 3],
  pub confidence: f32,
  pub warp: Vec3,
  pub warp_update: Vec3,
  pub gradient0: Vec3,
  pub gradient1: Vec3,
}

impl Default for CanonicalVoxel {
  fn default() -> Self {
    Self {
      sdf: sdf_conversion::MAX_STORAGE,
      w_depth: 0,
      w_color: 0,
      clr: [0; 3],
      confidence: 0.0,
      warp: Vec3::ZERO,
      warp_update: Vec3::ZERO,
      gradient0: Vec3::ZERO,
      gradient1: Vec3::ZERO,
    }
  }
}

impl Voxel for CanonicalVoxel {
  const LAYOUT: VoxelLayout = VoxelLayout {
    has_color: true,
    has_confidence: true,
    has_warp: true,
  };

  #[inline(always)]
  fn sdf(&self) -> f32 {
    sdf_conversion::to_float(self.sdf)
  }
  #[inline(always)]
  fn set_sdf(&mut self, sdf: f32) {
    self.sdf = sdf_conversion::to_storage(sdf);
  }
  #[inline(always)]
  fn depth_weight(&self) -> u8 {
    self.w_depth
  }
  #[inline(always)]
  fn set_depth_weight(&mut self, weight: u8) {
    self.w_depth = weight;
  }
  #[inline(always)]
  fn color(&self) -> Vec3 {
    color_to_float(self.clr)
  }
  #[inline(always)]
  fn set_color(&mut self, color: Vec3) {
    self.clr = color_to_storage(color);
  }
  #[inline(always)]
  fn color_weight(&self) -> u8 {
    self.w_color
  }
  #[inline(always)]
  fn set_color_weight(&mut self, weight: u8) {
    self.w_color = weight;
  }
  #[inline(always)]
  fn confidence(&self) -> f32 {
    self.confidence
  }
  #[inline(always)]
  fn set_confidence(&mut self, confidence: f32) {
    self.confidence = confidence;
  }
}

impl WarpVoxel for CanonicalVoxel {
  #[inline(always)]
  fn warp(&self) -> Vec3 {
    self.warp
  }
  #[inline(always)]
  fn set_warp(&mut self, warp: Vec3) {
    self.warp = warp;
  }
  #[inline(always)]
  fn warp_update(&self) -> Vec3 {
    self.warp_update
  }
  #[inline(always)]
  fn set_warp_update(&mut self, update: Vec3) {
    self.warp_update = update;
  }
  #[inline(always)]
  fn gradient(&self, slot: GradientSlot) -> Vec3 {
    match slot {
      GradientSlot::Update => self.warp_update,
      GradientSlot::Buffer0 => self.gradient0,
      GradientSlot::Buffer1 => self.gradient1,
    }
  }
  #[inline(always)]
  fn set_gradient(&mut self, slot: GradientSlot, value: Vec3) {
    match slot {
      GradientSlot::Update => self.warp_update = value,
      GradientSlot::Buffer0 => self.gradient0 = value,
      GradientSlot::Buffer1 => self.gradient1 = value,
    }
  }
}

/// Live-scene voxel: distance, weights and colour, no warp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveVoxel {
  pub sdf: i16,
  pub w_depth: u8,
  pub w_color: u8,
  pub clr: [u8; 3],
}

impl Default for LiveVoxel {
  fn default() -> Self {
    Self {
      sdf: sdf_conversion::MAX_STORAGE,
      w_depth: 0,
      w_color: 0,
      clr: [0; 3],
    }
  }
}

impl Voxel for LiveVoxel {
  const LAYOUT: VoxelLayout = VoxelLayout {
    has_color: true,
    has_confidence: false,
    has_warp: false,
  };

  #[inline(always)]
  fn sdf(&self) -> f32 {
    sdf_conversion::to_float(self.sdf)
  }
  #[inline(always)]
  fn set_sdf(&mut self, sdf: f32) {
    self.sdf = sdf_conversion::to_storage(sdf);
  }
  #[inline(always)]
  fn depth_weight(&self) -> u8 {
    self.w_depth
  }
  #[inline(always)]
  fn set_depth_weight(&mut self, weight: u8) {
    self.w_depth = weight;
  }
  #[inline(always)]
  fn color(&self) -> Vec3 {
    color_to_float(self.clr)
  }
  #[inline(always)]
  fn set_color(&mut self, color: Vec3) {
    self.clr = color_to_storage(color);
  }
  #[inline(always)]
  fn color_weight(&self) -> u8 {
    self.w_color
  }
  #[inline(always)]
  fn set_color_weight(&mut self, weight: u8) {
    self.w_color = weight;
  }
}

/// Minimal voxel: distance and depth weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthVoxel {
  pub sdf: i16,
  pub w_depth: u8,
}

impl Default for DepthVoxel {
  fn default() -> Self {
    Self {
      sdf: sdf_conversion::MAX_STORAGE,
      w_depth: 0,
    }
  }
}

impl Voxel for DepthVoxel {
  const LAYOUT: VoxelLayout = VoxelLayout::DEPTH_ONLY;

  #[inline(always)]
  fn sdf(&self) -> f32 {
    sdf_conversion::to_float(self.sdf)
  }
  #[inline(always)]
  fn set_sdf(&mut self, sdf: f32) {
    self.sdf = sdf_conversion::to_storage(sdf);
  }
  #[inline(always)]
  fn depth_weight(&self) -> u8 {
    self.w_depth
  }
  #[inline(always)]
  fn set_depth_weight(&mut self, weight: u8) {
    self.w_depth = weight;
  }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
