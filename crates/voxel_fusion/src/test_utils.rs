//! Test utilities: scene fixtures built from analytic distance functions.

use glam::{IVec3, Vec3};

use crate::config::{IndexConfig, SceneParams};
use crate::scene::Scene;
use crate::types::{sdf_conversion, CanonicalVoxel, LiveVoxel, Voxel};

/// 1 cm voxels, 5-voxel truncation band.
pub fn test_params() -> SceneParams {
  SceneParams::new()
    .with_voxel_size(0.01)
    .with_truncation_distance(0.05)
    .with_max_weight(100)
}

pub fn empty_scene<V: Voxel>() -> Scene<V> {
  Scene::new(test_params(), IndexConfig::SMALL).expect("test config is valid")
}

/// Signed distance to a sphere, in voxels.
pub fn sphere(center: Vec3, radius: f32) -> impl Fn(Vec3) -> f32 + Copy {
  move |p: Vec3| (p - center).length() - radius
}

/// Fill every voxel of `[min, max)` from a distance function given in voxels.
pub fn fill_scene<V, F>(scene: &mut Scene<V>, min: IVec3, max: IVec3, weight: u8, distance: F)
where
  V: Voxel,
  F: Fn(Vec3) -> f32,
{
  let truncation = scene.params().truncation_voxels();
  for z in min.z..max.z {
    for y in min.y..max.y {
      for x in min.x..max.x {
        let pos = IVec3::new(x, y, z);
        let mut voxel = V::default();
        voxel.set_sdf(sdf_conversion::normalize(distance(pos.as_vec3()), truncation));
        voxel.set_depth_weight(weight);
        if V::LAYOUT.has_color {
          voxel.set_color(Vec3::splat(0.5));
          voxel.set_color_weight(weight);
        }
        scene
          .set_voxel(pos, voxel)
          .expect("fixture fits in test capacity");
      }
    }
  }
}

/// Centre of the fixture spheres; the fixture box is `[0, 16)³`.
pub const SPHERE_CENTER: Vec3 = Vec3::splat(8.0);

/// Canonical and live scenes holding the same sphere, the live one shifted
/// by `shift` voxels.
pub fn sphere_pair(radius: f32, shift: Vec3) -> (Scene<CanonicalVoxel>, Scene<LiveVoxel>) {
  let center = SPHERE_CENTER;
  let (min, max) = (IVec3::splat(0), IVec3::splat(16));

  let mut canonical = empty_scene();
  fill_scene(&mut canonical, min, max, 1, sphere(center, radius));
  let mut live = empty_scene();
  fill_scene(&mut live, min, max, 1, sphere(center + shift, radius));
  (canonical, live)
}
