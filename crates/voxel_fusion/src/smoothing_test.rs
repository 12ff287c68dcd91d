use approx::assert_abs_diff_eq;
use glam::{IVec3, Vec3};

use super::*;
use crate::test_utils::empty_scene;
use crate::types::CanonicalVoxel;

fn with_update(update: Vec3) -> CanonicalVoxel {
  CanonicalVoxel {
    warp_update: update,
    ..CanonicalVoxel::default()
  }
}

#[test]
fn test_kernel_sums_to_one() {
  let smoother = GradientSmoother::new();
  let sum: f32 = smoother.kernel().iter().sum();
  assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
  assert_abs_diff_eq!(smoother.kernel()[3], 0.876_069_2, epsilon = 1e-6);
  // Symmetric.
  for i in 0..3 {
    assert_eq!(smoother.kernel()[i], smoother.kernel()[6 - i]);
  }
}

/// A constant field stays constant, including next to unallocated blocks.
#[test]
fn test_constant_field_is_preserved() {
  let mut scene = empty_scene::<CanonicalVoxel>();
  let c = Vec3::new(0.25, -1.5, 3.0);
  for block in [IVec3::ZERO, IVec3::X, IVec3::new(0, 1, 1)] {
    scene.allocate_block(block).unwrap();
  }
  for (_, block) in scene.blocks_mut() {
    for voxel in block {
      voxel.warp_update = c;
    }
  }

  let mut smoother = GradientSmoother::new();
  for _ in 0..4 {
    smoother.smooth(&mut scene);
  }

  for (_, block) in scene.blocks() {
    for voxel in block {
      assert!(voxel.warp_update.abs_diff_eq(c, 1e-5), "{}", voxel.warp_update);
    }
  }
}

/// An impulse spreads as the separable product of the taps.
#[test]
fn test_impulse_response() {
  let mut scene = empty_scene::<CanonicalVoxel>();
  scene.allocate_block(IVec3::ZERO).unwrap();
  let center = IVec3::new(3, 3, 3);
  scene.set_voxel(center, with_update(Vec3::X)).unwrap();

  let mut smoother = GradientSmoother::new();
  smoother.smooth(&mut scene);
  let k = *smoother.kernel();

  let mut cache = IndexCache::new();
  let at = |scene: &Scene<CanonicalVoxel>, p: IVec3, cache: &mut IndexCache| {
    scene.read_voxel(p, cache).warp_update.x
  };
  assert_abs_diff_eq!(at(&scene, center, &mut cache), k[3] * k[3] * k[3], epsilon = 1e-6);
  assert_abs_diff_eq!(
    at(&scene, center + IVec3::X, &mut cache),
    k[2] * k[3] * k[3],
    epsilon = 1e-6
  );
  assert_abs_diff_eq!(
    at(&scene, center + IVec3::new(1, -2, 3), &mut cache),
    k[2] * k[1] * k[0],
    epsilon = 1e-10
  );
  // Outside the 7x7x7 support nothing arrives.
  assert_eq!(at(&scene, IVec3::new(7, 3, 3), &mut cache), 0.0);
}

#[test]
fn test_scratch_buffers_hold_intermediate_passes() {
  let mut scene = empty_scene::<CanonicalVoxel>();
  scene.allocate_block(IVec3::ZERO).unwrap();
  scene.set_voxel(IVec3::new(3, 3, 3), with_update(Vec3::Y)).unwrap();

  let mut smoother = GradientSmoother::new();
  smoother.smooth(&mut scene);
  let k = *smoother.kernel();

  let mut cache = IndexCache::new();
  let v = scene.read_voxel(IVec3::new(4, 3, 3), &mut cache);
  // After X: buffer 0 holds the x-filtered impulse.
  assert_abs_diff_eq!(v.gradient0.y, k[2], epsilon = 1e-6);
  // After Y: buffer 1 holds x- then y-filtered values.
  assert_abs_diff_eq!(v.gradient1.y, k[2] * k[3], epsilon = 1e-6);
}

#[test]
fn test_custom_kernel_is_normalized() {
  let smoother = GradientSmoother::with_kernel([1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 1.0]);
  assert_abs_diff_eq!(smoother.kernel()[3], 0.25, epsilon = 1e-7);
  assert_abs_diff_eq!(smoother.kernel()[0], 0.125, epsilon = 1e-7);
}

/// A smoother whose scratch grew on a bigger scene gives the same result on a
/// smaller one as a fresh smoother.
#[test]
fn test_reused_smoother_matches_fresh() {
  let small = || {
    let mut scene = empty_scene::<CanonicalVoxel>();
    scene.allocate_block(IVec3::ZERO).unwrap();
    scene.set_voxel(IVec3::new(2, 5, 4), with_update(Vec3::new(1.0, -2.0, 0.5))).unwrap();
    scene
  };

  let mut large = empty_scene::<CanonicalVoxel>();
  for x in 0..4 {
    large.set_voxel(IVec3::new(x * 8 + 3, 3, 3), with_update(Vec3::ONE)).unwrap();
  }
  let mut reused = GradientSmoother::new();
  reused.smooth(&mut large);

  let mut a = small();
  reused.smooth(&mut a);
  let mut b = small();
  GradientSmoother::new().smooth(&mut b);

  assert_eq!(a.to_checkpoint(), b.to_checkpoint());
}
