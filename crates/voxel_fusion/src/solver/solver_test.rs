use approx::assert_abs_diff_eq;
use glam::{IVec3, Vec3};

use super::*;
use crate::sampling::sample_sdf;
use crate::statistics::VoxelBounds;
use crate::test_utils::{empty_scene, sphere_pair, SPHERE_CENTER};
use crate::types::{CanonicalVoxel, LiveVoxel};

fn data_only(learning_rate: f32) -> SolverConfig {
  SolverConfig::new()
    .with_rigidity(0.0)
    .with_term_weights(1.0, 0.0, 0.0)
    .with_learning_rate(learning_rate)
    .with_smoothing(false)
}

/// Weighted voxels within 1.5 voxels of the surface.
fn near_surface(scene: &Scene<CanonicalVoxel>) -> Vec<IVec3> {
  scene
    .blocks()
    .flat_map(|(pos, block)| {
      block
        .iter()
        .enumerate()
        .filter(|(_, v)| v.depth_weight() > 0 && v.sdf().abs() < 0.3)
        .map(move |(idx, _)| voxel_position(pos, idx))
    })
    .collect()
}

/// Mean `|φ_live(x + ψ) − φ_canonical(x)|` in voxels.
fn mean_residual(canonical: &Scene<CanonicalVoxel>, live: &Scene<LiveVoxel>, voxels: &[IVec3]) -> f64 {
  let scale = canonical.params().truncation_voxels();
  let mut cache = IndexCache::new();
  let mut live_cache = IndexCache::new();
  let sum: f64 = voxels
    .iter()
    .map(|&p| {
      let v = canonical.read_voxel(p, &mut cache);
      let live_sdf = sample_sdf(live, p.as_vec3() + v.warp, &mut live_cache);
      ((live_sdf - v.sdf()) * scale).abs() as f64
    })
    .sum();
  sum / voxels.len() as f64
}

/// Mean error of the warp against `t`, along the canonical surface normal.
fn mean_normal_error(canonical: &Scene<CanonicalVoxel>, voxels: &[IVec3], t: Vec3) -> f64 {
  let mut cache = IndexCache::new();
  let sum: f64 = voxels
    .iter()
    .map(|&p| {
      let n = (p.as_vec3() - SPHERE_CENTER).normalize();
      let w = canonical.read_voxel(p, &mut cache).warp;
      (w - t).dot(n).abs() as f64
    })
    .sum();
  sum / voxels.len() as f64
}

// =========================================================================
// Scenarios
// =========================================================================

/// Identical scenes and zero warp: the data term vanishes everywhere.
#[test]
fn test_zero_difference_gives_zero_update() {
  let (mut canonical, live) = sphere_pair(3.5, Vec3::ZERO);
  let mut solver = WarpFieldSolver::new(
    SolverConfig::new()
      .with_term_weights(1.0, 0.0, 0.5)
      .with_smoothing(false),
  )
  .unwrap();

  let computed = solver.compute_updates(&mut canonical, &live).unwrap();
  assert_abs_diff_eq!(computed.energy.data, 0.0, epsilon = 1e-6);
  assert_abs_diff_eq!(computed.energy.killing, 0.0, epsilon = 1e-9);

  let applied = solver.apply_updates(&mut canonical);
  assert!(applied.max_update < 1e-6, "max update {}", applied.max_update);
  assert_eq!(applied.histogram.total(), 8 * 512);
}

/// The level-set term stays small where the live field is a distance field.
#[test]
fn test_level_set_small_near_surface() {
  let (mut canonical, live) = sphere_pair(3.5, Vec3::ZERO);
  let focus = IVec3::new(12, 8, 8);
  let mut solver = WarpFieldSolver::new(
    SolverConfig::new()
      .with_smoothing(false)
      .with_focus_voxel(focus),
  )
  .unwrap();

  let trace = solver
    .compute_updates(&mut canonical, &live)
    .unwrap()
    .focus
    .expect("focus voxel is allocated");
  assert_eq!(trace.voxel, focus);
  assert_abs_diff_eq!(trace.live_sdf, 0.5, epsilon = 1e-3);
  assert_abs_diff_eq!(trace.canonical_sdf, trace.live_sdf, epsilon = 1e-6);
  assert!(trace.data.length() < 1e-6);
  assert!(trace.level_set.length() < 0.05, "level set {}", trace.level_set);
}

/// Live is canonical shifted by `T`: the residual shrinks every iteration
/// and the warp moves toward `T` along the surface normal.
#[test]
fn test_translation_converges_monotonically() {
  let t = Vec3::new(0.5, -0.3, 0.2);
  let (mut canonical, live) = sphere_pair(3.5, t);
  let voxels = near_surface(&canonical);
  assert!(voxels.len() > 100);
  let mut solver = WarpFieldSolver::new(data_only(0.2)).unwrap();

  let initial_normal = mean_normal_error(&canonical, &voxels, t);
  let mut residuals = vec![mean_residual(&canonical, &live, &voxels)];
  for _ in 0..25 {
    solver.compute_updates(&mut canonical, &live).unwrap();
    solver.apply_updates(&mut canonical);
    residuals.push(mean_residual(&canonical, &live, &voxels));
  }

  for pair in residuals.windows(2) {
    assert!(
      pair[1] <= pair[0] + 1e-3,
      "residual grew: {residuals:?}"
    );
  }
  let (first, last) = (residuals[0], residuals[residuals.len() - 1]);
  assert!(last < 0.1 * first, "residual {first} -> {last}");

  let final_normal = mean_normal_error(&canonical, &voxels, t);
  assert!(
    final_normal < 0.5 * initial_normal,
    "normal error {initial_normal} -> {final_normal}"
  );
}

/// With the Killing regulariser on (γ = 0) the warp still moves toward `T`.
#[test]
fn test_translation_with_regulariser() {
  let t = Vec3::new(0.4, 0.0, -0.3);
  let (mut canonical, live) = sphere_pair(3.5, t);
  let voxels = near_surface(&canonical);
  let mut solver = WarpFieldSolver::new(SolverConfig::new().with_rigidity(0.0).with_smoothing(false))
    .unwrap();

  let before = mean_normal_error(&canonical, &voxels, t);
  for _ in 0..40 {
    solver.compute_updates(&mut canonical, &live).unwrap();
    solver.apply_updates(&mut canonical);
  }
  let after = mean_normal_error(&canonical, &voxels, t);
  assert!(after < 0.9 * before, "normal error {before} -> {after}");
}

// =========================================================================
// Passes
// =========================================================================

#[test]
fn test_apply_subtracts_update_and_reports_max() {
  let mut scene = empty_scene::<CanonicalVoxel>();
  let a = IVec3::new(1, 1, 1);
  let b = IVec3::new(9, 0, 0);
  scene
    .set_voxel(
      a,
      CanonicalVoxel {
        warp: Vec3::ONE,
        warp_update: Vec3::new(0.5, 0.0, 0.0),
        ..CanonicalVoxel::default()
      },
    )
    .unwrap();
  scene
    .set_voxel(
      b,
      CanonicalVoxel {
        warp_update: Vec3::new(0.0, -2.0, 0.0),
        ..CanonicalVoxel::default()
      },
    )
    .unwrap();

  let solver = WarpFieldSolver::new(SolverConfig::default()).unwrap();
  let out = solver.apply_updates(&mut scene);

  assert_abs_diff_eq!(out.max_update, 2.0);
  assert_eq!(out.max_update_voxel, b);
  let mut cache = IndexCache::new();
  assert_eq!(scene.read_voxel(a, &mut cache).warp, Vec3::new(0.5, 1.0, 1.0));
  assert_eq!(scene.read_voxel(b, &mut cache).warp, Vec3::new(0.0, 2.0, 0.0));

  // 1022 zero updates land in the first bin, the 0.5 update in bin 4, the
  // maximum in the last.
  assert_eq!(out.histogram.bins[0], 2 * 512 - 2);
  assert_eq!(out.histogram.bins[4], 1);
  assert_eq!(out.histogram.bins[HISTOGRAM_BINS - 1], 1);
}

#[test]
fn test_non_finite_update_is_reported_and_not_applied() {
  let (mut canonical, live) = sphere_pair(3.5, Vec3::ZERO);
  let bad = IVec3::new(4, 4, 4);
  canonical.voxel_mut(bad).unwrap().warp = Vec3::new(f32::NAN, 0.0, 0.0);

  let mut solver = WarpFieldSolver::new(SolverConfig::default()).unwrap();
  let err = solver.compute_updates(&mut canonical, &live).unwrap_err();
  match err {
    FusionError::NumericDegeneracy { block, voxel, value } => {
      assert!(!value.is_finite());
      assert_eq!(block, crate::constants::voxel_to_block(voxel));
      assert!((voxel - bad).abs().max_element() <= 1, "unexpected voxel {voxel}");
    }
    other => panic!("unexpected error {other}"),
  }
  // Nothing was written.
  assert!(canonical
    .blocks()
    .all(|(_, block)| block.iter().all(|v| v.warp_update == Vec3::ZERO)));
}

#[test]
fn test_solver_rejects_invalid_config() {
  assert!(WarpFieldSolver::new(SolverConfig::new().with_learning_rate(0.0)).is_err());
  assert!(WarpFieldSolver::new(SolverConfig::new().with_rigidity(f32::NAN)).is_err());
}

#[test]
fn test_energy_total_is_weighted_sum() {
  let (mut canonical, live) = sphere_pair(3.5, Vec3::new(0.5, 0.0, 0.0));
  let mut solver = WarpFieldSolver::new(SolverConfig::new().with_term_weights(2.0, 0.5, 0.0)).unwrap();
  let e = solver.compute_updates(&mut canonical, &live).unwrap().energy;

  assert!(e.data > 0.0);
  assert_eq!(e.killing, 0.0);
  assert_abs_diff_eq!(e.total, 2.0 * e.data + 0.5 * e.level_set, epsilon = 1e-6 * e.total.max(1.0));
}

/// Mean `|ψ − t|` over `voxels`.
fn mean_warp_error(canonical: &Scene<CanonicalVoxel>, voxels: &[IVec3], t: Vec3) -> f64 {
  let mut cache = IndexCache::new();
  let sum: f64 = voxels
    .iter()
    .map(|&p| (canonical.read_voxel(p, &mut cache).warp - t).length() as f64)
    .sum();
  sum / voxels.len() as f64
}

/// Default term weights, γ = 0, no smoothing: the full warp error against
/// the translation never grows.
#[test]
fn test_translation_warp_error_decreases_monotonically() {
  let t = Vec3::new(0.5, -0.3, 0.2);
  let (mut canonical, live) = sphere_pair(3.5, t);
  let voxels = near_surface(&canonical);
  let mut solver =
    WarpFieldSolver::new(SolverConfig::new().with_rigidity(0.0).with_smoothing(false)).unwrap();

  let mut errors = vec![mean_warp_error(&canonical, &voxels, t)];
  assert_abs_diff_eq!(errors[0], t.length() as f64, epsilon = 1e-6);
  for _ in 0..50 {
    solver.compute_updates(&mut canonical, &live).unwrap();
    solver.apply_updates(&mut canonical);
    errors.push(mean_warp_error(&canonical, &voxels, t));
  }

  for pair in errors.windows(2) {
    assert!(pair[1] <= pair[0] + 1e-6, "warp error grew: {errors:?}");
  }
  let (first, last) = (errors[0], errors[errors.len() - 1]);
  assert!(last < 0.7 * first, "warp error {first} -> {last}");
}

// =========================================================================
// Colour
// =========================================================================

/// Sphere pair whose live colour ramps along x.
fn colored_pair() -> (Scene<CanonicalVoxel>, Scene<LiveVoxel>) {
  let (canonical, mut live) = sphere_pair(3.5, Vec3::ZERO);
  for (pos, block) in live.blocks_mut() {
    for (idx, voxel) in block.iter_mut().enumerate() {
      let x = voxel_position(pos, idx).x as f32;
      voxel.set_color(Vec3::splat(x / 16.0));
    }
  }
  (canonical, live)
}

fn color_trace(config: SolverConfig, focus: IVec3) -> (FocusVoxelTrace, EnergyStatistics) {
  let (mut canonical, live) = colored_pair();
  let mut solver = WarpFieldSolver::new(config.with_smoothing(false).with_focus_voxel(focus)).unwrap();
  let computed = solver.compute_updates(&mut canonical, &live).unwrap();
  (computed.focus.expect("focus voxel is allocated"), computed.energy)
}

#[test]
fn test_color_term_applies_near_surface_only() {
  let config = SolverConfig::new().with_color(1.0, 0.25);

  // |sdf| = 0.5 voxels = 0.1 of the band: inside the threshold.
  let (inside, energy) = color_trace(config.clone(), IVec3::new(11, 8, 8));
  assert!(inside.color.x > 0.0, "colour term {}", inside.color);
  assert_abs_diff_eq!(inside.color.y, 0.0, epsilon = 1e-6);
  assert_abs_diff_eq!(inside.color.z, 0.0, epsilon = 1e-6);
  assert!(energy.color > 0.0);
  // Fields agree, so the data part of the update is colour alone.
  assert!(inside.data.length() < 1e-6);

  // |sdf| = 2.5 voxels = 0.5 of the band: outside.
  let (outside, _) = color_trace(config, IVec3::new(14, 8, 8));
  assert_eq!(outside.color, Vec3::ZERO);
}

#[test]
fn test_color_term_off_by_default() {
  let (trace, energy) = color_trace(SolverConfig::new(), IVec3::new(11, 8, 8));
  assert_eq!(trace.color, Vec3::ZERO);
  assert_eq!(energy.color, 0.0);
}

// =========================================================================
// Scratch reuse
// =========================================================================

/// A solver reused on a smaller scene gives the same updates as a fresh one.
#[test]
fn test_reused_solver_matches_fresh() {
  let t = Vec3::new(0.5, 0.0, 0.0);
  let mut reused = WarpFieldSolver::new(SolverConfig::default()).unwrap();
  let (mut big, big_live) = sphere_pair(3.5, t);
  reused.compute_updates(&mut big, &big_live).unwrap();

  let small = || {
    let (canonical, live) = sphere_pair(3.5, t);
    let slice = VoxelBounds {
      min: IVec3::ZERO,
      max: IVec3::splat(8),
    };
    let canonical = Scene::from_checkpoint(&canonical.slice_checkpoint(slice), *canonical.index_config());
    (canonical.unwrap(), live)
  };
  let (mut a, live) = small();
  let (mut b, _) = small();
  assert_eq!(a.block_count(), 1);

  reused.compute_updates(&mut a, &live).unwrap();
  WarpFieldSolver::new(SolverConfig::default())
    .unwrap()
    .compute_updates(&mut b, &live)
    .unwrap();
  assert_eq!(a.to_checkpoint(), b.to_checkpoint());
}
