//! Per-voxel energy gradients and energies.
//!
//! All quantities are in voxel units: distances are scaled from the
//! normalized representation by the truncation band before they get here,
//! so `|∇φ| ≈ 1` near the surface.

use glam::{Mat3, Vec3};

use crate::sampling::WarpDerivatives;

/// `∇φ_live · (φ_live − φ_canonical)`.
#[inline]
pub fn data_term(live_sdf: f32, canonical_sdf: f32, live_gradient: Vec3) -> Vec3 {
  live_gradient * (live_sdf - canonical_sdf)
}

/// `J_colorᵀ · (c_live − c_canonical)`.
#[inline]
pub fn color_term(live_color: Vec3, canonical_color: Vec3, color_jacobian: Mat3) -> Vec3 {
  color_jacobian.transpose() * (live_color - canonical_color)
}

/// `(‖∇φ‖ − 1) · H∇φ / (‖∇φ‖ + ε)`.
#[inline]
pub fn level_set_term(gradient: Vec3, hessian: Mat3, epsilon: f32) -> Vec3 {
  let norm = gradient.length();
  (hessian * gradient) * ((norm - 1.0) / (norm + epsilon))
}

/// Killing gradient, written out per axis:
///
/// `u: −2·[(1+γ)H_u,xx + H_u,yy + H_u,zz + γH_v,xy + γH_w,xz]`
/// and cyclically for `v` and `w`.
pub fn killing_term(d: &WarpDerivatives, gamma: f32) -> Vec3 {
  let s = &d.second;
  let one_plus = 1.0 + gamma;

  let u = one_plus * s[0][0].x + s[1][1].x + s[2][2].x + gamma * s[0][1].y + gamma * s[0][2].z;
  let v = one_plus * s[1][1].y + s[2][2].y + s[0][0].y + gamma * s[1][2].z + gamma * s[1][0].x;
  let w = one_plus * s[2][2].z + s[0][0].z + s[1][1].z + gamma * s[2][0].x + gamma * s[2][1].y;

  -2.0 * Vec3::new(u, v, w)
}

/// Killing gradient in matrix form: `−2·(Δψ + γ∇(∇·ψ))`.
pub fn killing_term_matrix(d: &WarpDerivatives, gamma: f32) -> Vec3 {
  let hessians = [d.hessian(0), d.hessian(1), d.hessian(2)];
  let laplacian = Vec3::new(
    trace(&hessians[0]),
    trace(&hessians[1]),
    trace(&hessians[2]),
  );
  // (∇(∇·ψ))_i = Σ_j ∂²ψ_j / ∂x_i∂x_j
  let grad_div = Vec3::from_array(std::array::from_fn(|i| {
    (0..3).map(|j| hessians[j].col(j)[i]).sum::<f32>()
  }));
  -2.0 * (laplacian + gamma * grad_div)
}

#[inline]
fn trace(m: &Mat3) -> f32 {
  m.x_axis.x + m.y_axis.y + m.z_axis.z
}

// =============================================================================
// Energies
// =============================================================================

/// `½(φ_live − φ_canonical)²`.
#[inline]
pub fn data_energy(live_sdf: f32, canonical_sdf: f32) -> f32 {
  let diff = live_sdf - canonical_sdf;
  0.5 * diff * diff
}

/// `½ w_c ‖c_live − c_canonical‖²`.
#[inline]
pub fn color_energy(live_color: Vec3, canonical_color: Vec3, weight: f32) -> f32 {
  0.5 * weight * (live_color - canonical_color).length_squared()
}

/// `½(‖∇φ‖ − 1)²`.
#[inline]
pub fn level_set_energy(gradient: Vec3) -> f32 {
  let dev = gradient.length() - 1.0;
  0.5 * dev * dev
}

/// `‖J‖²_F + γ·tr(J·J)`, the energy whose gradient is the Killing term.
#[inline]
pub fn killing_energy(jacobian: &Mat3, gamma: f32) -> f32 {
  let frobenius = jacobian.x_axis.length_squared()
    + jacobian.y_axis.length_squared()
    + jacobian.z_axis.length_squared();
  frobenius + gamma * trace(&(*jacobian * *jacobian))
}

#[cfg(test)]
#[path = "terms_test.rs"]
mod terms_test;
