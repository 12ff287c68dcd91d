//! voxel_fusion - Non-rigid volumetric fusion core
//!
//! This crate tracks a deforming surface across depth frames. A persistent
//! **canonical** signed-distance volume is warped onto each incoming **live**
//! volume by gradient descent over a dense per-voxel warp field, then the
//! live measurement is fused into the canonical volume along that warp.
//!
//! # Features
//!
//! - **Voxel hashing**: 8³ blocks behind a spatial hash with an excess list,
//!   bump-allocated from a fixed-capacity store
//! - **Warp field solver**: data, colour, level-set and Killing (near-rigid)
//!   terms, evaluated in parallel over blocks with rayon
//! - **Sobolev smoothing**: separable 7-tap filter over the pending updates
//! - **Fusion**: weighted running averages with saturating weights
//! - **Observers**: iteration hooks, channel forwarding, warp recording and
//!   anomaly highlights
//! - **Checkpoints**: serde-serializable scene and warp snapshots
//!
//! # Example
//!
//! ```ignore
//! use voxel_fusion::{IndexConfig, MotionTracker, Scene, SceneParams, SolverConfig};
//! use voxel_fusion::{CanonicalVoxel, LiveVoxel};
//!
//! let params = SceneParams::default();
//! let mut canonical = Scene::<CanonicalVoxel>::new(params, IndexConfig::DEFAULT)?;
//! let mut tracker = MotionTracker::new(SolverConfig::default())?;
//!
//! for live in frames {
//!     let report = tracker.process_frame(&mut canonical, &live)?;
//!     println!("frame {} converged: {}", report.frame_index, report.converged);
//! }
//! ```

pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use constants::{BLOCK_SIZE, BLOCK_SIZE_CB, UNALLOCATED};
pub use error::{FusionError, FusionResult, Resource};
pub use types::{
  sdf_conversion, CanonicalVoxel, DepthVoxel, GradientSlot, LiveVoxel, Voxel, VoxelLayout,
  WarpVoxel,
};

// Configuration
pub mod config;
pub use config::{IndexConfig, SceneParams, SolverConfig};

// Spatial index and block storage
pub mod cache;
pub mod index;
pub mod store;
pub use cache::IndexCache;
pub use index::{Insertion, VoxelBlockHash};

// Scene container
pub mod scene;
pub use scene::Scene;

// Interpolation and finite differences
pub mod sampling;

// Read-only reductions
pub mod statistics;
pub use statistics::{SdfSummary, VoxelBounds, WarpSummary};

// Warp field optimisation
pub mod smoothing;
pub mod solver;
pub use smoothing::GradientSmoother;
pub use solver::{EnergyStatistics, FocusVoxelTrace, UpdateHistogram, WarpFieldSolver};

// Fusion of live data into the canonical scene
pub mod fusion;
pub use fusion::{fuse, warp_canonical_to_live, FusionReport};

// Per-frame driver
pub mod metrics;
pub mod observer;
pub mod tracker;
pub use metrics::TrackerMetrics;
pub use observer::{
  AnomalyKind, ChannelObserver, HighlightCriteria, HighlightInfo, HighlightRecorder,
  IterationEvent, NoopObserver, TrackerEvent, TrackerObserver, WarpRecorder,
};
pub use tracker::{allocate_from_live, AllocationMode, FrameReport, MotionTracker};

// Snapshots
pub mod checkpoint;
pub use checkpoint::{BlockRecord, SceneCheckpoint, WarpSnapshot};

#[cfg(test)]
pub mod test_utils;
