//! Hooks into the tracking loop.
//!
//! Observers replace inline debug output: they see the scene read-only at
//! frame and iteration boundaries and receive the focus-voxel trace. All
//! hooks have empty default bodies.

use std::collections::{BTreeMap, BTreeSet};

use crossbeam_channel::{self as channel, Receiver, Sender, TrySendError};
use glam::{IVec3, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::WarpSnapshot;
use crate::error::FusionResult;
use crate::scene::{voxel_position, Scene};
use crate::solver::{EnergyStatistics, FocusVoxelTrace, UpdateHistogram};
use crate::tracker::FrameReport;
use crate::types::{Voxel, WarpVoxel};

/// Summary of one finished solver iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationEvent {
  pub frame: u32,
  pub iteration: u32,
  /// Largest update length, in voxels.
  pub max_update: f32,
  pub energy: EnergyStatistics,
  pub histogram: UpdateHistogram,
  pub elapsed_us: u64,
}

/// Receives tracking progress. `C` is the canonical voxel type.
pub trait TrackerObserver<C: WarpVoxel> {
  fn on_frame_start(&mut self, _frame: u32, _canonical: &Scene<C>) {}

  fn on_iteration_start(&mut self, _frame: u32, _iteration: u32, _canonical: &Scene<C>) {}

  fn on_iteration_end(&mut self, _event: &IterationEvent, _canonical: &Scene<C>) {}

  fn on_focus_voxel(&mut self, _frame: u32, _iteration: u32, _trace: &FocusVoxelTrace) {}

  fn on_frame_end(&mut self, _report: &FrameReport, _canonical: &Scene<C>) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl<C: WarpVoxel> TrackerObserver<C> for NoopObserver {}

impl<C: WarpVoxel, O: TrackerObserver<C> + ?Sized> TrackerObserver<C> for &mut O {
  fn on_frame_start(&mut self, frame: u32, canonical: &Scene<C>) {
    (**self).on_frame_start(frame, canonical);
  }

  fn on_iteration_start(&mut self, frame: u32, iteration: u32, canonical: &Scene<C>) {
    (**self).on_iteration_start(frame, iteration, canonical);
  }

  fn on_iteration_end(&mut self, event: &IterationEvent, canonical: &Scene<C>) {
    (**self).on_iteration_end(event, canonical);
  }

  fn on_focus_voxel(&mut self, frame: u32, iteration: u32, trace: &FocusVoxelTrace) {
    (**self).on_focus_voxel(frame, iteration, trace);
  }

  fn on_frame_end(&mut self, report: &FrameReport, canonical: &Scene<C>) {
    (**self).on_frame_end(report, canonical);
  }
}

// =============================================================================
// Channel forwarding
// =============================================================================

/// Scene-free events forwarded to another thread.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerEvent {
  FrameStarted { frame: u32 },
  IterationFinished(IterationEvent),
  FocusVoxel {
    frame: u32,
    iteration: u32,
    trace: FocusVoxelTrace,
  },
  FrameFinished(FrameReport),
}

/// Forwards events over a crossbeam channel without ever blocking the
/// tracker: when a bounded channel is full the event is dropped and
/// counted.
pub struct ChannelObserver {
  sender: Sender<TrackerEvent>,
  dropped: u64,
}

impl ChannelObserver {
  pub fn unbounded() -> (Self, Receiver<TrackerEvent>) {
    let (sender, receiver) = channel::unbounded();
    (Self { sender, dropped: 0 }, receiver)
  }

  pub fn bounded(capacity: usize) -> (Self, Receiver<TrackerEvent>) {
    let (sender, receiver) = channel::bounded(capacity);
    (Self { sender, dropped: 0 }, receiver)
  }

  /// Events lost to a full channel.
  pub fn dropped(&self) -> u64 {
    self.dropped
  }

  fn forward(&mut self, event: TrackerEvent) {
    match self.sender.try_send(event) {
      Ok(()) => {}
      Err(TrySendError::Full(_)) => self.dropped += 1,
      // Receiver gone: nobody is listening.
      Err(TrySendError::Disconnected(_)) => {}
    }
  }
}

impl<C: WarpVoxel> TrackerObserver<C> for ChannelObserver {
  fn on_frame_start(&mut self, frame: u32, _canonical: &Scene<C>) {
    self.forward(TrackerEvent::FrameStarted { frame });
  }

  fn on_iteration_end(&mut self, event: &IterationEvent, _canonical: &Scene<C>) {
    self.forward(TrackerEvent::IterationFinished(*event));
  }

  fn on_focus_voxel(&mut self, frame: u32, iteration: u32, trace: &FocusVoxelTrace) {
    self.forward(TrackerEvent::FocusVoxel {
      frame,
      iteration,
      trace: *trace,
    });
  }

  fn on_frame_end(&mut self, report: &FrameReport, _canonical: &Scene<C>) {
    self.forward(TrackerEvent::FrameFinished(*report));
  }
}

// =============================================================================
// Warp recording
// =============================================================================

/// Records the warp field after every iteration of the selected frames.
///
/// Snapshots are kept in memory, keyed by `(frame, iteration)`.
#[derive(Debug, Default)]
pub struct WarpRecorder {
  /// `None` records every frame.
  frames: Option<BTreeSet<u32>>,
  snapshots: BTreeMap<(u32, u32), WarpSnapshot>,
}

impl WarpRecorder {
  pub fn all_frames() -> Self {
    Self::default()
  }

  pub fn for_frames(frames: impl IntoIterator<Item = u32>) -> Self {
    Self {
      frames: Some(frames.into_iter().collect()),
      snapshots: BTreeMap::new(),
    }
  }

  pub fn records_frame(&self, frame: u32) -> bool {
    self.frames.as_ref().map_or(true, |f| f.contains(&frame))
  }

  pub fn len(&self) -> usize {
    self.snapshots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.snapshots.is_empty()
  }

  pub fn snapshot_at(&self, frame: u32, iteration: u32) -> Option<&WarpSnapshot> {
    self.snapshots.get(&(frame, iteration))
  }

  /// Snapshots of one frame in iteration order.
  pub fn replay(&self, frame: u32) -> impl Iterator<Item = &WarpSnapshot> + '_ {
    self
      .snapshots
      .range((frame, 0)..=(frame, u32::MAX))
      .map(|(_, snapshot)| snapshot)
  }

  /// Restore the warps recorded at `(frame, iteration)` into `scene`.
  ///
  /// Returns `false` when no such snapshot was recorded.
  pub fn apply_snapshot<C: WarpVoxel>(
    &self,
    frame: u32,
    iteration: u32,
    scene: &mut Scene<C>,
  ) -> FusionResult<bool> {
    match self.snapshot_at(frame, iteration) {
      Some(snapshot) => {
        snapshot.restore(scene)?;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  pub fn clear(&mut self) {
    self.snapshots.clear();
  }
}

impl<C: WarpVoxel> TrackerObserver<C> for WarpRecorder {
  fn on_iteration_end(&mut self, event: &IterationEvent, canonical: &Scene<C>) {
    if !self.records_frame(event.frame) {
      return;
    }
    let snapshot = WarpSnapshot::capture(canonical, event.frame, event.iteration);
    self.snapshots.insert((event.frame, event.iteration), snapshot);
  }
}

// =============================================================================
// Anomaly highlights
// =============================================================================

/// Thresholds for flagging a voxel after an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HighlightCriteria {
  /// Flag updates longer than this multiple of the mean update length.
  pub update_ratio: f32,
  /// Floor on the update limit, in voxels.
  pub min_update: f32,
  /// Flag accumulated warps longer than this, in voxels.
  pub max_warp: Option<f32>,
}

impl Default for HighlightCriteria {
  fn default() -> Self {
    Self {
      update_ratio: 8.0,
      min_update: 1e-3,
      max_warp: None,
    }
  }
}

impl HighlightCriteria {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_update_ratio(mut self, ratio: f32) -> Self {
    self.update_ratio = ratio;
    self
  }

  pub fn with_min_update(mut self, min_update: f32) -> Self {
    self.min_update = min_update;
    self
  }

  pub fn with_max_warp(mut self, max_warp: f32) -> Self {
    self.max_warp = Some(max_warp);
    self
  }

  fn classify(&self, update: Vec3, warp: Vec3, update_limit: f32) -> Option<AnomalyKind> {
    if update.length() > update_limit {
      Some(AnomalyKind::LargeUpdate)
    } else if self.max_warp.is_some_and(|max| warp.length() > max) {
      Some(AnomalyKind::LargeWarp)
    } else {
      None
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
  /// Update far above the iteration's mean.
  LargeUpdate,
  /// Accumulated warp beyond `max_warp`.
  LargeWarp,
}

/// One flagged voxel at one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HighlightInfo {
  pub frame: u32,
  pub iteration: u32,
  pub voxel: IVec3,
  pub kind: AnomalyKind,
  pub warp: Vec3,
  pub update: Vec3,
  pub sdf: f32,
}

/// Collects voxels whose updates or warps stand out, per voxel and frame.
///
/// Only observed voxels (depth weight > 0) are considered. Use
/// [`filter_recurring`](Self::filter_recurring) to keep voxels flagged across
/// several frames.
#[derive(Debug, Default)]
pub struct HighlightRecorder {
  criteria: HighlightCriteria,
  /// voxel -> frame -> hits in iteration order
  highlights: BTreeMap<[i32; 3], BTreeMap<u32, Vec<HighlightInfo>>>,
}

impl HighlightRecorder {
  pub fn new(criteria: HighlightCriteria) -> Self {
    Self {
      criteria,
      highlights: BTreeMap::new(),
    }
  }

  /// Rebuild a recorder from saved [`records`](Self::records).
  pub fn from_records(
    criteria: HighlightCriteria,
    records: impl IntoIterator<Item = HighlightInfo>,
  ) -> Self {
    let mut recorder = Self::new(criteria);
    for info in records {
      recorder.insert(info);
    }
    recorder
  }

  pub fn criteria(&self) -> &HighlightCriteria {
    &self.criteria
  }

  /// Number of highlighted voxels.
  pub fn len(&self) -> usize {
    self.highlights.len()
  }

  pub fn is_empty(&self) -> bool {
    self.highlights.is_empty()
  }

  pub fn voxels(&self) -> impl Iterator<Item = IVec3> + '_ {
    self.highlights.keys().map(|k| IVec3::from_array(*k))
  }

  /// Hits of one voxel, ordered by frame then iteration.
  pub fn highlights(&self, voxel: IVec3) -> impl Iterator<Item = &HighlightInfo> + '_ {
    self
      .highlights
      .get(&voxel.to_array())
      .into_iter()
      .flat_map(|frames| frames.values().flatten())
  }

  /// Number of distinct frames in which `voxel` was flagged.
  pub fn recurrence(&self, voxel: IVec3) -> usize {
    self.highlights.get(&voxel.to_array()).map_or(0, BTreeMap::len)
  }

  /// Drop voxels flagged in fewer than `min_frames` distinct frames.
  pub fn filter_recurring(&mut self, min_frames: usize) {
    self.highlights.retain(|_, frames| frames.len() >= min_frames);
  }

  /// All hits, ordered by voxel, frame and iteration.
  pub fn records(&self) -> Vec<HighlightInfo> {
    self
      .highlights
      .values()
      .flat_map(|frames| frames.values().flatten().copied())
      .collect()
  }

  pub fn clear(&mut self) {
    self.highlights.clear();
  }

  fn insert(&mut self, info: HighlightInfo) {
    self
      .highlights
      .entry(info.voxel.to_array())
      .or_default()
      .entry(info.frame)
      .or_default()
      .push(info);
  }
}

impl<C: WarpVoxel> TrackerObserver<C> for HighlightRecorder {
  fn on_iteration_end(&mut self, event: &IterationEvent, canonical: &Scene<C>) {
    let (count, total) = canonical
      .par_blocks()
      .map(|(_, _, block)| {
        block
          .iter()
          .filter(|v| v.depth_weight() > 0)
          .fold((0usize, 0.0f64), |(n, sum), v| {
            (n + 1, sum + v.warp_update().length() as f64)
          })
      })
      .reduce(|| (0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));
    if count == 0 {
      return;
    }

    let criteria = self.criteria;
    let mean = (total / count as f64) as f32;
    let limit = (mean * criteria.update_ratio).max(criteria.min_update);
    let (frame, iteration) = (event.frame, event.iteration);

    let found: Vec<HighlightInfo> = canonical
      .par_blocks()
      .flat_map_iter(|(_, pos, block)| {
        block.iter().enumerate().filter_map(move |(idx, voxel)| {
          if voxel.depth_weight() == 0 {
            return None;
          }
          let (warp, update) = (voxel.warp(), voxel.warp_update());
          let kind = criteria.classify(update, warp, limit)?;
          Some(HighlightInfo {
            frame,
            iteration,
            voxel: voxel_position(pos, idx),
            kind,
            warp,
            update,
            sdf: voxel.sdf(),
          })
        })
      })
      .collect();

    if !found.is_empty() {
      debug!(frame, iteration, count = found.len(), limit, "highlighted voxels");
    }
    for info in found {
      self.insert(info);
    }
  }
}

#[cfg(test)]
#[path = "observer_test.rs"]
mod observer_test;
