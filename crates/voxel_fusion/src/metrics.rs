//! Timing and convergence history of the motion tracker.
//!
//! # Usage
//!
//! ```ignore
//! let report = tracker.process_frame(&mut canonical, &live)?;
//! let metrics = tracker.metrics();
//! println!("{:.1} us/iteration", metrics.iteration_us.average());
//! ```

use std::collections::VecDeque;

/// Samples kept per window.
pub const DEFAULT_WINDOW: usize = 256;

/// The most recent `capacity` samples with a running total.
#[derive(Debug, Clone)]
pub struct SampleWindow {
  samples: VecDeque<u64>,
  capacity: usize,
  total: u64,
}

impl SampleWindow {
  pub fn new(capacity: usize) -> Self {
    Self {
      samples: VecDeque::with_capacity(capacity),
      capacity,
      total: 0,
    }
  }

  /// Record a sample. Once full, the oldest one is dropped.
  pub fn push(&mut self, sample: u64) {
    if self.capacity == 0 {
      return;
    }
    if self.samples.len() == self.capacity {
      if let Some(old) = self.samples.pop_front() {
        self.total -= old;
      }
    }
    self.samples.push_back(sample);
    self.total += sample;
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn last(&self) -> Option<u64> {
    self.samples.back().copied()
  }

  /// Sum of the samples in the window.
  pub fn total(&self) -> u64 {
    self.total
  }

  /// 0 when empty.
  pub fn average(&self) -> f64 {
    match self.samples.len() {
      0 => 0.0,
      n => self.total as f64 / n as f64,
    }
  }

  pub fn min_max(&self) -> Option<(u64, u64)> {
    let first = *self.samples.front()?;
    Some(
      self
        .samples
        .iter()
        .fold((first, first), |(lo, hi), &s| (lo.min(s), hi.max(s))),
    )
  }
}

impl Default for SampleWindow {
  fn default() -> Self {
    Self::new(DEFAULT_WINDOW)
  }
}

/// Tracker history, updated once per iteration and once per frame.
#[derive(Debug, Clone, Default)]
pub struct TrackerMetrics {
  /// Wall time of each solver iteration (compute, smoothing, apply).
  pub iteration_us: SampleWindow,
  /// Wall time of each frame, allocation and fusion included.
  pub frame_us: SampleWindow,
  /// Iterations run per frame.
  pub iterations_per_frame: SampleWindow,
  /// Largest update of the most recent iteration, in voxels.
  pub last_max_update: f32,
  pub frames_processed: u64,
  /// Frames that hit the iteration cap.
  pub non_converged_frames: u64,
}

impl TrackerMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record_iteration(&mut self, elapsed_us: u64, max_update: f32) {
    self.iteration_us.push(elapsed_us);
    self.last_max_update = max_update;
  }

  pub fn record_frame(&mut self, elapsed_us: u64, iterations: u32, converged: bool) {
    self.frame_us.push(elapsed_us);
    self.iterations_per_frame.push(iterations as u64);
    self.frames_processed += 1;
    if !converged {
      self.non_converged_frames += 1;
    }
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }
}
