//! Per-traversal memo of the last resolved block.
//!
//! Sequential voxel queries mostly land in the block that answered the
//! previous query. Each traversal (each rayon split) creates its own cache
//! and drops it at the end; caches are never shared between threads.

use glam::IVec3;

/// Last block coordinate resolved through the index, hit or miss.
#[derive(Clone, Copy, Debug)]
pub struct IndexCache {
  block: IVec3,
  ptr: Option<usize>,
  valid: bool,
  hits: u64,
  misses: u64,
}

impl IndexCache {
  pub fn new() -> Self {
    Self {
      block: IVec3::ZERO,
      ptr: None,
      valid: false,
      hits: 0,
      misses: 0,
    }
  }

  /// Cached answer for `block`, if the cache currently holds it.
  ///
  /// The outer `Option` is the cache hit; the inner one is the cached
  /// lookup result (`None` = unallocated).
  #[inline(always)]
  pub fn cached(&mut self, block: IVec3) -> Option<Option<usize>> {
    if self.valid && self.block == block {
      self.hits += 1;
      Some(self.ptr)
    } else {
      self.misses += 1;
      None
    }
  }

  #[inline(always)]
  pub fn store(&mut self, block: IVec3, ptr: Option<usize>) {
    self.block = block;
    self.ptr = ptr;
    self.valid = true;
  }

  pub fn invalidate(&mut self) {
    self.valid = false;
  }

  /// (hits, misses) since creation.
  pub fn counters(&self) -> (u64, u64) {
    (self.hits, self.misses)
  }
}

impl Default for IndexCache {
  fn default() -> Self {
    Self::new()
  }
}
