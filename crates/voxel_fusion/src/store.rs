//! Contiguous pool of fixed-size voxel blocks.
//!
//! Blocks are appended in allocation order and never released while a
//! scene is live, so every block in `0..len()` is allocated and the pool
//! can be split into disjoint `&mut` chunks for parallel writers.

use glam::IVec3;

use crate::constants::BLOCK_SIZE_CB;
use crate::error::{FusionError, FusionResult, Resource};
use crate::types::Voxel;

pub struct VoxelBlockStore<V: Voxel> {
  voxels: Vec<V>,
  /// Block coordinate of each allocated block, indexed by pointer.
  positions: Vec<IVec3>,
  capacity: usize,
}

impl<V: Voxel> VoxelBlockStore<V> {
  pub fn new(capacity: usize) -> Self {
    Self {
      voxels: Vec::new(),
      positions: Vec::new(),
      capacity,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of allocated blocks.
  pub fn len(&self) -> usize {
    self.positions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }

  /// Take a fresh block initialised to `V::default()`.
  pub fn allocate(&mut self, pos: IVec3) -> FusionResult<usize> {
    if self.positions.len() >= self.capacity {
      return Err(FusionError::ResourceExhausted {
        resource: Resource::BlockStore,
        capacity: self.capacity,
        block: pos,
      });
    }
    let ptr = self.positions.len();
    self.voxels.resize(self.voxels.len() + BLOCK_SIZE_CB, V::default());
    self.positions.push(pos);
    Ok(ptr)
  }

  #[inline(always)]
  pub fn block(&self, ptr: usize) -> &[V] {
    &self.voxels[ptr * BLOCK_SIZE_CB..(ptr + 1) * BLOCK_SIZE_CB]
  }

  #[inline(always)]
  pub fn block_mut(&mut self, ptr: usize) -> &mut [V] {
    &mut self.voxels[ptr * BLOCK_SIZE_CB..(ptr + 1) * BLOCK_SIZE_CB]
  }

  #[inline(always)]
  pub fn position(&self, ptr: usize) -> IVec3 {
    self.positions[ptr]
  }

  pub fn positions(&self) -> &[IVec3] {
    &self.positions
  }

  /// All voxels, block after block.
  pub fn voxels(&self) -> &[V] {
    &self.voxels
  }

  /// Disjoint mutable access: voxel pool plus the read-only position table.
  pub fn split_mut(&mut self) -> (&mut [V], &[IVec3]) {
    (&mut self.voxels, &self.positions)
  }

  pub fn clear(&mut self) {
    self.voxels.clear();
    self.positions.clear();
  }
}
