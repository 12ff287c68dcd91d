//! Scene - spatial index, block store and global parameters.
//!
//! The canonical scene persists across frames and only grows. A live scene
//! is built fresh each frame by the caller (upstream depth fusion) and is
//! only borrowed by the tracker for that frame.

use std::fmt;

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::cache::IndexCache;
use crate::config::{IndexConfig, SceneParams};
use crate::constants::{
  block_origin, index_to_local, voxel_to_block, voxel_to_local_index, BLOCK_SIZE_CB,
};
use crate::error::FusionResult;
use crate::index::{Insertion, VoxelBlockHash};
use crate::store::VoxelBlockStore;
use crate::types::Voxel;

/// Sparse signed-distance volume.
pub struct Scene<V: Voxel> {
  params: SceneParams,
  index_config: IndexConfig,
  index: VoxelBlockHash,
  store: VoxelBlockStore<V>,
}

impl<V: Voxel> Scene<V> {
  pub fn new(params: SceneParams, index_config: IndexConfig) -> FusionResult<Self> {
    params.validate()?;
    Ok(Self {
      params,
      index_config,
      index: VoxelBlockHash::new(&index_config)?,
      store: VoxelBlockStore::new(index_config.block_capacity),
    })
  }

  #[inline]
  pub fn params(&self) -> &SceneParams {
    &self.params
  }

  pub fn index_config(&self) -> &IndexConfig {
    &self.index_config
  }

  pub fn index(&self) -> &VoxelBlockHash {
    &self.index
  }

  /// Number of allocated blocks.
  pub fn block_count(&self) -> usize {
    self.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.store.is_empty()
  }

  // ===========================================================================
  // Allocation
  // ===========================================================================

  /// Bind a block to `pos`, allocating from the store when absent.
  pub fn allocate_block(&mut self, pos: IVec3) -> FusionResult<Insertion> {
    let store = &mut self.store;
    self.index.insert_with(pos, || store.allocate(pos))
  }

  /// Write a voxel, allocating its block if needed.
  pub fn set_voxel(&mut self, voxel: IVec3, value: V) -> FusionResult<()> {
    let ptr = self.allocate_block(voxel_to_block(voxel))?.ptr;
    self.store.block_mut(ptr)[voxel_to_local_index(voxel)] = value;
    Ok(())
  }

  /// Drop all blocks.
  pub fn clear(&mut self) {
    self.index.clear();
    self.store.clear();
  }

  // ===========================================================================
  // Lookup
  // ===========================================================================

  #[inline]
  pub fn find_block(&self, pos: IVec3) -> Option<usize> {
    self.index.find(pos)
  }

  #[inline]
  pub fn lookup_block(&self, pos: IVec3, cache: &mut IndexCache) -> Option<usize> {
    self.index.lookup(pos, cache)
  }

  /// Voxel at a global coordinate, `None` when its block is unallocated.
  #[inline]
  pub fn voxel(&self, voxel: IVec3, cache: &mut IndexCache) -> Option<&V> {
    self
      .index
      .lookup(voxel_to_block(voxel), cache)
      .map(|ptr| &self.store.block(ptr)[voxel_to_local_index(voxel)])
  }

  /// Voxel at a global coordinate, or `V::default()` (truncated, weight 0)
  /// when unallocated.
  #[inline]
  pub fn read_voxel(&self, voxel: IVec3, cache: &mut IndexCache) -> V {
    self.voxel(voxel, cache).copied().unwrap_or_default()
  }

  pub fn voxel_mut(&mut self, voxel: IVec3) -> Option<&mut V> {
    let ptr = self.index.find(voxel_to_block(voxel))?;
    Some(&mut self.store.block_mut(ptr)[voxel_to_local_index(voxel)])
  }

  #[inline]
  pub fn block(&self, ptr: usize) -> &[V] {
    self.store.block(ptr)
  }

  #[inline]
  pub fn block_mut(&mut self, ptr: usize) -> &mut [V] {
    self.store.block_mut(ptr)
  }

  #[inline]
  pub fn block_position(&self, ptr: usize) -> IVec3 {
    self.store.position(ptr)
  }

  /// Allocated block coordinates in allocation order.
  pub fn block_positions(&self) -> &[IVec3] {
    self.store.positions()
  }

  // ===========================================================================
  // Traversal
  // ===========================================================================

  /// Allocated blocks with their coordinates.
  pub fn blocks(&self) -> impl Iterator<Item = (IVec3, &[V])> + '_ {
    self
      .store
      .positions()
      .iter()
      .enumerate()
      .map(|(ptr, pos)| (*pos, self.store.block(ptr)))
  }

  /// Parallel read-only traversal; pairs are `(pointer, coordinate, voxels)`.
  pub fn par_blocks(&self) -> impl IndexedParallelIterator<Item = (usize, IVec3, &[V])> + '_ {
    let (voxels, positions) = (self.store.voxels(), self.store.positions());
    voxels
      .par_chunks(BLOCK_SIZE_CB)
      .zip(positions.par_iter())
      .enumerate()
      .map(|(ptr, (block, pos))| (ptr, *pos, block))
  }

  /// Parallel traversal with exclusive access to each block.
  pub fn par_blocks_mut(
    &mut self,
  ) -> impl IndexedParallelIterator<Item = (usize, IVec3, &mut [V])> + '_ {
    let (voxels, positions) = self.store.split_mut();
    voxels
      .par_chunks_mut(BLOCK_SIZE_CB)
      .zip(positions.par_iter())
      .enumerate()
      .map(|(ptr, (block, pos))| (ptr, *pos, block))
  }

  /// Sequential traversal with exclusive access to each block.
  pub fn blocks_mut(&mut self) -> impl Iterator<Item = (IVec3, &mut [V])> + '_ {
    let (voxels, positions) = self.store.split_mut();
    voxels
      .chunks_mut(BLOCK_SIZE_CB)
      .zip(positions.iter())
      .map(|(block, pos)| (*pos, block))
  }

  // ===========================================================================
  // Coordinates
  // ===========================================================================

  /// World position (metres) of a voxel coordinate.
  #[inline]
  pub fn voxel_to_world(&self, voxel: Vec3) -> Vec3 {
    voxel * self.params.voxel_size
  }

  /// Voxel-space position of a world point.
  #[inline]
  pub fn world_to_voxel(&self, world: Vec3) -> Vec3 {
    world / self.params.voxel_size
  }
}

impl<V: Voxel> fmt::Debug for Scene<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scene")
      .field("params", &self.params)
      .field("index_config", &self.index_config)
      .field("block_count", &self.block_count())
      .finish()
  }
}

/// Global voxel coordinate of entry `idx` of the block at `block`.
#[inline(always)]
pub fn voxel_position(block: IVec3, idx: usize) -> IVec3 {
  let (x, y, z) = index_to_local(idx);
  block_origin(block) + IVec3::new(x as i32, y as i32, z as i32)
}

#[cfg(test)]
#[path = "scene_test.rs"]
mod scene_test;
