//! Checkpoint boundary: scenes and warp fields as ordered block records.
//!
//! Records are sorted by block coordinate so two checkpoints of the same
//! content compare equal regardless of allocation order. The on-disk layout
//! is left to the caller; everything here is serde-serializable.

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::{IndexConfig, SceneParams};
use crate::constants::{block_origin, BLOCK_SIZE, BLOCK_SIZE_CB};
use crate::error::{FusionError, FusionResult};
use crate::scene::Scene;
use crate::statistics::VoxelBounds;
use crate::types::{Voxel, WarpVoxel};

/// One block's worth of per-voxel data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord<T> {
  pub position: [i32; 3],
  pub voxels: Vec<T>,
}

/// Snapshot of a whole scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneCheckpoint<V> {
  pub params: SceneParams,
  pub blocks: Vec<BlockRecord<V>>,
}

impl<V> SceneCheckpoint<V> {
  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }
}

/// Warp field of every allocated block after one solver iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WarpSnapshot {
  pub frame: u32,
  pub iteration: u32,
  pub blocks: Vec<BlockRecord<Vec3>>,
}

fn sorted<T>(mut blocks: Vec<BlockRecord<T>>) -> Vec<BlockRecord<T>> {
  blocks.sort_unstable_by_key(|b| b.position);
  blocks
}

fn block_intersects(pos: IVec3, bounds: &VoxelBounds) -> bool {
  let min = block_origin(pos);
  let max = min + IVec3::splat(BLOCK_SIZE as i32);
  min.cmplt(bounds.max).all() && max.cmpgt(bounds.min).all()
}

impl<V: Voxel> Scene<V> {
  /// Every allocated block, sorted by coordinate.
  pub fn to_checkpoint(&self) -> SceneCheckpoint<V> {
    self.checkpoint_where(|_| true)
  }

  /// Only blocks intersecting a voxel-space box.
  pub fn slice_checkpoint(&self, bounds: VoxelBounds) -> SceneCheckpoint<V> {
    self.checkpoint_where(|pos| block_intersects(pos, &bounds))
  }

  fn checkpoint_where(&self, keep: impl Fn(IVec3) -> bool) -> SceneCheckpoint<V> {
    let blocks = self
      .blocks()
      .filter(|(pos, _)| keep(*pos))
      .map(|(pos, voxels)| BlockRecord {
        position: pos.to_array(),
        voxels: voxels.to_vec(),
      })
      .collect();
    SceneCheckpoint {
      params: *self.params(),
      blocks: sorted(blocks),
    }
  }

  /// Rebuild a scene from a checkpoint.
  ///
  /// Fails with [`FusionError::CheckpointMismatch`] when a block does not
  /// hold exactly one block of voxels or appears twice, and with
  /// [`FusionError::ResourceExhausted`] when `index_config` is too small.
  pub fn from_checkpoint(
    checkpoint: &SceneCheckpoint<V>,
    index_config: IndexConfig,
  ) -> FusionResult<Self> {
    let mut scene = Scene::new(checkpoint.params, index_config)?;
    for record in &checkpoint.blocks {
      let pos = IVec3::from_array(record.position);
      if record.voxels.len() != BLOCK_SIZE_CB {
        return Err(FusionError::CheckpointMismatch(format!(
          "block {pos} holds {} voxels, expected {BLOCK_SIZE_CB}",
          record.voxels.len()
        )));
      }
      let insertion = scene.allocate_block(pos)?;
      if !insertion.created {
        return Err(FusionError::CheckpointMismatch(format!(
          "block {pos} appears more than once"
        )));
      }
      scene.block_mut(insertion.ptr).copy_from_slice(&record.voxels);
    }
    Ok(scene)
  }
}

impl WarpSnapshot {
  /// Copy the warps of every allocated block.
  pub fn capture<C: WarpVoxel>(scene: &Scene<C>, frame: u32, iteration: u32) -> Self {
    let blocks = scene
      .blocks()
      .map(|(pos, voxels)| BlockRecord {
        position: pos.to_array(),
        voxels: voxels.iter().map(|v| v.warp()).collect(),
      })
      .collect();
    Self {
      frame,
      iteration,
      blocks: sorted(blocks),
    }
  }

  /// Write the recorded warps back into `scene`.
  ///
  /// Every recorded block must be allocated in `scene`; blocks the snapshot
  /// does not mention keep their warps. Nothing is written unless the whole
  /// snapshot matches.
  pub fn restore<C: WarpVoxel>(&self, scene: &mut Scene<C>) -> FusionResult<()> {
    let ptrs = self
      .blocks
      .iter()
      .map(|record| {
        let pos = IVec3::from_array(record.position);
        if record.voxels.len() != BLOCK_SIZE_CB {
          return Err(FusionError::CheckpointMismatch(format!(
            "warp block {pos} holds {} voxels, expected {BLOCK_SIZE_CB}",
            record.voxels.len()
          )));
        }
        scene
          .find_block(pos)
          .ok_or_else(|| FusionError::CheckpointMismatch(format!("block {pos} is not allocated")))
      })
      .collect::<FusionResult<Vec<_>>>()?;

    for (ptr, record) in ptrs.into_iter().zip(&self.blocks) {
      for (voxel, warp) in scene.block_mut(ptr).iter_mut().zip(&record.voxels) {
        voxel.set_warp(*warp);
      }
    }
    Ok(())
  }
}

#[cfg(test)]
#[path = "checkpoint_test.rs"]
mod checkpoint_test;
