//! Voxel block layout and default index capacities.
//!
//! # Block Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     VOXEL BLOCK (8³)                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Local index:  x + y * 8 + z * 64                            │
//! │                                                              │
//! │  Address:  0    1   ...   7    8   ...  63   64  ...  511    │
//! │  Content: [0,0,0][1,0,0]..[7,0,0][0,1,0]..[7,7,0][0,0,1]..   │
//! │           └──── X ────┘                                      │
//! │                                                              │
//! │  Optimal access: sequential X, then Y, then Z                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Coordinate Spaces
//!
//! ```text
//! voxel coordinate  v  (global integer grid, voxel units)
//! block coordinate  b = floor(v / 8)
//! local coordinate  l = v - b * 8        (0..8 on each axis)
//! world position    p = v * voxel_size   (metres)
//! ```

use glam::IVec3;

/// Voxels per block edge (must be a power of two for shift/mask math).
pub const BLOCK_SIZE: usize = 8;

/// Voxels per block face (8² = 64).
pub const BLOCK_SIZE_SQ: usize = BLOCK_SIZE * BLOCK_SIZE;

/// Voxels per block (8³ = 512).
pub const BLOCK_SIZE_CB: usize = BLOCK_SIZE * BLOCK_SIZE * BLOCK_SIZE;

/// log2(BLOCK_SIZE)
pub const BLOCK_SHIFT: u32 = 3;

/// Mask extracting the local coordinate on one axis (0x7).
pub const BLOCK_MASK: i32 = BLOCK_SIZE as i32 - 1;

/// Default number of hash buckets (power of two).
pub const DEFAULT_BUCKET_COUNT: usize = 0x40000;

/// Default capacity of the collision excess list.
pub const DEFAULT_EXCESS_CAPACITY: usize = 0x8000;

/// Default number of voxel blocks the store may hold.
pub const DEFAULT_BLOCK_CAPACITY: usize = 0x10000;

/// Pointer value of an empty bucket or a free excess slot.
pub const UNALLOCATED: i32 = -1;

/// Convert a local coordinate to a linear index inside a block.
#[inline(always)]
pub const fn local_to_index(x: usize, y: usize, z: usize) -> usize {
  x | (y << BLOCK_SHIFT) | (z << (2 * BLOCK_SHIFT))
}

/// Convert a linear index inside a block to its local coordinate.
#[inline(always)]
pub const fn index_to_local(idx: usize) -> (usize, usize, usize) {
  let mask = BLOCK_SIZE - 1;
  (idx & mask, (idx >> BLOCK_SHIFT) & mask, idx >> (2 * BLOCK_SHIFT))
}

/// Block containing a global voxel coordinate (floor division).
#[inline(always)]
pub fn voxel_to_block(voxel: IVec3) -> IVec3 {
  IVec3::new(
    voxel.x >> BLOCK_SHIFT,
    voxel.y >> BLOCK_SHIFT,
    voxel.z >> BLOCK_SHIFT,
  )
}

/// Linear in-block index of a global voxel coordinate.
#[inline(always)]
pub fn voxel_to_local_index(voxel: IVec3) -> usize {
  local_to_index(
    (voxel.x & BLOCK_MASK) as usize,
    (voxel.y & BLOCK_MASK) as usize,
    (voxel.z & BLOCK_MASK) as usize,
  )
}

/// Global voxel coordinate of the first voxel of a block.
#[inline(always)]
pub fn block_origin(block: IVec3) -> IVec3 {
  block * BLOCK_SIZE as i32
}

#[cfg(test)]
#[path = "constants_test.rs"]
mod constants_test;
