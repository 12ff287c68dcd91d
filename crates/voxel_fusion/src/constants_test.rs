use glam::IVec3;

use super::*;

#[test]
fn test_block_size_is_power_of_two() {
  assert!(BLOCK_SIZE.is_power_of_two());
  assert_eq!(1usize << BLOCK_SHIFT, BLOCK_SIZE);
  assert_eq!(BLOCK_SIZE_CB, 512);
}

#[test]
fn test_local_index_roundtrip() {
  for z in 0..BLOCK_SIZE {
    for y in 0..BLOCK_SIZE {
      for x in 0..BLOCK_SIZE {
        let idx = local_to_index(x, y, z);
        assert_eq!(index_to_local(idx), (x, y, z), "failed for ({x}, {y}, {z})");
      }
    }
  }
}

#[test]
fn test_x_is_minor_axis() {
  assert_eq!(local_to_index(1, 0, 0), 1);
  assert_eq!(local_to_index(0, 1, 0), BLOCK_SIZE);
  assert_eq!(local_to_index(0, 0, 1), BLOCK_SIZE_SQ);
}

/// Negative voxels must floor into the block below, not truncate toward zero.
#[test]
fn test_voxel_to_block_floors_negative() {
  assert_eq!(voxel_to_block(IVec3::new(-1, 0, 7)), IVec3::new(-1, 0, 0));
  assert_eq!(voxel_to_block(IVec3::new(-8, -9, 8)), IVec3::new(-1, -2, 1));
  assert_eq!(voxel_to_local_index(IVec3::new(-1, 0, 0)), local_to_index(7, 0, 0));
}

#[test]
fn test_block_origin_inverts_voxel_to_block() {
  let block = IVec3::new(-3, 2, 5);
  let origin = block_origin(block);
  assert_eq!(voxel_to_block(origin), block);
  assert_eq!(voxel_to_local_index(origin), 0);
}
