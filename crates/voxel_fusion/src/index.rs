//! Sparse spatial hash from block coordinates to block-store slots.
//!
//! ```text
//!  entries: [ bucket 0 | bucket 1 | ... | bucket N-1 | excess 0 | ... | excess M-1 ]
//!                 │                                        ▲
//!                 └──── offset = k + 1 ────────────────────┘   (chain link)
//! ```
//!
//! A coordinate hashes to one bucket. If the bucket already holds another
//! coordinate, the new entry goes into a free excess slot and is linked from
//! the tail of that bucket's chain. Blocks are never removed during normal
//! operation, so chains only grow.

use glam::IVec3;

use crate::cache::IndexCache;
use crate::config::IndexConfig;
use crate::constants::UNALLOCATED;
use crate::error::{FusionError, FusionResult, Resource};

/// One slot of the hash table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashEntry {
  /// Block coordinate.
  pub pos: IVec3,
  /// Block-store index, or [`UNALLOCATED`].
  pub ptr: i32,
  /// 1-based link into the excess list; 0 terminates the chain.
  pub offset: i32,
}

impl HashEntry {
  pub const EMPTY: Self = Self {
    pos: IVec3::ZERO,
    ptr: UNALLOCATED,
    offset: 0,
  };

  #[inline(always)]
  pub fn is_allocated(&self) -> bool {
    self.ptr >= 0
  }
}

/// Bucket for a block coordinate.
///
/// Product of large primes, xor-folded, masked to the (power of two) table.
#[inline(always)]
pub fn hash_block(pos: IVec3, mask: usize) -> usize {
  let h = (pos.x as u32).wrapping_mul(73_856_093)
    ^ (pos.y as u32).wrapping_mul(19_349_669)
    ^ (pos.z as u32).wrapping_mul(83_492_791);
  h as usize & mask
}

/// Result of [`VoxelBlockHash::insert_with`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Insertion {
  pub ptr: usize,
  /// False when the coordinate was already present.
  pub created: bool,
}

/// Bucket table plus fixed-capacity excess list.
pub struct VoxelBlockHash {
  entries: Vec<HashEntry>,
  bucket_count: usize,
  bucket_mask: usize,
  /// Free excess slots, popped from the back.
  excess_free: Vec<i32>,
  allocated: usize,
}

impl VoxelBlockHash {
  pub fn new(config: &IndexConfig) -> FusionResult<Self> {
    config.validate()?;
    Ok(Self {
      entries: vec![HashEntry::EMPTY; config.bucket_count + config.excess_capacity],
      bucket_count: config.bucket_count,
      bucket_mask: config.bucket_count - 1,
      excess_free: (0..config.excess_capacity as i32).rev().collect(),
      allocated: 0,
    })
  }

  pub fn bucket_count(&self) -> usize {
    self.bucket_count
  }

  pub fn excess_capacity(&self) -> usize {
    self.entries.len() - self.bucket_count
  }

  /// Number of excess slots currently in use.
  pub fn excess_used(&self) -> usize {
    self.excess_capacity() - self.excess_free.len()
  }

  /// Number of allocated entries.
  pub fn len(&self) -> usize {
    self.allocated
  }

  pub fn is_empty(&self) -> bool {
    self.allocated == 0
  }

  #[inline(always)]
  fn excess_index(&self, offset: i32) -> usize {
    self.bucket_count + (offset - 1) as usize
  }

  /// Entry index holding `pos`, or the index of the chain tail on a miss.
  #[inline]
  fn walk(&self, pos: IVec3) -> Result<usize, usize> {
    let mut idx = hash_block(pos, self.bucket_mask);
    loop {
      let entry = &self.entries[idx];
      if entry.is_allocated() && entry.pos == pos {
        return Ok(idx);
      }
      if entry.offset <= 0 {
        return Err(idx);
      }
      idx = self.excess_index(entry.offset);
    }
  }

  /// Cache-less lookup.
  #[inline]
  pub fn find(&self, pos: IVec3) -> Option<usize> {
    self.walk(pos).ok().map(|idx| self.entries[idx].ptr as usize)
  }

  /// Lookup through a traversal cache. `None` means unallocated.
  #[inline]
  pub fn lookup(&self, pos: IVec3, cache: &mut IndexCache) -> Option<usize> {
    if let Some(cached) = cache.cached(pos) {
      return cached;
    }
    let ptr = self.find(pos);
    cache.store(pos, ptr);
    ptr
  }

  /// Return the pointer bound to `pos`, binding a new one from `allocate`
  /// when absent.
  ///
  /// The target slot is reserved before `allocate` runs, so a full excess
  /// list never leaks a block from the store.
  pub fn insert_with<F>(&mut self, pos: IVec3, allocate: F) -> FusionResult<Insertion>
  where
    F: FnOnce() -> FusionResult<usize>,
  {
    let tail = match self.walk(pos) {
      Ok(idx) => {
        return Ok(Insertion {
          ptr: self.entries[idx].ptr as usize,
          created: false,
        })
      }
      Err(tail) => tail,
    };

    if !self.entries[tail].is_allocated() {
      // Only a never-used bucket can be unallocated at a chain tail.
      let ptr = allocate()?;
      self.entries[tail] = HashEntry {
        pos,
        ptr: ptr as i32,
        offset: 0,
      };
      self.allocated += 1;
      return Ok(Insertion { ptr, created: true });
    }

    let Some(&slot) = self.excess_free.last() else {
      return Err(FusionError::ResourceExhausted {
        resource: Resource::ExcessList,
        capacity: self.excess_capacity(),
        block: pos,
      });
    };
    let ptr = allocate()?;
    self.excess_free.pop();
    let excess_idx = self.bucket_count + slot as usize;
    self.entries[excess_idx] = HashEntry {
      pos,
      ptr: ptr as i32,
      offset: 0,
    };
    self.entries[tail].offset = slot + 1;
    self.allocated += 1;
    Ok(Insertion { ptr, created: true })
  }

  /// Allocated entries in table order.
  pub fn entries(&self) -> impl Iterator<Item = &HashEntry> {
    self.entries.iter().filter(|e| e.is_allocated())
  }

  /// Drop every entry and return all excess slots to the free list.
  pub fn clear(&mut self) {
    self.entries.fill(HashEntry::EMPTY);
    self.excess_free = (0..self.excess_capacity() as i32).rev().collect();
    self.allocated = 0;
  }
}

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;
