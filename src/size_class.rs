//! Size classes for the segregated free lists.
//!
//! Class 0 holds 32-byte blocks only. Class `i` for `i` in `1..15` holds
//! blocks in `(2^(i+4), 2^(i+5)]`, so the boundaries run 64, 128, 256, ...,
//! 524288. Class 14 also takes everything above 524288: merged blocks can
//! outgrow the last boundary and still need a home.

use crate::align::align_up;
use crate::block::{MIN_BLOCK_SIZE, OVERHEAD};

/// Number of free-list buckets.
pub const NUM_CLASSES: usize = 15;

/// Upper boundary of the last class.
pub const LARGEST_CLASS_SIZE: usize = class_block_size(NUM_CLASSES - 1);

/// Bucket index for a block of `size` bytes (`size >= 32`).
pub fn class_of(size: usize) -> usize {
  debug_assert!(size >= MIN_BLOCK_SIZE);
  if size <= MIN_BLOCK_SIZE {
    return 0;
  }
  let bits = usize::BITS - (size - 1).leading_zeros();
  // 33..=64 -> 6 bits -> class 1
  ((bits as usize).saturating_sub(5)).min(NUM_CLASSES - 1)
}

/// Largest block size belonging to `class`; also the size of the blocks heap
/// growth lays down for that class.
pub const fn class_block_size(class: usize) -> usize {
  1 << (class + 5)
}

/// Whole-block size needed to serve a `request`-byte payload: the payload
/// rounded up to 16 bytes plus header and footer.
pub fn block_size_for(request: usize) -> Option<usize> {
  align_up(request)?.checked_add(OVERHEAD)
}
