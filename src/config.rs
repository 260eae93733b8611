use crate::error::{AllocError, AllocResult};
use crate::size_class::NUM_CLASSES;

/// Blocks laid down per growth call for the batched classes.
pub const DEFAULT_BATCH_BLOCKS: usize = 16;

/// Classes `0..DEFAULT_BATCHED_CLASSES` (32, 64 and 128-byte blocks) grow in
/// batches; everything larger grows one block at a time.
pub const DEFAULT_BATCHED_CLASSES: usize = 3;

/// Default capacity of an [`ArenaGrowth`](crate::ArenaGrowth) region.
pub const DEFAULT_ARENA_CAPACITY: usize = 20 * 1024 * 1024;

/// Growth policy of a [`SegregatedHeap`](crate::SegregatedHeap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  pub batch_blocks: usize,
  pub batched_classes: usize,
}

impl HeapConfig {
  pub fn with_batch_blocks(
    mut self,
    batch_blocks: usize,
  ) -> Self {
    self.batch_blocks = batch_blocks;
    self
  }

  pub fn with_batched_classes(
    mut self,
    batched_classes: usize,
  ) -> Self {
    self.batched_classes = batched_classes;
    self
  }

  /// Number of blocks one growth call lays down for `class`.
  pub fn batch_for(
    &self,
    class: usize,
  ) -> usize {
    if class < self.batched_classes {
      self.batch_blocks
    } else {
      1
    }
  }

  pub fn validate(&self) -> AllocResult<()> {
    if self.batch_blocks == 0 {
      return Err(AllocError::InvalidConfig("batch_blocks must be at least 1"));
    }
    if self.batched_classes > NUM_CLASSES {
      return Err(AllocError::InvalidConfig(
        "batched_classes cannot exceed the number of size classes",
      ));
    }
    Ok(())
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      batch_blocks: DEFAULT_BATCH_BLOCKS,
      batched_classes: DEFAULT_BATCHED_CLASSES,
    }
  }
}
