use crate::growth::HeapGrowth;
use crate::heap::SegregatedHeap;
use crate::size_class::{NUM_CLASSES, class_of};

/// Lifetime event counters, updated on every operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapCounters {
  pub allocations: u64,
  pub deallocations: u64,
  pub reallocations: u64,
  /// Reallocations satisfied by absorbing free neighbours.
  pub grown_in_place: u64,
  /// Reallocations that copied the payload to a new block.
  pub moved: u64,
  pub splits: u64,
  pub merges: u64,
  /// Calls made to the growth provider.
  pub growths: u64,
  pub grown_bytes: u64,
}

/// Point-in-time picture of the heap, built by walking every block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_bytes: usize,
  pub allocated_blocks: usize,
  /// Whole-block bytes, boundary tags included.
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
  pub free_per_class: [usize; NUM_CLASSES],
}

impl HeapStats {
  /// Share of free memory outside the largest free block, in permille.
  /// Zero when nothing is free.
  pub fn fragmentation_permille(&self) -> u16 {
    if self.free_bytes == 0 {
      return 0;
    }
    let scattered = self.free_bytes - self.largest_free;
    ((scattered.saturating_mul(1000)) / self.free_bytes) as u16
  }
}

impl<G: HeapGrowth> SegregatedHeap<G> {
  /// Walks the heap and tallies allocated and free blocks.
  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_bytes: self.heap_size(),
      allocated_blocks: 0,
      allocated_bytes: 0,
      free_blocks: 0,
      free_bytes: 0,
      largest_free: 0,
      free_per_class: [0; NUM_CLASSES],
    };

    unsafe {
      for block in self.walk() {
        let size = block.size();
        if block.is_free() {
          stats.free_blocks += 1;
          stats.free_bytes += size;
          stats.largest_free = stats.largest_free.max(size);
          stats.free_per_class[class_of(size)] += 1;
        } else {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += size;
        }
      }
    }

    stats
  }
}

#[cfg(test)]
mod tests {
  use crate::growth::ArenaGrowth;
  use crate::heap::SegregatedHeap;

  #[test]
  fn test_stats_after_batch_growth() {
    let mut heap = SegregatedHeap::new(ArenaGrowth::new(1 << 16).unwrap()).unwrap();
    heap.allocate(10).unwrap();

    let stats = heap.stats();
    assert_eq!(stats.heap_bytes, 512);
    assert_eq!(stats.allocated_blocks, 1);
    assert_eq!(stats.allocated_bytes, 32);
    assert_eq!(stats.free_blocks, 15);
    assert_eq!(stats.free_bytes, 480);
    assert_eq!(stats.largest_free, 32);
    assert_eq!(stats.free_per_class[0], 15);
    assert_eq!(stats.fragmentation_permille(), 933);
  }

  #[test]
  fn test_counters_track_operations() {
    let mut heap = SegregatedHeap::new(ArenaGrowth::new(1 << 16).unwrap()).unwrap();
    let a = heap.allocate(100).unwrap().unwrap();
    let b = heap.allocate(100).unwrap().unwrap();
    unsafe {
      heap.deallocate(a.as_ptr());
      heap.deallocate(b.as_ptr());
    }

    let counters = heap.counters();
    assert_eq!(counters.allocations, 2);
    assert_eq!(counters.deallocations, 2);
    assert_eq!(counters.growths, 1);
    assert_eq!(counters.grown_bytes, 16 * 128);
    assert!(counters.merges >= 1);
  }

  #[test]
  fn test_empty_heap_stats() {
    let heap = SegregatedHeap::new(ArenaGrowth::new(4096).unwrap()).unwrap();
    let stats = heap.stats();
    assert_eq!(stats.heap_bytes, 0);
    assert_eq!(stats.free_blocks, 0);
    assert_eq!(stats.fragmentation_permille(), 0);
  }
}
