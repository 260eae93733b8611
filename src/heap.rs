use std::ptr::{self, NonNull};

use tracing::{debug, error, trace, warn};

use crate::align::ALIGNMENT;
use crate::block::{Block, MIN_BLOCK_SIZE, OVERHEAD, Tag, WORD, decode_size, decode_tag};
use crate::config::HeapConfig;
use crate::error::{AllocError, AllocResult};
use crate::free_list::FreeLists;
use crate::growth::HeapGrowth;
use crate::size_class::{NUM_CLASSES, block_size_for, class_block_size, class_of};
use crate::stats::HeapCounters;

/// Segregated-fit heap over a single contiguous region.
///
/// All state lives in this value: the free-list heads, the heap start and the
/// growth provider that knows where the heap ends. Nothing is global, so
/// several heaps can coexist as long as their providers do not overlap.
///
/// The heap is not synchronised. Share it across threads only behind a lock
/// that covers every call.
pub struct SegregatedHeap<G: HeapGrowth> {
  growth: G,
  lists: FreeLists,
  /// Header address of the first block.
  start: *mut u8,
  config: HeapConfig,
  counters: HeapCounters,
}

unsafe impl<G: HeapGrowth + Send> Send for SegregatedHeap<G> {}

impl<G: HeapGrowth> SegregatedHeap<G> {
  pub fn new(growth: G) -> AllocResult<Self> {
    Self::with_config(growth, HeapConfig::default())
  }

  /// Builds a heap on top of `growth`, padding the current break so that the
  /// first header sits 8 bytes below a 16-byte boundary. Block sizes are
  /// multiples of 16, which keeps every later payload aligned too.
  pub fn with_config(
    mut growth: G,
    config: HeapConfig,
  ) -> AllocResult<Self> {
    config.validate()?;

    let end = growth.heap_end() as usize;
    let pad = WORD.wrapping_sub(end) & (ALIGNMENT - 1);
    if pad > 0 {
      growth.grow(pad)?;
    }
    let start = growth.heap_end();
    debug!(start = ?start, pad, "heap initialised");

    Ok(Self {
      growth,
      lists: FreeLists::new(),
      start,
      config,
      counters: HeapCounters::default(),
    })
  }

  /// Allocates a payload of at least `size` bytes, 16-byte aligned.
  ///
  /// `Ok(None)` for a zero-byte request.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> AllocResult<Option<NonNull<u8>>> {
    if size == 0 {
      trace!("zero-byte allocation ignored");
      return Ok(None);
    }
    self.allocate_block(size).map(Some)
  }

  /// Allocates `count * size` zeroed bytes.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> AllocResult<Option<NonNull<u8>>> {
    let total = count
      .checked_mul(size)
      .ok_or(AllocError::RequestTooLarge { requested: usize::MAX })?;

    let payload = self.allocate(total)?;
    if let Some(payload) = payload {
      unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };
    }
    Ok(payload)
  }

  /// Returns a block to the heap. Null is a no-op.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer obtained from this heap.
  pub unsafe fn deallocate(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(payload) = NonNull::new(ptr) else {
      trace!("null deallocation ignored");
      return;
    };

    unsafe {
      let block = Block::from_payload(payload);
      trace!(block = ?block.header(), size = block.size(), "deallocate");
      self.release(block);
    }
    self.counters.deallocations += 1;
  }

  /// Resizes the allocation at `ptr` to hold `size` bytes.
  ///
  /// Null `ptr` allocates, zero `size` frees and yields `Ok(None)`. Shrinking
  /// keeps the block as is. Growing first tries to absorb free physical
  /// neighbours; failing that, the payload moves to a fresh block. On error the
  /// original allocation is left untouched.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer obtained from this heap. After a
  /// successful call only the returned pointer may be used.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> AllocResult<Option<NonNull<u8>>> {
    let Some(payload) = NonNull::new(ptr) else {
      return self.allocate(size);
    };
    if size == 0 {
      unsafe { self.deallocate(ptr) };
      return Ok(None);
    }
    self.counters.reallocations += 1;

    unsafe {
      let block = Block::from_payload(payload);
      let capacity = block.capacity();

      if size <= capacity {
        trace!(block = ?block.header(), capacity, size, "reallocate kept in place");
        return Ok(Some(payload));
      }

      let spare: usize = self
        .mergeable_neighbours(block)
        .into_iter()
        .flatten()
        .map(|b| b.size())
        .sum();
      if block.size() + spare - OVERHEAD >= size {
        let merged = self.coalesce(block);
        merged.set(merged.size(), Tag::Allocated);

        let moved = merged.payload();
        ptr::copy(payload.as_ptr(), moved.as_ptr(), capacity);
        self.counters.grown_in_place += 1;
        trace!(
          block = ?merged.header(),
          size = merged.size(),
          "reallocate grew into free neighbours"
        );
        return Ok(Some(moved));
      }

      let fresh = self.allocate_block(size)?;
      ptr::copy_nonoverlapping(payload.as_ptr(), fresh.as_ptr(), capacity);
      self.release(block);
      self.counters.moved += 1;
      trace!(from = ?payload, to = ?fresh, copied = capacity, "reallocate moved");
      Ok(Some(fresh))
    }
  }

  /// Payload bytes usable at `ptr`, 0 for null.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer obtained from this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    match NonNull::new(ptr) {
      Some(payload) => unsafe { Block::from_payload(payload).capacity() },
      None => 0,
    }
  }

  /// Header address of the first block.
  pub fn heap_start(&self) -> *mut u8 {
    self.start
  }

  /// One past the last heap byte.
  pub fn heap_end(&self) -> *mut u8 {
    self.growth.heap_end()
  }

  pub fn heap_size(&self) -> usize {
    self.heap_end() as usize - self.start as usize
  }

  /// Number of blocks registered in the free list of `class`, `None` for a
  /// class that does not exist.
  pub fn free_list_len(
    &self,
    class: usize,
  ) -> Option<usize> {
    if class >= NUM_CLASSES {
      return None;
    }
    Some(unsafe { self.lists.iter(class).count() })
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn counters(&self) -> HeapCounters {
    self.counters
  }

  pub fn growth(&self) -> &G {
    &self.growth
  }

  pub(crate) fn lists(&self) -> &FreeLists {
    &self.lists
  }

  /// Physical walk over every block from the heap start.
  ///
  /// # Safety
  ///
  /// Block sizes must be intact; the walk trusts every header it reads.
  pub(crate) unsafe fn walk(&self) -> Walk {
    Walk {
      current: self.start,
      end: self.heap_end(),
    }
  }

  fn allocate_block(
    &mut self,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    let needed = block_size_for(size).ok_or(AllocError::RequestTooLarge { requested: size })?;
    let class = class_of(needed);

    let payload = unsafe {
      match self.find_fit(class, needed) {
        Some(block) => {
          trace!(size, class, block = ?block.header(), "fit found");
          self.place(block, needed)
        }
        None => {
          if let Err(err) = self.extend(class, needed) {
            warn!(size, class, %err, "allocation failed");
            return Err(err);
          }
          let Some(block) = self.lists.find_first_fit(class, needed) else {
            error!(class, needed, "no fit right after heap growth");
            return Err(AllocError::InvariantViolation { class, needed });
          };
          trace!(size, class, block = ?block.header(), "fit found after growth");
          self.place(block, needed)
        }
      }
    };

    self.counters.allocations += 1;
    Ok(payload)
  }

  /// Scans `class` and every larger class for a block of `needed` bytes.
  unsafe fn find_fit(
    &self,
    class: usize,
    needed: usize,
  ) -> Option<Block> {
    unsafe {
      (class..NUM_CLASSES)
        .filter(|&c| !self.lists.is_empty(c))
        .find_map(|c| self.lists.find_first_fit(c, needed))
    }
  }

  /// Takes `block` off its list and marks `needed` bytes of it allocated.
  /// A leftover of at least [`MIN_BLOCK_SIZE`] is split off and released.
  unsafe fn place(
    &mut self,
    block: Block,
    needed: usize,
  ) -> NonNull<u8> {
    unsafe {
      let size = block.size();
      self.lists.remove(block);

      if size - needed >= MIN_BLOCK_SIZE {
        block.set(needed, Tag::Allocated);

        let remainder = Block::from_header(block.header().add(needed));
        remainder.set(size - needed, Tag::Allocated);
        self.counters.splits += 1;
        self.release(remainder);
      } else {
        block.set(size, Tag::Allocated);
      }

      block.payload()
    }
  }

  /// Lays down a growth batch for `class` and pushes it in front of the
  /// class's existing list.
  ///
  /// The three smallest classes grow [`HeapConfig::batch_blocks`] blocks at a
  /// time; larger ones grow a single block. Class 14 grows a block of
  /// `needed` bytes when that exceeds its nominal size.
  unsafe fn extend(
    &mut self,
    class: usize,
    needed: usize,
  ) -> AllocResult<()> {
    let batch = self.config.batch_for(class);
    let block_size = class_block_size(class).max(needed);
    let bytes = batch
      .checked_mul(block_size)
      .ok_or(AllocError::RequestTooLarge { requested: needed })?;

    let region = self.growth.grow(bytes)?;
    self.counters.growths += 1;
    self.counters.grown_bytes += bytes as u64;

    unsafe {
      let base = region.as_ptr();
      let old_head = self.lists.head(class);
      let mut prev = None;

      for i in 0..batch {
        let block = Block::from_header(base.add(i * block_size));
        let next = if i + 1 < batch {
          Some(Block::from_header(base.add((i + 1) * block_size)))
        } else {
          old_head
        };

        block.set(block_size, Tag::Fresh);
        block.set_prev_link(prev);
        block.set_next_link(next);
        prev = Some(block);
      }

      if let Some(old_head) = old_head {
        old_head.set_prev_link(prev);
      }
      self.lists.set_head(class, Some(Block::from_header(base)));
    }

    debug!(
      class,
      batch,
      block_size,
      bytes,
      high_water_mark = ?self.growth.high_water_mark(),
      "heap grown"
    );
    Ok(())
  }

  /// Coalesces `block` with its free neighbours and registers the result.
  unsafe fn release(
    &mut self,
    block: Block,
  ) {
    unsafe {
      let merged = self.coalesce(block);
      merged.set(merged.size(), Tag::Free);
      self.lists.insert(merged);
    }
  }

  /// Merges `block` with every block [`mergeable_neighbours`] reports.
  ///
  /// Absorbed neighbours leave their lists. The result is tagged free when a
  /// merge happened but is not registered anywhere; the caller decides
  /// whether it goes on a list or back to the user.
  ///
  /// [`mergeable_neighbours`]: Self::mergeable_neighbours
  unsafe fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    unsafe {
      let neighbours = self.mergeable_neighbours(block);
      if neighbours.iter().all(Option::is_none) {
        return block;
      }

      let first = neighbours[0].or(neighbours[1]).unwrap_or(block);
      let mut total = block.size();
      for neighbour in neighbours.into_iter().flatten() {
        self.lists.remove(neighbour);
        total += neighbour.size();
      }

      first.set(total, Tag::Free);
      self.counters.merges += 1;
      first
    }
  }

  /// Free blocks that coalescing `block` absorbs, in address order: the free
  /// physical neighbours and, behind a fresh neighbour, the settled free
  /// block it may hide.
  ///
  /// Two settled free blocks are never adjacent, so the walk stops there.
  unsafe fn mergeable_neighbours(
    &self,
    block: Block,
  ) -> [Option<Block>; 4] {
    unsafe {
      let prev = self.free_predecessor(block);
      let before = match prev {
        Some(prev) if prev.tag() == Tag::Fresh => self.free_predecessor(prev),
        _ => None,
      };
      let next = self.free_successor(block);
      let after = match next {
        Some(next) if next.tag() == Tag::Fresh => self.free_successor(next),
        _ => None,
      };

      let settled = |b: Option<Block>| b.filter(|b| b.tag() == Tag::Free);
      [settled(before), prev, next, settled(after)]
    }
  }

  /// Physical predecessor of `block` if it is free. The heap start has no
  /// predecessor, which reads as allocated.
  unsafe fn free_predecessor(
    &self,
    block: Block,
  ) -> Option<Block> {
    if block.header() == self.start {
      return None;
    }
    unsafe {
      let footer = block.prev_footer_word();
      if decode_tag(footer).is_free() {
        Some(Block::from_header(block.header().sub(decode_size(footer))))
      } else {
        None
      }
    }
  }

  /// Physical successor of `block` if it is free. Past the high-water mark
  /// reads as allocated.
  unsafe fn free_successor(
    &self,
    block: Block,
  ) -> Option<Block> {
    unsafe {
      let next = block.next_physical();
      if next >= self.heap_end() {
        return None;
      }
      let next = Block::from_header(next);
      if next.is_free() { Some(next) } else { None }
    }
  }
}

/// Iterator behind [`SegregatedHeap::walk`].
pub(crate) struct Walk {
  current: *mut u8,
  end: *mut u8,
}

impl Iterator for Walk {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if self.current >= self.end {
      return None;
    }
    unsafe {
      let block = Block::from_header(self.current);
      self.current = block.next_physical();
      Some(block)
    }
  }
}
