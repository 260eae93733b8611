//! Segregated free lists.
//!
//! One intrusive doubly linked list per size class. The links live inside
//! the free blocks themselves (see [`crate::block`]); this struct only owns
//! the heads. Insertion is LIFO at the head, removal is O(1) through the
//! back link.

use crate::block::Block;
use crate::size_class::{NUM_CLASSES, class_of};

pub(crate) struct FreeLists {
  heads: [Option<Block>; NUM_CLASSES],
}

impl FreeLists {
  pub const fn new() -> Self {
    Self {
      heads: [None; NUM_CLASSES],
    }
  }

  pub fn head(
    &self,
    class: usize,
  ) -> Option<Block> {
    self.heads[class]
  }

  pub fn set_head(
    &mut self,
    class: usize,
    head: Option<Block>,
  ) {
    self.heads[class] = head;
  }

  /// Pushes `block` on the head of the list for its current size.
  ///
  /// # Safety
  ///
  /// `block` must be free, carry its final size, and not already be linked.
  pub unsafe fn insert(
    &mut self,
    block: Block,
  ) {
    unsafe {
      let class = class_of(block.size());
      let old_head = self.heads[class];

      block.set_prev_link(None);
      block.set_next_link(old_head);
      if let Some(old_head) = old_head {
        old_head.set_prev_link(Some(block));
      }
      self.heads[class] = Some(block);
    }
  }

  /// Splices `block` out of the list for its current size and clears its
  /// links.
  ///
  /// # Safety
  ///
  /// `block` must be linked in the list matching its current size.
  pub unsafe fn remove(
    &mut self,
    block: Block,
  ) {
    unsafe {
      let class = class_of(block.size());
      let prev = block.prev_link();
      let next = block.next_link();

      match prev {
        Some(prev) => prev.set_next_link(next),
        None => self.heads[class] = next,
      }
      if let Some(next) = next {
        next.set_prev_link(prev);
      }

      block.set_prev_link(None);
      block.set_next_link(None);
    }
  }

  /// First block in `class` whose size is at least `needed`.
  ///
  /// # Safety
  ///
  /// Every list must be well formed.
  pub unsafe fn find_first_fit(
    &self,
    class: usize,
    needed: usize,
  ) -> Option<Block> {
    unsafe { self.iter(class).find(|block| block.size() >= needed) }
  }

  /// # Safety
  ///
  /// Every list must be well formed.
  #[cfg(test)]
  pub unsafe fn contains(
    &self,
    class: usize,
    block: Block,
  ) -> bool {
    unsafe { self.iter(class).any(|member| member == block) }
  }

  /// Forward walk over one list.
  ///
  /// # Safety
  ///
  /// The list must be well formed for as long as the iterator is used.
  pub unsafe fn iter(
    &self,
    class: usize,
  ) -> Iter {
    Iter {
      current: self.heads[class],
    }
  }

  pub fn is_empty(
    &self,
    class: usize,
  ) -> bool {
    self.heads[class].is_none()
  }
}

pub(crate) struct Iter {
  current: Option<Block>,
}

impl Iterator for Iter {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.current?;
    self.current = unsafe { block.next_link() };
    Some(block)
  }
}
