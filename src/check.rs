//! Heap consistency checker.
//!
//! Walks every free list and then the whole heap, stopping at the first
//! broken invariant. Diagnostic only; no allocation path calls it.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::block::{Block, MIN_BLOCK_SIZE, Tag, WORD, decode_size, decode_tag};
use crate::growth::HeapGrowth;
use crate::heap::SegregatedHeap;
use crate::size_class::{NUM_CLASSES, class_of};

/// First invariant violation found by [`SegregatedHeap::verify`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
  #[error("free list {class}: link to {addr:#x} points outside the heap")]
  LinkOutOfBounds { class: usize, addr: usize },

  #[error("free list {class}: block {addr:#x} is marked allocated")]
  AllocatedInFreeList { class: usize, addr: usize },

  #[error("free list {class}: block {addr:#x} of {size} bytes belongs to class {expected}")]
  WrongClass {
    class: usize,
    addr: usize,
    size: usize,
    expected: usize,
  },

  #[error("free list {class}: forward walk does not terminate")]
  Cycle { class: usize },

  #[error("free list {class}: backward walk from the tail does not return to the head")]
  BrokenBackLinks { class: usize },

  #[error("block {addr:#x}: size {size} is not a multiple of 16 of at least 32 bytes")]
  BadSize { addr: usize, size: usize },

  #[error("block {addr:#x}: {size} bytes run past the end of the heap")]
  BlockOutOfBounds { addr: usize, size: usize },

  #[error("block {addr:#x}: header {header:#x} and footer {footer:#x} disagree")]
  TagMismatch { addr: usize, header: u64, footer: u64 },

  #[error("blocks {first:#x} and {second:#x} are adjacent and both free")]
  UncoalescedNeighbours { first: usize, second: usize },

  #[error("free block {addr:#x} is not in free list {class}")]
  NotRegistered { addr: usize, class: usize },

  #[error("free lists hold {listed} blocks but the heap has {found} free blocks")]
  RegistrationMismatch { listed: usize, found: usize },
}

impl<G: HeapGrowth> SegregatedHeap<G> {
  /// Pass/fail verdict over all heap invariants.
  pub fn check(&self) -> bool {
    match self.verify() {
      Ok(()) => true,
      Err(violation) => {
        warn!(%violation, "heap check failed");
        false
      }
    }
  }

  /// Checks every invariant and reports the first one that does not hold.
  ///
  /// Free lists first: each member must be in bounds, free and of the list's
  /// class, and walking the back links from the tail must land on the head.
  /// Then the heap, block by block: sane size, matching header and footer, no
  /// two adjacent free blocks (unless one is fresh from growth), and every
  /// free block registered in the list for its size.
  pub fn verify(&self) -> Result<(), Violation> {
    let start = self.heap_start() as usize;
    let end = self.heap_end() as usize;
    let in_bounds = |addr: usize| {
      addr >= start && addr.checked_add(MIN_BLOCK_SIZE).is_some_and(|last| last <= end)
    };
    // More nodes than this cannot fit in the heap.
    let max_nodes = (end - start) / MIN_BLOCK_SIZE;

    let mut listed: HashMap<usize, usize> = HashMap::new();

    for class in 0..NUM_CLASSES {
      let Some(head) = self.lists().head(class) else {
        continue;
      };
      if !in_bounds(head.addr()) {
        return Err(Violation::LinkOutOfBounds {
          class,
          addr: head.addr(),
        });
      }

      let mut tail = head;
      let mut count = 1;
      unsafe {
        loop {
          Self::verify_member(class, tail)?;
          listed.insert(tail.addr(), class);

          let Some(next) = tail.next_link() else {
            break;
          };
          if !in_bounds(next.addr()) {
            return Err(Violation::LinkOutOfBounds {
              class,
              addr: next.addr(),
            });
          }
          count += 1;
          if count > max_nodes {
            return Err(Violation::Cycle { class });
          }
          tail = next;
        }

        let mut cursor = tail;
        for _ in 1..count {
          match cursor.prev_link() {
            Some(prev) if in_bounds(prev.addr()) => cursor = prev,
            _ => return Err(Violation::BrokenBackLinks { class }),
          }
        }
        if cursor != head || cursor.prev_link().is_some() {
          return Err(Violation::BrokenBackLinks { class });
        }
      }
    }

    let mut found = 0;
    let mut prev_free: Option<(usize, Tag)> = None;
    let mut addr = start;

    while addr < end {
      unsafe {
        let block = Block::from_header(addr as *mut u8);
        let header = block.header_word();
        let size = decode_size(header);

        if size < MIN_BLOCK_SIZE || size % 16 != 0 {
          return Err(Violation::BadSize { addr, size });
        }
        if size > end - addr {
          return Err(Violation::BlockOutOfBounds { addr, size });
        }

        let footer = (addr as *const u8).add(size - WORD).cast::<u64>().read();
        if header != footer {
          return Err(Violation::TagMismatch {
            addr,
            header,
            footer,
          });
        }

        let tag = decode_tag(header);
        if tag.is_free() {
          found += 1;
          if let Some((first, prev_tag)) = prev_free {
            if prev_tag != Tag::Fresh && tag != Tag::Fresh {
              return Err(Violation::UncoalescedNeighbours { first, second: addr });
            }
          }

          let class = class_of(size);
          if listed.get(&addr) != Some(&class) {
            return Err(Violation::NotRegistered { addr, class });
          }
          prev_free = Some((addr, tag));
        } else {
          prev_free = None;
        }

        addr += size;
      }
    }

    if listed.len() != found {
      return Err(Violation::RegistrationMismatch {
        listed: listed.len(),
        found,
      });
    }
    Ok(())
  }

  unsafe fn verify_member(
    class: usize,
    block: Block,
  ) -> Result<(), Violation> {
    unsafe {
      let addr = block.addr();
      if !block.is_free() {
        return Err(Violation::AllocatedInFreeList { class, addr });
      }
      let size = block.size();
      if size < MIN_BLOCK_SIZE || size % 16 != 0 {
        return Err(Violation::BadSize { addr, size });
      }
      let expected = class_of(size);
      if expected != class {
        return Err(Violation::WrongClass {
          class,
          addr,
          size,
          expected,
        });
      }
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::encode;
  use crate::growth::ArenaGrowth;

  fn heap() -> SegregatedHeap<ArenaGrowth> {
    SegregatedHeap::new(ArenaGrowth::new(1 << 16).unwrap()).unwrap()
  }

  #[test]
  fn test_empty_heap_passes() {
    assert!(heap().check());
  }

  #[test]
  fn test_fresh_batch_passes() {
    let mut heap = heap();
    heap.allocate(10).unwrap();
    assert_eq!(heap.verify(), Ok(()));
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut heap = heap();
    let ptr = heap.allocate(1000).unwrap().unwrap();

    unsafe {
      // Clobber the footer of the allocated block.
      let footer = ptr.as_ptr().add(1000 + 8);
      footer.cast::<u64>().write(encode(1024, Tag::Free));
    }

    assert!(matches!(
      heap.verify(),
      Err(Violation::TagMismatch { .. })
    ));
    assert!(!heap.check());
  }

  #[test]
  fn test_detects_free_block_missing_from_list() {
    let mut heap = heap();
    let ptr = heap.allocate(1000).unwrap().unwrap();
    heap.allocate(1000).unwrap();

    unsafe {
      let block = Block::from_payload(ptr);
      block.set(1024, Tag::Free);
    }

    assert_eq!(
      heap.verify(),
      Err(Violation::NotRegistered {
        addr: heap.heap_start() as usize,
        class: 5,
      })
    );
  }

  #[test]
  fn test_detects_uncoalesced_neighbours() {
    let mut heap = heap();
    let a = heap.allocate(1000).unwrap().unwrap();
    let b = heap.allocate(1000).unwrap().unwrap();
    heap.allocate(1000).unwrap();

    unsafe {
      heap.deallocate(a.as_ptr());
      // Mark b free behind the allocator's back.
      Block::from_payload(b).set(1024, Tag::Free);
    }

    assert!(matches!(
      heap.verify(),
      Err(Violation::UncoalescedNeighbours { .. })
    ));
  }

  #[test]
  fn test_detects_allocated_block_in_list() {
    let mut heap = heap();
    let a = heap.allocate(1000).unwrap().unwrap();
    heap.allocate(1000).unwrap();
    unsafe {
      heap.deallocate(a.as_ptr());
      Block::from_payload(a).set(1024, Tag::Allocated);
    }

    assert_eq!(
      heap.verify(),
      Err(Violation::AllocatedInFreeList {
        class: 5,
        addr: heap.heap_start() as usize,
      })
    );
  }

  #[test]
  fn test_detects_broken_back_link() {
    let mut heap = heap();
    heap.allocate(10).unwrap();

    unsafe {
      let head = heap.lists().head(0).unwrap();
      let second = head.next_link().unwrap();
      second.set_prev_link(None);
    }

    assert_eq!(
      heap.verify(),
      Err(Violation::BrokenBackLinks { class: 0 })
    );
  }

  #[test]
  fn test_link_near_address_space_end_is_out_of_bounds() {
    let mut heap = heap();
    heap.allocate(10).unwrap();

    unsafe {
      let head = heap.lists().head(0).unwrap();
      let bogus = Block::from_header((usize::MAX - 8) as *mut u8);
      head.set_next_link(Some(bogus));
    }

    assert_eq!(
      heap.verify(),
      Err(Violation::LinkOutOfBounds {
        class: 0,
        addr: usize::MAX - 8,
      })
    );
  }

  #[test]
  fn test_detects_link_out_of_bounds() {
    let mut heap = heap();
    heap.allocate(10).unwrap();

    unsafe {
      let head = heap.lists().head(0).unwrap();
      let bogus = Block::from_header(heap.heap_end().add(64));
      head.set_next_link(Some(bogus));
    }

    assert!(matches!(
      heap.verify(),
      Err(Violation::LinkOutOfBounds { class: 0, .. })
    ));
  }
}
