//! Boundary-tag block codec.
//!
//! ```text
//!   allocated:  [ header | payload ...................... | footer ]
//!   free:       [ header | prev link | ...unused... | next link | footer ]
//!                 8 B      8 B                        8 B         8 B
//! ```
//!
//! Header and footer hold the same word: the whole block size with the tag in
//! the low bits. Bit 0 is the allocation flag. Bit 1 marks a free block that
//! came straight out of a growth batch and has never been coalesced.
//!
//! Nothing here checks bounds. Callers hand in header addresses that lie
//! inside the heap and sizes that were previously written by [`Block::set`].

use std::ptr::NonNull;

/// Width of one header, footer or link word.
pub const WORD: usize = 8;

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WORD;

/// Header + prev link + next link + footer.
pub const MIN_BLOCK_SIZE: usize = 4 * WORD;

const ALLOCATED_BIT: u64 = 0b01;
const FRESH_BIT: u64 = 0b10;
const TAG_MASK: u64 = 0b1111;

/// Allocation state carried in a block's boundary tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
  Free,
  Allocated,
  /// Free, laid down by heap growth and not yet merged with anything.
  Fresh,
}

impl Tag {
  fn bits(self) -> u64 {
    match self {
      Tag::Free => 0,
      Tag::Allocated => ALLOCATED_BIT,
      Tag::Fresh => FRESH_BIT,
    }
  }

  fn from_word(word: u64) -> Self {
    if word & ALLOCATED_BIT != 0 {
      Tag::Allocated
    } else if word & FRESH_BIT != 0 {
      Tag::Fresh
    } else {
      Tag::Free
    }
  }

  pub fn is_free(self) -> bool {
    !matches!(self, Tag::Allocated)
  }
}

/// Packs a block size and tag into one boundary word.
pub fn encode(
  size: usize,
  tag: Tag,
) -> u64 {
  (size as u64 & !TAG_MASK) | tag.bits()
}

/// Size stored in a boundary word.
pub fn decode_size(word: u64) -> usize {
  (word & !TAG_MASK) as usize
}

/// Tag stored in a boundary word.
pub fn decode_tag(word: u64) -> Tag {
  Tag::from_word(word)
}

/// Handle on a block, identified by the address of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(NonNull<u8>);

impl Block {
  /// # Safety
  ///
  /// `header` must be non-null and point at a block header inside the heap.
  pub unsafe fn from_header(header: *mut u8) -> Self {
    Self(unsafe { NonNull::new_unchecked(header) })
  }

  /// Recovers the block that owns `payload`.
  ///
  /// # Safety
  ///
  /// `payload` must be a pointer previously returned by the heap.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    Self(unsafe { payload.sub(WORD) })
  }

  /// Decodes a stored link word (`0` means none).
  ///
  /// # Safety
  ///
  /// A non-zero `addr` must be the header address of a block in the heap.
  unsafe fn from_link(addr: u64) -> Option<Self> {
    NonNull::new(addr as usize as *mut u8).map(Self)
  }

  pub fn header(self) -> *mut u8 {
    self.0.as_ptr()
  }

  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  pub fn payload(self) -> NonNull<u8> {
    unsafe { self.0.add(WORD) }
  }

  /// # Safety
  ///
  /// The header must hold a valid boundary word.
  pub unsafe fn header_word(self) -> u64 {
    unsafe { self.0.as_ptr().cast::<u64>().read() }
  }

  /// Word stored at the footer position implied by the header's size.
  ///
  /// # Safety
  ///
  /// The header size must keep the footer inside the heap.
  pub unsafe fn footer_word(self) -> u64 {
    unsafe {
      let size = self.size();
      self.0.as_ptr().add(size - WORD).cast::<u64>().read()
    }
  }

  /// # Safety
  ///
  /// The header must hold a valid boundary word.
  pub unsafe fn size(self) -> usize {
    unsafe { decode_size(self.header_word()) }
  }

  /// # Safety
  ///
  /// The header must hold a valid boundary word.
  pub unsafe fn tag(self) -> Tag {
    unsafe { decode_tag(self.header_word()) }
  }

  /// # Safety
  ///
  /// The header must hold a valid boundary word.
  pub unsafe fn is_free(self) -> bool {
    unsafe { self.tag().is_free() }
  }

  /// Payload bytes available to the caller.
  ///
  /// # Safety
  ///
  /// The header must hold a valid boundary word.
  pub unsafe fn capacity(self) -> usize {
    unsafe { self.size() - OVERHEAD }
  }

  /// Writes identical header and footer words.
  ///
  /// # Safety
  ///
  /// `[header, header + size)` must lie inside the heap. The next link moves
  /// with the size, so a resized free block needs its next link rewritten.
  pub unsafe fn set(
    self,
    size: usize,
    tag: Tag,
  ) {
    unsafe {
      let word = encode(size, tag);
      let base = self.0.as_ptr();
      base.cast::<u64>().write(word);
      base.add(size - WORD).cast::<u64>().write(word);
    }
  }

  /// Previous block in the same free list, `None` at the head.
  ///
  /// # Safety
  ///
  /// The block must be free and linked.
  pub unsafe fn prev_link(self) -> Option<Block> {
    unsafe { Self::from_link(self.0.as_ptr().add(WORD).cast::<u64>().read()) }
  }

  /// # Safety
  ///
  /// The block must be at least [`MIN_BLOCK_SIZE`] bytes.
  pub unsafe fn set_prev_link(
    self,
    prev: Option<Block>,
  ) {
    unsafe {
      let word = prev.map_or(0, |b| b.addr() as u64);
      self.0.as_ptr().add(WORD).cast::<u64>().write(word);
    }
  }

  /// Next block in the same free list, `None` at the tail. Read at
  /// `size - 16`, so the header must carry the current size.
  ///
  /// # Safety
  ///
  /// The block must be free and linked.
  pub unsafe fn next_link(self) -> Option<Block> {
    unsafe {
      let at = self.0.as_ptr().add(self.size() - OVERHEAD);
      Self::from_link(at.cast::<u64>().read())
    }
  }

  /// # Safety
  ///
  /// The header must carry the block's current size.
  pub unsafe fn set_next_link(
    self,
    next: Option<Block>,
  ) {
    unsafe {
      let word = next.map_or(0, |b| b.addr() as u64);
      let at = self.0.as_ptr().add(self.size() - OVERHEAD);
      at.cast::<u64>().write(word);
    }
  }

  /// Address one past this block, i.e. the header of the physical successor
  /// when there is one.
  ///
  /// # Safety
  ///
  /// The header must hold a valid boundary word.
  pub unsafe fn next_physical(self) -> *mut u8 {
    unsafe { self.0.as_ptr().add(self.size()) }
  }

  /// Footer word of the physical predecessor.
  ///
  /// # Safety
  ///
  /// The block must not be the first block in the heap.
  pub unsafe fn prev_footer_word(self) -> u64 {
    unsafe { self.0.as_ptr().sub(WORD).cast::<u64>().read() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(C, align(16))]
  struct Scratch([u8; 256]);

  fn scratch_block(scratch: &mut Scratch) -> Block {
    unsafe { Block::from_header(scratch.0.as_mut_ptr().add(8)) }
  }

  #[test]
  fn test_encode_decode() {
    let word = encode(48, Tag::Allocated);
    assert_eq!(word, 49);
    assert_eq!(decode_size(word), 48);
    assert_eq!(decode_tag(word), Tag::Allocated);

    assert_eq!(decode_tag(encode(32, Tag::Free)), Tag::Free);
    assert_eq!(decode_tag(encode(32, Tag::Fresh)), Tag::Fresh);
    assert_eq!(decode_size(encode(32, Tag::Fresh)), 32);
  }

  #[test]
  fn test_set_writes_header_and_footer() {
    let mut scratch = Scratch([0; 256]);
    let block = scratch_block(&mut scratch);

    unsafe {
      block.set(64, Tag::Allocated);

      assert_eq!(block.size(), 64);
      assert_eq!(block.tag(), Tag::Allocated);
      assert_eq!(block.header_word(), block.footer_word());
      assert_eq!(block.capacity(), 48);
      assert_eq!(block.next_physical(), block.header().add(64));
    }
  }

  #[test]
  fn test_payload_is_aligned() {
    let mut scratch = Scratch([0; 256]);
    let block = scratch_block(&mut scratch);

    assert_eq!(block.payload().as_ptr() as usize % 16, 0);
    assert_eq!(unsafe { Block::from_payload(block.payload()) }, block);
  }

  #[test]
  fn test_links_follow_size() {
    let mut scratch = Scratch([0; 256]);
    let base = scratch.0.as_mut_ptr();
    let block = unsafe { Block::from_header(base.add(8)) };
    let other = unsafe { Block::from_header(base.add(200)) };

    unsafe {
      block.set(32, Tag::Free);
      block.set_prev_link(None);
      block.set_next_link(Some(other));

      assert_eq!(block.prev_link(), None);
      assert_eq!(block.next_link(), Some(other));

      // Growing the block moves the next link to the new tail.
      block.set(96, Tag::Free);
      block.set_next_link(None);
      block.set_prev_link(Some(other));

      assert_eq!(block.next_link(), None);
      assert_eq!(block.prev_link(), Some(other));
    }
  }
}
