//! Heap growth providers.
//!
//! The heap only ever asks two things of the memory underneath it: "give me
//! `n` more bytes right after the ones you already gave me" and "where does
//! the heap currently end". [`HeapGrowth`] captures exactly that.
//!
//! ```text
//!   ArenaGrowth:  one private region reserved up front, bumped forward
//!
//!   base                      break                         base + capacity
//!   ├─────────── used ───────────┼────────── remaining ──────────┤
//!
//!   SbrkGrowth:  the process data segment, moved with sbrk(2)
//! ```

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::config::DEFAULT_ARENA_CAPACITY;
use crate::error::GrowthError;

/// Source of fresh, contiguous heap memory.
///
/// # Safety
///
/// Every region returned by [`grow`](HeapGrowth::grow) must be valid for
/// reads and writes, start exactly where the previous one ended, stay owned
/// by the caller for the provider's lifetime, and be aligned to at least 8
/// bytes. [`high_water_mark`](HeapGrowth::high_water_mark) must return the
/// last byte handed out so far (one before the first region when nothing has
/// been handed out).
pub unsafe trait HeapGrowth {
  /// Extends the heap by exactly `bytes` and returns the start of the new
  /// region.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, GrowthError>;

  /// Address of the last valid heap byte.
  fn high_water_mark(&self) -> *mut u8;

  /// One past the last valid heap byte.
  fn heap_end(&self) -> *mut u8 {
    self.high_water_mark().wrapping_add(1)
  }
}

unsafe impl<G: HeapGrowth + ?Sized> HeapGrowth for &mut G {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, GrowthError> {
    (**self).grow(bytes)
  }

  fn high_water_mark(&self) -> *mut u8 {
    (**self).high_water_mark()
  }
}

/// Fixed-capacity private region.
///
/// Each arena is independent, so any number of heaps can live side by side
/// (one per test, for instance). Growth past the capacity fails with
/// [`GrowthError::Exhausted`].
pub struct ArenaGrowth {
  base: NonNull<u8>,
  layout: Layout,
  used: usize,
}

// The arena exclusively owns its region.
unsafe impl Send for ArenaGrowth {}

impl ArenaGrowth {
  pub fn new(capacity: usize) -> Result<Self, GrowthError> {
    let reserve = GrowthError::Exhausted {
      requested: capacity,
      available: 0,
    };
    let layout = Layout::from_size_align(capacity.max(16), 16).map_err(|_| reserve)?;
    let base = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or(reserve)?;

    Ok(Self {
      base,
      layout,
      used: 0,
    })
  }

  pub fn with_default_capacity() -> Result<Self, GrowthError> {
    Self::new(DEFAULT_ARENA_CAPACITY)
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }

  pub fn used(&self) -> usize {
    self.used
  }

  pub fn remaining(&self) -> usize {
    self.capacity() - self.used
  }
}

unsafe impl HeapGrowth for ArenaGrowth {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, GrowthError> {
    if bytes > self.remaining() {
      return Err(GrowthError::Exhausted {
        requested: bytes,
        available: self.remaining(),
      });
    }

    let region = unsafe { self.base.add(self.used) };
    self.used += bytes;
    Ok(region)
  }

  fn high_water_mark(&self) -> *mut u8 {
    self.base.as_ptr().wrapping_add(self.used).wrapping_sub(1)
  }
}

impl Drop for ArenaGrowth {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
  }
}

/// Grows the process data segment with `sbrk(2)`.
///
/// The program break is process-wide, so at most one heap should be built on
/// it. Anything else moving the break between two growth calls (the system
/// allocator, for instance) would leave a hole in the heap; that case is
/// detected and reported as [`GrowthError::BreakRefused`] after handing the
/// bytes back.
#[cfg(target_os = "linux")]
pub struct SbrkGrowth {
  end: *mut u8,
}

#[cfg(target_os = "linux")]
unsafe impl Send for SbrkGrowth {}

#[cfg(target_os = "linux")]
impl SbrkGrowth {
  pub fn new() -> Self {
    Self {
      end: unsafe { libc::sbrk(0) }.cast::<u8>(),
    }
  }
}

#[cfg(target_os = "linux")]
impl Default for SbrkGrowth {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(target_os = "linux")]
unsafe impl HeapGrowth for SbrkGrowth {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, GrowthError> {
    let increment =
      libc::intptr_t::try_from(bytes).map_err(|_| GrowthError::Oversized { requested: bytes })?;

    let address = unsafe { libc::sbrk(increment) }.cast::<u8>();
    if address as usize == usize::MAX {
      return Err(GrowthError::BreakRefused { requested: bytes });
    }

    if address != self.end {
      tracing::warn!(
        expected = ?self.end,
        found = ?address,
        "program break moved behind the heap's back"
      );
      unsafe {
        if libc::sbrk(0).cast::<u8>() == address.wrapping_add(bytes) {
          libc::sbrk(-increment);
        }
      }
      return Err(GrowthError::BreakRefused { requested: bytes });
    }

    self.end = address.wrapping_add(bytes);
    NonNull::new(address).ok_or(GrowthError::BreakRefused { requested: bytes })
  }

  fn high_water_mark(&self) -> *mut u8 {
    self.end.wrapping_sub(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_grows_contiguously() {
    let mut arena = ArenaGrowth::new(1024).unwrap();
    let start = arena.heap_end();

    let first = arena.grow(64).unwrap();
    let second = arena.grow(128).unwrap();

    assert_eq!(first.as_ptr(), start);
    assert_eq!(second.as_ptr(), start.wrapping_add(64));
    assert_eq!(arena.high_water_mark(), start.wrapping_add(191));
    assert_eq!(arena.used(), 192);
    assert_eq!(arena.remaining(), 1024 - 192);
  }

  #[test]
  fn test_arena_empty_high_water_mark() {
    let arena = ArenaGrowth::new(256).unwrap();
    assert_eq!(arena.heap_end() as usize % 16, 0);
    assert_eq!(arena.high_water_mark().wrapping_add(1), arena.heap_end());
  }

  #[test]
  fn test_arena_exhaustion() {
    let mut arena = ArenaGrowth::new(100).unwrap();
    arena.grow(96).unwrap();

    assert_eq!(
      arena.grow(8),
      Err(GrowthError::Exhausted {
        requested: 8,
        available: 4
      })
    );
    // A failed request leaves the break where it was.
    assert_eq!(arena.used(), 96);
    assert!(arena.grow(4).is_ok());
  }

  #[test]
  fn test_arena_oversized_reservation() {
    assert!(ArenaGrowth::new(usize::MAX).is_err());
  }

  #[cfg(target_os = "linux")]
  #[test]
  #[ignore = "moves the process break, which the system allocator shares"]
  fn test_sbrk_grows_at_break() {
    let mut growth = SbrkGrowth::new();
    let before = growth.heap_end();

    let region = growth.grow(4096).unwrap();

    assert_eq!(region.as_ptr(), before);
    assert_eq!(growth.heap_end(), before.wrapping_add(4096));
  }
}
