//! # segalloc - A Segregated Free-List Memory Allocator
//!
//! This crate provides a general-purpose heap allocator that manages one
//! contiguous, growable region of raw memory. Free blocks are kept in 15
//! size-class lists and merged with their physical neighbours through
//! boundary tags, which keeps lookups fast and fragmentation low.
//!
//! ## Overview
//!
//! ```text
//!   Segregated Free Lists:
//!
//!   class  block sizes          free list (LIFO, doubly linked)
//!   ┌────┬────────────────────┬──────────────────────────────────────────┐
//!   │  0 │ 32                 │ [32] <-> [32] <-> [32] <-> ...           │
//!   │  1 │ 33 ..= 64          │ [48] <-> [64]                            │
//!   │  2 │ 65 ..= 128         │ (empty)                                  │
//!   │  3 │ 129 ..= 256        │ [176]                                    │
//!   │ .. │ ...                │ ...                                      │
//!   │ 14 │ 262145 and up      │ [524288]                                 │
//!   └────┴────────────────────┴──────────────────────────────────────────┘
//!
//!   A request is served from its own class or the first larger class that
//!   holds a block big enough. Within a class the first fit wins.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align       - Alignment macros (align!, align_to!)
//!   ├── block       - Boundary-tag codec for headers, footers and links
//!   ├── size_class  - Size-class arithmetic
//!   ├── free_list   - Segregated free lists (internal)
//!   ├── growth      - HeapGrowth trait, ArenaGrowth and SbrkGrowth
//!   ├── heap        - SegregatedHeap: allocate, deallocate, reallocate
//!   ├── check       - Heap consistency checker
//!   ├── stats       - Counters and heap snapshots
//!   ├── config      - Growth policy
//!   └── error       - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{ArenaGrowth, SegregatedHeap};
//!
//! let arena = ArenaGrowth::new(1 << 20).unwrap();
//! let mut heap = SegregatedHeap::new(arena).unwrap();
//!
//! let ptr = heap.allocate(100).unwrap().expect("non-zero request");
//! assert_eq!(ptr.as_ptr() as usize % 16, 0);
//!
//! unsafe {
//!     ptr.as_ptr().write(42);
//!     let ptr = heap.reallocate(ptr.as_ptr(), 400).unwrap().unwrap();
//!     assert_eq!(ptr.as_ptr().read(), 42);
//!     heap.deallocate(ptr.as_ptr());
//! }
//!
//! assert!(heap.check());
//! ```
//!
//! ## How It Works
//!
//! Every block carries its size and allocation bit twice, at both ends:
//!
//! ```text
//!   Allocated Block:
//!   ┌──────────┬────────────────────────────────────────┬──────────┐
//!   │  header  │               payload                  │  footer  │
//!   │ size | 1 │   (16-byte aligned, handed to caller)  │ size | 1 │
//!   └──────────┴────────────────────────────────────────┴──────────┘
//!     8 bytes  ▲                                           8 bytes
//!              └── pointer returned to the caller
//!
//!   Free Block:
//!   ┌──────────┬───────────┬─────────────────┬───────────┬──────────┐
//!   │  header  │ prev link │     unused      │ next link │  footer  │
//!   │ size | 0 │           │                 │           │ size | 0 │
//!   └──────────┴───────────┴─────────────────┴───────────┴──────────┘
//! ```
//!
//! The footer of the block before and the header of the block after are one
//! word away, so freeing a block can merge it with free neighbours in O(1):
//!
//! ```text
//!   Before free(B):   [ A: free ][ B: allocated ][ C: free ][ D: allocated ]
//!   After  free(B):   [ A + B + C: free                    ][ D: allocated ]
//! ```
//!
//! When no list can serve a request the heap grows through a [`HeapGrowth`]
//! provider. The three smallest classes grow sixteen blocks at a time; larger
//! classes grow one block. Oversized leftovers are split off and freed.
//!
//! ```text
//!   Heap Memory:
//!
//!   start (≡ 8 mod 16)                                    high-water mark
//!   ▼                                                                   ▼
//!   ┌──────┬──────┬────────────┬──────┬──────────────────┬──────────────┐
//!   │ A 32 │ F 32 │   A 176    │ F 64 │      A 1024      │    F 400     │
//!   └──────┴──────┴────────────┴──────┴──────────────────┴──────────────┘
//! ```
//!
//! ## Features
//!
//! - **Segregated fits**: 15 power-of-two size classes, first fit within a class
//! - **Boundary-tag coalescing**: no two adjacent free blocks survive a free
//! - **Pluggable growth**: a private arena for tests, `sbrk` for the real thing
//! - **In-place realloc**: grows into free neighbours before moving
//! - **Consistency checker**: validates every heap invariant on demand
//!
//! ## Limitations
//!
//! - **Single-threaded only**: wrap the heap in a lock to share it
//! - **Never shrinks**: memory is not handed back to the growth provider
//! - **No hardening**: corrupted boundary tags are not detected on the hot path
//!
//! ## Safety
//!
//! Allocation is safe to call. Deallocation and reallocation take raw
//! pointers and are `unsafe`: passing anything other than a live pointer
//! from the same heap corrupts it.

pub mod align;
pub mod block;
mod check;
mod config;
mod error;
mod free_list;
mod growth;
mod heap;
pub mod size_class;
mod stats;

pub use check::Violation;
pub use config::{DEFAULT_ARENA_CAPACITY, DEFAULT_BATCH_BLOCKS, DEFAULT_BATCHED_CLASSES, HeapConfig};
pub use error::{AllocError, AllocResult, GrowthError};
#[cfg(target_os = "linux")]
pub use growth::SbrkGrowth;
pub use growth::{ArenaGrowth, HeapGrowth};
pub use heap::SegregatedHeap;
pub use stats::{HeapCounters, HeapStats};
