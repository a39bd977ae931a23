//! A multithreaded segregated free-list allocator living on the program break.
//!
//! # Usage
//! ```no_run
//! use seg_malloc::SegMalloc;
//!
//! #[global_allocator]
//! static ALLOCATOR: SegMalloc = SegMalloc::new();
//!
//! fn main() {
//!     let v1: Vec<u32> = vec![1, 2, 3];
//!     println!("Brk is cool {:?}", v1);
//! }
//! ```
//!
//! The engine can also be driven directly over a buffer of your own:
//! ```
//! use seg_malloc::{ArenaGrower, LocalHeap, LockedGrower};
//!
//! #[repr(align(16))]
//! struct Arena([u8; 4096]);
//!
//! let mut arena = Arena([0; 4096]);
//! let grower = unsafe { LockedGrower::new(ArenaGrower::new(arena.0.as_mut_ptr(), 4096)) };
//! let mut heap = LocalHeap::new(&grower);
//!
//! let p = heap.allocate(100).unwrap();
//! unsafe { heap.deallocate(Some(p)).unwrap() };
//! assert_eq!(heap.allocate(100).unwrap(), p);
//! ```
//!
//! # Allocators
//! [`LocalHeap`] is the allocation engine. It owns one set of free lists and
//! borrows a [`LockedGrower`] that it shares with any number of other engines.
//! [`SegMalloc`] keeps one [`LocalHeap`] per thread over the program break and
//! implements [`GlobalAlloc`].
//!
//! # Mode of operation
//! - When an allocation is requested its size is rounded up to [`ALIGNMENT`] and
//!   the free lists of the calling thread are searched, starting at the request's
//!   size class and moving up. The first block large enough wins.
//! - If no block is found the shared grower is asked for exactly one header and
//!   the rounded size. This is the only step that takes a lock.
//! - A block much larger than needed is split and its tail goes back to the free lists.
//! - Alignments above [`ALIGNMENT`] over-allocate and turn the gap in front of
//!   the object into a free block of its own.
//! - On deallocation, which never takes the lock, the block is merged with the block physically following it,
//!   provided that one sits in the freeing thread's lists, and then prepended to
//!   the list of its size class.
//!
//! ## Blocks
//! The heap is a sequence of blocks laid out back to back. Each block has a
//! [header](#headers) followed by its payload. A block is in use while a caller
//! holds its payload and free while it sits in some thread's free list.
//!
//! ## Headers
//! At the beginning of each block there is a header holding the size the caller
//! asked for, the capacity of the payload, the free-list link and the in-use flag.
//! Headers are [`HEADER_SIZE`] bytes and [`ALIGNMENT`]-aligned, so payloads are too.
//!
//! ## Size classes
//! Capacities are sorted into [`NUM_CLASSES`](size_class::NUM_CLASSES) classes with
//! upper bounds 16, 32, 64 and so on. The last class takes everything bigger.
//!
//! ## Free lists
//! Each class has a singly linked list threaded through the headers of its free blocks.
//! Lists belong to a single thread and are never touched by others. A block freed by
//! a thread other than the one that allocated it simply joins the freeing thread's lists.
//!
//! ## Growers
//! A grower is the allocator's underlying storage, a contiguous buffer that only grows.
//! [`BrkGrower`] moves the program break; [`ArenaGrower`] hands out a fixed buffer.
//! Anything implementing [`Grower`] can back a [`LocalHeap`].
//!
//! [`GlobalAlloc`]: core::alloc::GlobalAlloc

pub use crate::allocators::{FreeStats, LocalHeap, SegMalloc};
pub use crate::error::{AllocError, ContractViolation, ResizeError};
pub use crate::growers::{ArenaGrower, BrkGrower, Grower, LockedGrower};
pub use crate::header::{ALIGNMENT, HEADER_SIZE};

pub mod allocators;
pub mod error;
mod freelist;
pub mod growers;
mod header;
pub mod size_class;
mod util;
