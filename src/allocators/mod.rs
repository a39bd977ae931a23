//! The [`LocalHeap`] engine and the process-wide [`SegMalloc`] allocator.

pub mod local_heap;
pub mod seg_malloc;

pub use local_heap::{FreeStats, LocalHeap};
pub use seg_malloc::SegMalloc;
