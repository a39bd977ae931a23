//! Error types returned by the allocator engines.

use thiserror::Error;

/// A recoverable allocation failure. Nothing on the heap changes when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("requested size {0} is negative")]
    InvalidSize(isize),
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("requested size does not fit in the address space")]
    SizeOverflow,
    #[error("the heap could not be grown")]
    OutOfMemory,
}

/// A pointer handed back to the allocator that it never gave out, or no longer owns.
///
/// Once this happens the heap can not be trusted anymore; the process-wide
/// allocator aborts on it. It is kept apart from [`AllocError`] so that the
/// two can never be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("pointer {0:#x} is not aligned like an allocation")]
    Misaligned(usize),
    #[error("pointer {0:#x} lies outside the heap")]
    OutsideHeap(usize),
    #[error("block at {0:#x} is not in use")]
    NotInUse(usize),
}

/// The ways [`resize`](crate::allocators::LocalHeap::resize) can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResizeError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}
