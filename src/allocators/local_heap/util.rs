//! Utility functions specific to the [`LocalHeap`](super::LocalHeap) engine.

use crate::error::AllocError;
use crate::header::HEADER_SIZE;
use crate::util::align_up;

/// Augments `size` to the capacity of the block that will hold it
/// or returns [`AllocError::SizeOverflow`] if no such block can exist.
///
/// Objects, header included, must not exceed `isize::MAX` bytes.
/// https://doc.rust-lang.org/std/ptr/index.html#allocated-object
#[inline]
pub fn augment_size(size: usize) -> Result<usize, AllocError> {
    match align_up(size) {
        Some(aligned) if aligned <= isize::MAX as usize - HEADER_SIZE => Ok(aligned),
        _ => Err(AllocError::SizeOverflow),
    }
}

/// Converts an unsigned request into the signed size the engine takes.
#[inline]
pub fn to_request(size: usize) -> Result<isize, AllocError> {
    isize::try_from(size).map_err(|_| AllocError::SizeOverflow)
}
