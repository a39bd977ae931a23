//! Mapping from block capacities to free-list buckets.

/// Number of segregated free lists per thread.
pub const NUM_CLASSES: usize = 8;

/// Upper bound of the smallest class.
pub const SMALLEST_CLASS: usize = 16;

/// Returns the class of a block with `size` bytes of capacity.
///
/// Class `i` holds sizes up to `SMALLEST_CLASS << i`; the last class takes
/// everything above that.
#[inline]
pub fn size_class(size: usize) -> usize {
    let mut class = 0;
    let mut bound = SMALLEST_CLASS;
    while size > bound && class < NUM_CLASSES - 1 {
        bound <<= 1;
        class += 1;
    }
    class
}
