//! A per-thread allocation engine over a shared heap.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Ownership
// A `LocalHeap` owns its free lists outright and only borrows the grower,
// which is the piece every thread shares. Blocks reachable from the lists are
// owned by the heap; blocks handed to callers are owned by the callers until
// they come back through `deallocate` or `resize`, possibly on another heap.
// Headers of blocks owned by somebody else are never read or written, which is
// why forward coalescing asks the lists first and only then looks at the
// neighbour.
//
// ## Size augmentation
// Every capacity is a multiple of `ALIGNMENT` (see `util::augment_size`),
// so headers, and with them payloads, stay aligned across splits and merges.

use self::util::{augment_size, to_request};
use crate::error::{AllocError, ContractViolation, ResizeError};
use crate::freelist::Registry;
use crate::growers::{Grower, LockedGrower};
use crate::header::{Block, ALIGNMENT, HEADER_SIZE, MIN_PAYLOAD};
use crate::size_class::{size_class, NUM_CLASSES};

use core::fmt::{self, Debug};
use core::ptr::{copy_nonoverlapping, NonNull};

use tracing::{debug, error, instrument, Level};

mod util;

/// Free memory held by a [`LocalHeap`], per size class.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FreeStats {
    pub blocks: [usize; NUM_CLASSES],
    pub bytes: usize,
}

impl FreeStats {
    pub fn total_blocks(&self) -> usize {
        self.blocks.iter().sum()
    }
}

/// An allocator engine owning one set of segregated free lists.
///
/// Growing the heap goes through the shared [`LockedGrower`]; everything else
/// happens on state private to this value. The type is neither `Send` nor
/// `Sync`, so each thread needs its own.
pub struct LocalHeap<'g, G: Grower> {
    registry: Registry,
    grower: &'g LockedGrower<G>,
}

impl<G: Grower> Debug for LocalHeap<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalHeap")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<'g, G: Grower> LocalHeap<'g, G> {
    /// Creates an engine with empty free lists drawing memory from `grower`.
    pub const fn new(grower: &'g LockedGrower<G>) -> Self {
        LocalHeap {
            registry: Registry::new(),
            grower,
        }
    }

    /// Returns a pointer to at least `size` bytes, aligned to [`ALIGNMENT`].
    ///
    /// Free blocks of this heap are reused first; the heap only grows when none fits.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn allocate(&mut self, size: isize) -> Result<NonNull<u8>, AllocError> {
        let requested = usize::try_from(size).map_err(|_| AllocError::InvalidSize(size))?;
        let aligned = augment_size(requested)?;

        let block = match self.take_free_block(aligned) {
            Some(block) => {
                debug!(block = ?block.payload(), "Found free block to accomodate object.");
                block
            }
            None => {
                debug!("Couldn't find free block to accomodate object, requesting heap growth.");
                self.grow(aligned)?
            }
        };

        unsafe {
            block.set_used(true);
            self.split(block, aligned);
            block.set_requested_size(requested);
        }
        Ok(block.payload())
    }

    /// Returns a pointer to at least `size` bytes, aligned to `align`.
    ///
    /// Alignments up to [`ALIGNMENT`] are plain [`allocate`](LocalHeap::allocate)
    /// calls. Larger ones over-allocate and place a free block as left padding
    /// in front of the object, so the object gets a header of its own.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn allocate_aligned(&mut self, size: isize, align: usize) -> Result<NonNull<u8>, AllocError> {
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(align));
        }
        if align <= ALIGNMENT {
            return self.allocate(size);
        }
        let requested = usize::try_from(size).map_err(|_| AllocError::InvalidSize(size))?;
        let aligned = augment_size(requested)?;
        let outer_size = aligned
            .checked_add(align + HEADER_SIZE + MIN_PAYLOAD)
            .ok_or(AllocError::SizeOverflow)?;

        let outer_start = self.allocate(to_request(outer_size)?)?;
        unsafe {
            let outer = Block::from_payload(outer_start);
            let outer_capacity = outer.aligned_size();

            // The padding keeps at least MIN_PAYLOAD of its own.
            let min_start = outer_start.as_ptr() as usize + HEADER_SIZE + MIN_PAYLOAD;
            let obj_addr = (min_start + align - 1) & !(align - 1);
            let offset = obj_addr - outer_start.as_ptr() as usize;
            debug_assert!(offset + aligned <= outer_capacity);

            let padding_size = offset - HEADER_SIZE;
            let padding = Block::create(outer.start(), padding_size, padding_size, false);
            debug!(?padding, padding_size, "Placing a free block as left padding.");
            self.registry.insert(padding, size_class(padding_size));

            let obj_start = NonNull::new_unchecked(outer_start.as_ptr().add(offset));
            let obj_header = Block::from_payload(obj_start).start();
            let block = Block::create(obj_header, 0, outer_capacity - offset, true);
            self.split(block, aligned);
            block.set_requested_size(requested);
            Ok(block.payload())
        }
    }

    /// Gives the block behind `ptr` back to this heap. `None` is a no-op.
    ///
    /// # Errors
    /// A [`ContractViolation`] means `ptr` is not a live allocation. The heap is left
    /// untouched but can not be trusted anymore if the pointer came from a double free.
    ///
    /// # Safety
    /// `ptr` must be `None` or have been returned by a [`LocalHeap`] sharing this
    /// heap's grower, and must not be used afterwards.
    #[instrument(level = "info", skip(self), err(level = Level::ERROR))]
    pub unsafe fn deallocate(&mut self, ptr: Option<NonNull<u8>>) -> Result<(), ContractViolation> {
        let Some(ptr) = ptr else {
            return Ok(());
        };
        let block = self.checked_block(ptr)?;
        self.release(block);
        Ok(())
    }

    /// Allocates `count * element_size` bytes and fills them with zeros.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn zero_allocate(
        &mut self,
        count: usize,
        element_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let size = count
            .checked_mul(element_size)
            .ok_or(AllocError::SizeOverflow)?;
        let ptr = self.allocate(to_request(size)?)?;
        unsafe { ptr.as_ptr().write_bytes(0, size) };
        Ok(ptr)
    }

    /// Makes the allocation behind `ptr` at least `new_size` bytes large.
    ///
    /// The pointer stays the same whenever the block already has the room,
    /// shrinking included; nothing is given back in that case. Otherwise the
    /// contents move to a new block and the old one is freed. On failure the
    /// original allocation is left as it was.
    ///
    /// # Safety
    /// Same as [`deallocate`](LocalHeap::deallocate). On success the old pointer
    /// must only be used if it equals the returned one.
    #[inline]
    pub unsafe fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<NonNull<u8>, ResizeError> {
        self.resize_aligned(ptr, new_size, ALIGNMENT)
    }

    /// Like [`resize`](LocalHeap::resize), but a moved allocation is placed
    /// at a multiple of `align`. `ptr` itself must already be aligned that way.
    ///
    /// # Safety
    /// Same as [`resize`](LocalHeap::resize).
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub unsafe fn resize_aligned(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, ResizeError> {
        let Some(ptr) = ptr else {
            return Ok(self.allocate_aligned(to_request(new_size)?, align)?);
        };
        let block = self.checked_block(ptr)?;
        debug_assert_eq!(ptr.as_ptr() as usize % align.max(ALIGNMENT), 0);

        let old_size = block.requested_size();
        if old_size >= new_size {
            debug!(old_size, "Block already holds the new size.");
            return Ok(ptr);
        }

        let aligned = augment_size(new_size)?;
        if block.aligned_size() >= aligned {
            debug!(capacity = block.aligned_size(), "Growing object in place.");
            block.set_requested_size(new_size);
            return Ok(ptr);
        }

        debug!("Couldn't grow in place, attempting reallocation to a new block.");
        let new_ptr = self.allocate_aligned(to_request(new_size)?, align)?;
        copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size);
        self.release(block);
        Ok(new_ptr)
    }

    /// Returns how many bytes the allocation behind `ptr` can hold.
    ///
    /// # Safety
    /// Same as [`deallocate`](LocalHeap::deallocate), minus the promise not to use `ptr` again.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, ContractViolation> {
        Ok(self.checked_block(ptr)?.aligned_size())
    }

    /// Counts the free blocks and bytes currently held by this heap.
    pub fn stats(&self) -> FreeStats {
        let mut stats = FreeStats::default();
        for class in 0..NUM_CLASSES {
            for block in unsafe { self.registry.list(class).iter() } {
                stats.blocks[class] += 1;
                stats.bytes += unsafe { block.aligned_size() };
            }
        }
        stats
    }

    /// Searches the class of `aligned` and then every larger class for a
    /// block with enough capacity, and unlinks the first one found.
    fn take_free_block(&mut self, aligned: usize) -> Option<Block> {
        (size_class(aligned)..NUM_CLASSES)
            .find_map(|class| unsafe { self.registry.find_fit(class, aligned) })
    }

    /// Grows the heap by a single block with `aligned` bytes of capacity.
    #[instrument(level = "debug", skip(self), err(Debug, level = Level::ERROR))]
    fn grow(&mut self, aligned: usize) -> Result<Block, AllocError> {
        let start = self
            .grower
            .extend(aligned + HEADER_SIZE)
            .inspect_err(|_| error!("Growth failure, no memory."))?;
        debug!(?start, "Heap growth successful.");
        Ok(unsafe { Block::create(start, 0, aligned, true) })
    }

    /// Cuts the tail of `block` off into a free block of its own if what
    /// remains after `aligned` bytes can hold a header and [`MIN_PAYLOAD`].
    ///
    /// # Safety
    /// `block` must be owned by the caller and not be part of any free list.
    #[instrument(level = "debug", skip(self))]
    unsafe fn split(&mut self, block: Block, aligned: usize) {
        let capacity = block.aligned_size();
        if capacity < aligned + HEADER_SIZE + MIN_PAYLOAD {
            debug!(slack = capacity - aligned, "Block too small to split.");
            return;
        }

        let rest_size = capacity - aligned - HEADER_SIZE;
        let rest_start = NonNull::new_unchecked(block.payload().as_ptr().add(aligned));
        let rest = Block::create(rest_start, rest_size, rest_size, false);
        block.set_aligned_size(aligned);
        self.registry.insert(rest, size_class(rest_size));
        debug!(?rest, rest_size, "Placed remainder in a free list.");
    }

    /// Frees a block known to be in use: merges its physical successor if
    /// this heap owns it, then files it under its class.
    ///
    /// # Safety
    /// `block` must be a live, used block that the caller gives up.
    #[instrument(level = "debug", skip(self))]
    unsafe fn release(&mut self, block: Block) {
        block.set_used(false);
        self.coalesce_forward(block);
        self.registry.insert(block, size_class(block.aligned_size()));
    }

    /// Absorbs the block physically following `block` if, and only if,
    /// it sits in one of this heap's free lists.
    ///
    /// # Safety
    /// `block` must be owned by the caller and not be part of any free list.
    unsafe fn coalesce_forward(&mut self, block: Block) {
        let Some(neighbour) = Block::from_addr(block.physical_next()) else {
            return;
        };

        // Membership is checked by address alone: a neighbour owned by
        // another thread, or lying past the heap top, must not even be read.
        if !(0..NUM_CLASSES).any(|class| self.registry.remove(neighbour, class)) {
            debug!(?neighbour, "Successive block isn't in this heap's free lists, skipping merge.");
            return;
        }

        let merged = block.aligned_size() + HEADER_SIZE + neighbour.aligned_size();
        block.set_aligned_size(merged);
        block.set_requested_size(merged);
        debug!(?neighbour, merged, "Merged with successive free block.");
    }

    /// Maps `ptr` back to its block, rejecting anything that can not be a live allocation.
    ///
    /// # Safety
    /// If `ptr` is aligned and below the heap top, the header in front of it must be readable.
    unsafe fn checked_block(&self, ptr: NonNull<u8>) -> Result<Block, ContractViolation> {
        let addr = ptr.as_ptr() as usize;
        if addr % ALIGNMENT != 0 {
            return Err(ContractViolation::Misaligned(addr));
        }
        if addr < HEADER_SIZE || addr > self.grower.grown_end() {
            return Err(ContractViolation::OutsideHeap(addr));
        }
        let block = Block::from_payload(ptr);
        if !block.is_used() {
            return Err(ContractViolation::NotInUse(block.addr()));
        }
        Ok(block)
    }
}
