//! Defines the [`Header`] struct, the [`Block`] handle and associated constants.
//!
//! This is the only module that turns addresses into headers. Everything above
//! it works with [`Block`] handles and payload pointers.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use static_assertions::const_assert;

/// Alignment of every header and therefore of every payload.
pub const ALIGNMENT: usize = 16;

/// Smallest payload a split is allowed to leave behind.
pub const MIN_PAYLOAD: usize = ALIGNMENT;

pub const HEADER_SIZE: usize = size_of::<Header>();
pub const HEADER_ALIGN: usize = align_of::<Header>();

const_assert!(ALIGNMENT.is_power_of_two());
const_assert!(HEADER_ALIGN == ALIGNMENT);
const_assert!(HEADER_SIZE % ALIGNMENT == 0);

/// Metadata placed in front of every block on the heap.
///
/// `link` is only meaningful while the block sits in a free list.
#[derive(Debug)]
#[repr(C, align(16))]
pub struct Header {
    pub requested_size: usize,
    pub aligned_size: usize,
    pub link: Option<Block>,
    pub used: bool,
}

/// A handle to the header of a block.
///
/// The handle is a plain address; it does not own the block and copying it
/// does not copy the block. All accessors are `unsafe` because the caller has
/// to guarantee that the handle points to a live header it currently owns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Block(NonNull<Header>);

impl Block {
    /// Writes a fresh header at `at` and returns a handle to it.
    ///
    /// # Safety
    /// `at` must be [`ALIGNMENT`]-aligned and the whole range
    /// `[at, at + HEADER_SIZE + aligned_size)` must be owned by the caller.
    #[inline]
    pub unsafe fn create(
        at: NonNull<u8>,
        requested_size: usize,
        aligned_size: usize,
        used: bool,
    ) -> Block {
        debug_assert_eq!(at.as_ptr() as usize % ALIGNMENT, 0);
        debug_assert_eq!(aligned_size % ALIGNMENT, 0, "capacity should be aligned.");
        debug_assert!(requested_size <= aligned_size);
        let header: NonNull<Header> = at.cast();
        header.as_ptr().write(Header {
            requested_size,
            aligned_size,
            link: None,
            used,
        });
        Block(header)
    }

    /// Recovers the block that owns the payload starting at `payload`.
    /// Nothing is read, so this also names the header slot in front of a payload yet to be placed.
    ///
    /// # Safety
    /// `payload` must lie at least [`HEADER_SIZE`] bytes into memory owned by the caller.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Block {
        Block(NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE)).cast())
    }

    /// Reinterprets `addr` as a block handle without reading anything.
    #[inline]
    pub fn from_addr(addr: usize) -> Option<Block> {
        NonNull::new(addr as *mut Header).map(Block)
    }

    #[inline(always)]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Returns the address of the header itself.
    #[inline(always)]
    pub fn start(self) -> NonNull<u8> {
        self.0.cast()
    }

    /// Returns the address right after the header.
    #[inline(always)]
    pub fn payload(self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.0.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    /// Returns the address where the physically following header would sit.
    ///
    /// # Safety
    /// The header must be live and owned by the caller.
    #[inline]
    pub unsafe fn physical_next(self) -> usize {
        self.addr() + HEADER_SIZE + self.aligned_size()
    }

    /// # Safety
    /// See the type level documentation.
    #[inline(always)]
    pub unsafe fn requested_size(self) -> usize {
        (*self.0.as_ptr()).requested_size
    }

    /// # Safety
    /// See the type level documentation.
    #[inline(always)]
    pub unsafe fn aligned_size(self) -> usize {
        (*self.0.as_ptr()).aligned_size
    }

    /// # Safety
    /// See the type level documentation.
    #[inline(always)]
    pub unsafe fn is_used(self) -> bool {
        (*self.0.as_ptr()).used
    }

    /// # Safety
    /// See the type level documentation.
    #[inline(always)]
    pub unsafe fn link(self) -> Option<Block> {
        (*self.0.as_ptr()).link
    }

    /// # Safety
    /// See the type level documentation.
    #[inline(always)]
    pub unsafe fn set_requested_size(self, size: usize) {
        (*self.0.as_ptr()).requested_size = size;
    }

    /// # Safety
    /// See the type level documentation. `size` must be a multiple of [`ALIGNMENT`].
    #[inline(always)]
    pub unsafe fn set_aligned_size(self, size: usize) {
        debug_assert_eq!(size % ALIGNMENT, 0);
        (*self.0.as_ptr()).aligned_size = size;
    }

    /// # Safety
    /// See the type level documentation.
    #[inline(always)]
    pub unsafe fn set_used(self, used: bool) {
        (*self.0.as_ptr()).used = used;
    }

    /// # Safety
    /// See the type level documentation.
    #[inline(always)]
    pub unsafe fn set_link(self, link: Option<Block>) {
        (*self.0.as_ptr()).link = link;
    }
}
