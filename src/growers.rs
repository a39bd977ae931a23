//! [`Grower`] trait, structures that implement it and the [`LockedGrower`] guard.
//!
//! A grower is the single point of contact between the allocator and whatever
//! provides its memory. It behaves like a program break: memory is only ever
//! appended at the top and never given back.

use core::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use libc::{intptr_t, sbrk};

use crate::error::AllocError;
use crate::header::ALIGNMENT;
use crate::util::{checked_add, find_aligned};

/// A trait for types that act as a contiguous buffer growing at its top.
///
/// # Safety
/// * copying, cloning, or moving the grower must not invalidate any pointers to the buffer
///   managed by the grower.
/// * the addresses returned must be [`ALIGNMENT`]-aligned.
pub unsafe trait Grower {
    /// Extends the buffer by exactly `size` bytes and returns the previous top,
    /// or `Err(())` if the buffer can not grow.
    ///
    /// # Safety
    /// Implementors should ensure that `grow(0)` does not grow the buffer and
    /// returns the current top.
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()>;
}

/// A grower that moves the program break with [`libc::sbrk`].
///
/// The first growth skips whatever is needed to get the break [`ALIGNMENT`]-aligned;
/// after that every request the allocator makes is a multiple of it.
#[derive(Debug, Default)]
pub struct BrkGrower;

impl BrkGrower {
    #[inline(always)]
    pub const fn new() -> Self {
        BrkGrower
    }
}

unsafe impl Grower for BrkGrower {
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        let brk: *mut u8 = sbrk(0).cast();
        if brk as isize == -1 {
            return Err(());
        }
        let start = find_aligned(brk, ALIGNMENT).ok_or(())? as *mut u8;
        if size == 0 {
            return NonNull::new(start).ok_or(());
        }

        let padding = start as usize - brk as usize;
        let increment = padding
            .checked_add(size)
            .and_then(|n| intptr_t::try_from(n).ok())
            .ok_or(())?;
        let prev: *mut u8 = sbrk(increment).cast();
        if prev as isize == -1 {
            return Err(());
        }
        if prev == brk {
            return NonNull::new(start).ok_or(());
        }

        // Somebody else moved the break between the two calls.
        let start = find_aligned(prev, ALIGNMENT).ok_or(())?;
        if start as usize - prev as usize > padding {
            return Err(());
        }
        NonNull::new(start as *mut u8).ok_or(())
    }
}

/// A grower that hands out a caller-provided buffer.
///
/// Useful for tests and for confining an allocator to a fixed region.
#[derive(Debug)]
pub struct ArenaGrower {
    heap_end: *mut u8,
    arena_end: *mut u8,
}

impl ArenaGrower {
    /// Creates a grower over `size` bytes starting at `buf`.
    /// Bytes before the first [`ALIGNMENT`]-aligned address are skipped.
    pub fn new(buf: *mut u8, size: usize) -> Self {
        let arena_end = buf.wrapping_add(size);
        let heap_end = match find_aligned(buf, ALIGNMENT) {
            Some(p) if p as usize <= arena_end as usize => p as *mut u8,
            _ => arena_end,
        };
        ArenaGrower {
            heap_end,
            arena_end,
        }
    }
}

// The arena is only reached through the grower, so moving it across threads is fine.
unsafe impl Send for ArenaGrower {}

unsafe impl Grower for ArenaGrower {
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        let heap_end = NonNull::new(self.heap_end).ok_or(())?;
        if size == 0 {
            return Ok(heap_end);
        }
        let new_heap_end = checked_add(self.heap_end, size).ok_or(())? as *mut u8;
        if new_heap_end > self.arena_end {
            return Err(());
        }
        self.heap_end = new_heap_end;
        Ok(heap_end)
    }
}

/// Serializes access to a [`Grower`] shared by every thread.
///
/// This is the only state of the allocator that more than one thread touches.
/// Growth takes the lock; [`grown_end`](LockedGrower::grown_end) does not.
#[derive(Debug)]
pub struct LockedGrower<G: Grower> {
    inner: Mutex<G>,
    /// End of the highest region handed out by [`extend`](LockedGrower::extend), 0 before the first.
    grown_end: AtomicUsize,
}

impl<G: Grower> LockedGrower<G> {
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing its underlying buffer for the lifetime of the returned value.
    pub const unsafe fn new(grower: G) -> Self {
        LockedGrower {
            inner: Mutex::new(grower),
            grown_end: AtomicUsize::new(0),
        }
    }

    /// Grows the heap by `size` bytes and returns the start of the new region.
    pub fn extend(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        debug_assert_ne!(size, 0);
        let mut grower = self.lock();
        let start = unsafe { grower.grow(size) }.map_err(|()| AllocError::OutOfMemory)?;
        self.grown_end
            .fetch_max(start.as_ptr() as usize + size, Ordering::Release);
        Ok(start)
    }

    /// Returns the current top of the heap.
    pub fn top(&self) -> Option<NonNull<u8>> {
        let mut grower = self.lock();
        unsafe { grower.grow(0) }.ok()
    }

    /// Returns the end of the highest region handed out so far without locking.
    ///
    /// Every pointer a thread obtained from this grower, directly or from
    /// another thread, lies below the value it reads here.
    #[inline]
    pub fn grown_end(&self) -> usize {
        self.grown_end.load(Ordering::Acquire)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, G> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
