//! A multithreaded memory allocator backed by the program break.

use crate::allocators::LocalHeap;
use crate::error::{AllocError, ContractViolation, ResizeError};
use crate::growers::{BrkGrower, LockedGrower};
use crate::header::ALIGNMENT;
use crate::util::raw_ptr;

use core::alloc::{GlobalAlloc, Layout};
use core::cell::RefCell;
use core::ptr::NonNull;

use tracing::error;

/// The program break, shared by every thread.
static BREAK: LockedGrower<BrkGrower> = unsafe { LockedGrower::new(BrkGrower::new()) };

thread_local! {
    /// This thread's free lists. Created on first use, never dropped.
    static LOCAL: RefCell<Option<LocalHeap<'static, BrkGrower>>> = const { RefCell::new(None) };
}

/// A multithreaded memory allocator.
///
/// Every thread keeps its own [`LocalHeap`] in thread-local storage, so the
/// only lock ever taken is the one around the program break. Memory freed on a
/// thread is reused by that thread only; free lists of exited threads are lost.
///
/// Layouts aligned to more than [`ALIGNMENT`] get a free padding block in
/// front of the object. Contract violations (double frees, foreign pointers)
/// abort the process.
///
/// This should be the only allocator moving the program break.
///
/// ```no_run
/// use seg_malloc::SegMalloc;
///
/// #[global_allocator]
/// static ALLOCATOR: SegMalloc = SegMalloc::new();
///
/// fn main() {
///     let v: Vec<u32> = vec![1, 2, 3];
///     println!("Brk is cool {:?}", v);
/// }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SegMalloc;

impl SegMalloc {
    pub const fn new() -> Self {
        SegMalloc
    }

    /// Allocates `size` bytes. See [`LocalHeap::allocate`].
    pub fn malloc(&self, size: isize) -> Result<NonNull<u8>, AllocError> {
        with_local(|heap| heap.allocate(size)).unwrap_or(Err(AllocError::OutOfMemory))
    }

    /// Frees `ptr`, aborting the process if it is not a live allocation.
    ///
    /// # Safety
    /// `ptr` must be null or come from this allocator, and must not be used afterwards.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let ptr = NonNull::new(ptr);
        // Without thread-local storage the block can not be filed anywhere; it leaks.
        if let Some(Err(violation)) = with_local(|heap| heap.deallocate(ptr)) {
            abort_on(violation);
        }
    }

    /// Allocates `size` bytes aligned to `align`. See [`LocalHeap::allocate_aligned`].
    pub fn memalign(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let size = isize::try_from(size).map_err(|_| AllocError::SizeOverflow)?;
        with_local(|heap| heap.allocate_aligned(size, align)).unwrap_or(Err(AllocError::OutOfMemory))
    }

    /// Allocates `count * element_size` zeroed bytes. See [`LocalHeap::zero_allocate`].
    pub fn calloc(&self, count: usize, element_size: usize) -> Result<NonNull<u8>, AllocError> {
        with_local(|heap| heap.zero_allocate(count, element_size))
            .unwrap_or(Err(AllocError::OutOfMemory))
    }

    /// Resizes the allocation behind `ptr`. See [`LocalHeap::resize`].
    ///
    /// # Safety
    /// Same as [`free`](SegMalloc::free) on success.
    pub unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> Result<NonNull<u8>, AllocError> {
        match with_local(|heap| heap.resize(NonNull::new(ptr), new_size)) {
            Some(Ok(p)) => Ok(p),
            Some(Err(ResizeError::Alloc(e))) => Err(e),
            Some(Err(ResizeError::Contract(violation))) => abort_on(violation),
            None => Err(AllocError::OutOfMemory),
        }
    }

    /// Returns how many bytes the allocation behind `ptr` can hold.
    ///
    /// # Safety
    /// `ptr` must come from this allocator and still be live.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        // Only reads the header, so any heap over the break will do.
        match LocalHeap::new(&BREAK).usable_size(ptr) {
            Ok(size) => size,
            Err(violation) => abort_on(violation),
        }
    }

    /// Returns the current program break.
    pub fn heap_top(&self) -> Option<NonNull<u8>> {
        BREAK.top()
    }
}

/// Runs `f` on this thread's heap. Returns `None` if thread-local storage is
/// gone or the heap is already in use further up the stack.
fn with_local<R>(f: impl FnOnce(&mut LocalHeap<'static, BrkGrower>) -> R) -> Option<R> {
    LOCAL
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            let heap = slot.get_or_insert_with(|| LocalHeap::new(&BREAK));
            Some(f(heap))
        })
        .ok()
        .flatten()
}

#[cold]
fn abort_on(violation: ContractViolation) -> ! {
    error!(%violation, "Heap contract violated, aborting.");
    std::process::abort()
}

//---------------impl GlobalAlloc for SegMalloc---------------//

unsafe impl GlobalAlloc for SegMalloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        raw_ptr(self.memalign(layout.size(), layout.align()).ok())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= ALIGNMENT {
            return raw_ptr(self.calloc(1, layout.size()).ok());
        }
        let ptr = self.memalign(layout.size(), layout.align()).ok();
        if let Some(ptr) = ptr {
            ptr.as_ptr().write_bytes(0, layout.size());
        }
        raw_ptr(ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.free(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let resized = with_local(|heap| heap.resize_aligned(NonNull::new(ptr), new_size, layout.align()));
        match resized {
            Some(Ok(p)) => p.as_ptr(),
            Some(Err(ResizeError::Contract(violation))) => abort_on(violation),
            Some(Err(ResizeError::Alloc(_))) | None => core::ptr::null_mut(),
        }
    }
}
