//! Defines the [`Freelist`] and [`Registry`] structs.
//!
//! Free blocks are threaded through the `link` field of their own headers,
//! so the lists need no storage of their own. A [`Registry`] belongs to exactly
//! one thread and is never shared, which is why nothing here synchronizes.

use crate::header::Block;
use crate::size_class::NUM_CLASSES;

/// A singly linked LIFO list of free blocks.
#[derive(Debug, Default)]
pub struct Freelist {
    head: Option<Block>,
}

impl Freelist {
    /// Creates an empty Freelist.
    #[inline]
    pub const fn new() -> Self {
        Freelist { head: None }
    }

    /// Marks `block` free and prepends it to the list.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `block` must be a live block owned by the caller and not part of any list.
    pub unsafe fn push_front(&mut self, block: Block) {
        block.set_link(self.head);
        block.set_used(false);
        self.head = Some(block);
    }

    /// Unlinks and returns the first block with at least `min_size` bytes of capacity.
    /// This operation has a time complexity of *O*(n).
    ///
    /// # Safety
    /// All blocks in the list must be live.
    pub unsafe fn take_first_fit(&mut self, min_size: usize) -> Option<Block> {
        self.take_first(|block| block.aligned_size() >= min_size)
    }

    /// Unlinks `block` if it is in the list. Returns whether it was found.
    /// This operation has a time complexity of *O*(n).
    ///
    /// Only addresses are compared, `block` itself is never read.
    ///
    /// # Safety
    /// All blocks in the list must be live.
    pub unsafe fn remove(&mut self, block: Block) -> bool {
        self.take_first(|candidate| candidate == block).is_some()
    }

    unsafe fn take_first(&mut self, mut pred: impl FnMut(Block) -> bool) -> Option<Block> {
        let mut prev: Option<Block> = None;
        let mut cur = self.head;
        while let Some(block) = cur {
            if pred(block) {
                match prev {
                    Some(prev) => prev.set_link(block.link()),
                    None => self.head = block.link(),
                }
                block.set_link(None);
                return Some(block);
            }
            prev = cur;
            cur = block.link();
        }
        None
    }

    /// Returns the head of the list or `None` if the list is empty.
    #[inline]
    pub fn head(&self) -> Option<Block> {
        self.head
    }

    /// Iterates over the blocks of the list, head first.
    ///
    /// # Safety
    /// All blocks in the list must stay live while iterating.
    pub unsafe fn iter(&self) -> impl Iterator<Item = Block> + '_ {
        core::iter::successors(self.head(), |block| unsafe { block.link() })
    }
}

/// One [`Freelist`] per size class.
#[derive(Debug, Default)]
pub struct Registry {
    lists: [Freelist; NUM_CLASSES],
}

impl Registry {
    pub const fn new() -> Self {
        const EMPTY: Freelist = Freelist::new();
        Registry {
            lists: [EMPTY; NUM_CLASSES],
        }
    }

    /// # Safety
    /// See [`Freelist::push_front`].
    #[inline]
    pub unsafe fn insert(&mut self, block: Block, class: usize) {
        self.lists[class].push_front(block);
    }

    /// # Safety
    /// See [`Freelist::take_first_fit`].
    #[inline]
    pub unsafe fn find_fit(&mut self, class: usize, min_size: usize) -> Option<Block> {
        self.lists[class].take_first_fit(min_size)
    }

    /// # Safety
    /// See [`Freelist::remove`].
    #[inline]
    pub unsafe fn remove(&mut self, block: Block, class: usize) -> bool {
        self.lists[class].remove(block)
    }

    #[inline]
    pub fn list(&self, class: usize) -> &Freelist {
        &self.lists[class]
    }
}
