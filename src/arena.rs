mod scratch_vec;

pub use crate::arena::scratch_vec::ScratchVec;
use crate::utils::AlignUp;
use core::{
    alloc::Layout,
    cell::{Cell, UnsafeCell},
    mem::MaybeUninit,
    ptr::{self, NonNull},
};
use derive_more::Debug;
use std::alloc;

/// Pluggable source of short-lived scratch memory.
///
/// # Safety
///
/// `allocate` must return a pointer valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, that stays valid until
/// it is passed back to `deallocate` with the same layout or the allocator
/// itself is dropped or reset.
pub unsafe trait ScratchAlloc {
    /// Allocate a block for `layout`. Never fails; exhaustion of a bounded
    /// allocator must be handled by falling back to another source.
    fn allocate(&self, layout: Layout) -> NonNull<u8>;

    /// Release a block obtained from `allocate`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `self.allocate(layout)` and not yet
    /// released.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global allocator as a [`ScratchAlloc`]. Fallback of [`StackArena`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Heap;

unsafe impl ScratchAlloc for Heap {
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        if layout.size() == 0 {
            return dangling(layout);
        }
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: Forwarded from the caller's contract; zero-sized blocks were
            // never allocated.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // SAFETY: Alignments are non-zero.
    unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(layout.align())) }
}

#[repr(C, align(16))]
struct Buffer<const N: usize>([MaybeUninit<u8>; N]);

/// Bump allocator over an inline buffer of `N` bytes with heap fallback.
///
/// Individual deallocations are no-ops for arena memory; fallback blocks are
/// freed immediately. [`reset`](Self::reset) reclaims the whole buffer at once.
/// Not thread-safe: one arena belongs to one submission.
#[derive(Debug)]
#[debug(
    "StackArena {{ used: {}, capacity: {}, spilled: {} }}",
    cursor.get(),
    N,
    spilled.get()
)]
pub struct StackArena<const N: usize> {
    buffer: UnsafeCell<Buffer<N>>,
    cursor: Cell<usize>,
    spilled: Cell<usize>,
}

impl<const N: usize> Default for StackArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> StackArena<N> {
    /// Empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new(Buffer([MaybeUninit::uninit(); N])),
            cursor: Cell::new(0),
            spilled: Cell::new(0),
        }
    }

    /// Bytes consumed from the buffer, alignment padding included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.cursor.get()
    }

    /// Size of the inline buffer in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes left in the buffer before allocations spill to the heap.
    #[must_use]
    pub fn remaining(&self) -> usize {
        N - self.cursor.get()
    }

    /// Number of allocations served by the heap fallback since construction or
    /// the last reset.
    #[must_use]
    pub fn spilled(&self) -> usize {
        self.spilled.get()
    }

    /// Whether `ptr` points into this arena's buffer.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base().addr();
        let addr = ptr.as_ptr().addr();
        start <= addr && addr < start + N
    }

    /// Rewind the cursor to the start of the buffer. Memory is not zeroed.
    ///
    /// Taking `&mut self` guarantees that no block handed out before the reset
    /// is still borrowed.
    pub fn reset(&mut self) {
        self.cursor.set(0);
        self.spilled.set(0);
    }

    fn base(&self) -> *mut u8 {
        self.buffer.get().cast::<u8>()
    }

    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let base = self.base();
        let start = base.addr();
        let aligned = (start + self.cursor.get()).align_up(layout.align())?;
        let end = aligned.checked_add(layout.size())?;
        if end > start + N {
            return None;
        }
        self.cursor.set(end - start);
        // SAFETY: `start <= aligned < end <= start + N`, so the offset stays inside
        // the buffer and the resulting pointer is non-null.
        Some(unsafe { NonNull::new_unchecked(base.add(aligned - start)) })
    }
}

unsafe impl<const N: usize> ScratchAlloc for StackArena<N> {
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        if layout.size() == 0 {
            return dangling(layout);
        }
        if let Some(ptr) = self.bump(layout) {
            return ptr;
        }
        self.spilled.set(self.spilled.get() + 1);
        tracing::trace!(
            size = layout.size(),
            align = layout.align(),
            used = self.cursor.get(),
            capacity = N,
            "scratch arena exhausted, falling back to the heap"
        );
        Heap.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 || self.owns(ptr) {
            return;
        }
        // SAFETY: Not ours and not zero-sized, so it came from the fallback.
        unsafe { Heap.deallocate(ptr, layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).unwrap()
    }

    #[test]
    fn used_is_the_sum_of_aligned_sizes() {
        let arena = StackArena::<256>::new();
        let sizes = [layout(24, 8), layout(8, 8), layout(32, 16), layout(4, 4)];
        let mut expected = 0;
        for l in sizes {
            let ptr = arena.allocate(l);
            assert!(arena.owns(ptr));
            assert_eq!(ptr.as_ptr().addr() % l.align(), 0);
            expected += l.size();
        }
        assert_eq!(arena.used(), expected);
        assert_eq!(arena.spilled(), 0);
    }

    #[test]
    fn padding_is_counted() {
        let arena = StackArena::<64>::new();
        arena.allocate(layout(1, 1));
        let ptr = arena.allocate(layout(8, 8));
        assert_eq!(ptr.as_ptr().addr() % 8, 0);
        assert_eq!(arena.used(), 16);
        assert_eq!(arena.remaining(), 48);
    }

    #[test]
    fn reset_makes_space_reusable() {
        let mut arena = StackArena::<64>::new();
        let first = arena.allocate(layout(64, 16));
        assert_eq!(arena.remaining(), 0);
        arena.reset();
        assert_eq!(arena.used(), 0);
        let second = arena.allocate(layout(64, 16));
        assert_eq!(first, second);
        assert!(arena.owns(second));
    }

    #[test]
    fn oversized_request_falls_back_without_moving_the_cursor() {
        let arena = StackArena::<64>::new();
        arena.allocate(layout(16, 8));
        let big = layout(128, 8);
        let ptr = arena.allocate(big);
        assert!(!arena.owns(ptr));
        assert_eq!(arena.used(), 16);
        assert_eq!(arena.spilled(), 1);

        // The block is usable memory.
        unsafe {
            ptr.as_ptr().write_bytes(0xAB, big.size());
            assert_eq!(*ptr.as_ptr().add(127), 0xAB);
            arena.deallocate(ptr, big);
        }

        // Later small requests still come from the buffer.
        let small = arena.allocate(layout(8, 8));
        assert!(arena.owns(small));
        assert_eq!(arena.used(), 24);
    }

    #[test]
    fn arena_deallocation_is_a_no_op() {
        let arena = StackArena::<64>::new();
        let l = layout(32, 8);
        let ptr = arena.allocate(l);
        unsafe { arena.deallocate(ptr, l) };
        assert_eq!(arena.used(), 32);
    }

    #[test]
    fn zero_sized_requests_do_not_consume_space() {
        let arena = StackArena::<16>::new();
        let ptr = arena.allocate(layout(0, 32));
        assert_eq!(ptr.as_ptr().addr() % 32, 0);
        assert_eq!(arena.used(), 0);
        unsafe { arena.deallocate(ptr, layout(0, 32)) };
        assert_eq!(arena.spilled(), 0);
    }

    #[test]
    fn over_aligned_requests_are_honoured() {
        let arena = StackArena::<512>::new();
        arena.allocate(layout(3, 1));
        let ptr = arena.allocate(layout(8, 64));
        assert_eq!(ptr.as_ptr().addr() % 64, 0);
        assert!(arena.owns(ptr));
    }

    #[test]
    fn heap_round_trip() {
        let l = layout(40, 8);
        let ptr = Heap.allocate(l);
        unsafe {
            ptr.as_ptr().write_bytes(1, l.size());
            Heap.deallocate(ptr, l);
        }
    }
}
