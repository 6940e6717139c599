use crate::arena::ScratchAlloc;
use core::{
    alloc::Layout,
    fmt,
    marker::PhantomData,
    mem,
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
    slice,
};

const MIN_NON_ZERO_CAP: usize = 4;

/// Growable vector of `Copy` elements whose storage comes from a
/// [`ScratchAlloc`].
///
/// Elements are never dropped individually, which keeps the type trivial to
/// back with a bump allocator.
pub struct ScratchVec<'a, T: Copy, A: ScratchAlloc + ?Sized> {
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
    alloc: &'a A,
    _marker: PhantomData<T>,
}

impl<'a, T: Copy, A: ScratchAlloc + ?Sized> ScratchVec<'a, T, A> {
    /// Empty vector; nothing is allocated until the first push.
    #[must_use]
    pub fn new_in(alloc: &'a A) -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            cap: if mem::size_of::<T>() == 0 { usize::MAX } else { 0 },
            alloc,
            _marker: PhantomData,
        }
    }

    /// Empty vector with room for `capacity` elements.
    #[must_use]
    pub fn with_capacity_in(capacity: usize, alloc: &'a A) -> Self {
        let mut vec = Self::new_in(alloc);
        if capacity > vec.cap {
            vec.grow_to(capacity);
        }
        vec
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements that fit before the next reallocation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Append `value`, growing into a fresh allocation when full.
    pub fn push(&mut self, value: T) {
        if self.len == self.cap {
            self.grow_to(self.cap.saturating_mul(2).max(MIN_NON_ZERO_CAP));
        }
        // SAFETY: `len < cap`, so the slot is inside the allocation.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    /// Resize to `new_len`, filling new slots with `value`.
    pub fn resize(&mut self, new_len: usize, value: T) {
        if new_len > self.cap {
            self.grow_to(new_len);
        }
        for idx in self.len..new_len {
            // SAFETY: `idx < new_len <= cap`.
            unsafe { self.ptr.as_ptr().add(idx).write(value) };
        }
        self.len = new_len;
    }

    /// Drop all elements, keeping the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn grow_to(&mut self, new_cap: usize) {
        let layout = Layout::array::<T>(new_cap).expect("ScratchVec::grow_to: capacity overflow");
        let new_ptr = self.alloc.allocate(layout).cast::<T>();
        if self.len != 0 {
            // SAFETY: Both blocks hold at least `len` elements and are distinct
            // allocations.
            unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.len) };
        }
        self.release();
        self.ptr = new_ptr;
        self.cap = new_cap;
    }

    fn release(&mut self) {
        if self.cap == 0 || mem::size_of::<T>() == 0 {
            return;
        }
        // SAFETY: The same layout was validated by `Layout::array` when the block
        // was allocated, and the block has not been released yet.
        unsafe {
            let layout =
                Layout::from_size_align_unchecked(mem::size_of::<T>() * self.cap, mem::align_of::<T>());
            self.alloc.deallocate(self.ptr.cast(), layout);
        }
    }
}

impl<T: Copy, A: ScratchAlloc + ?Sized> Drop for ScratchVec<'_, T, A> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Copy, A: ScratchAlloc + ?Sized> Deref for ScratchVec<'_, T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: The first `len` elements are initialized.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Copy, A: ScratchAlloc + ?Sized> DerefMut for ScratchVec<'_, T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: The first `len` elements are initialized and uniquely borrowed.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Copy + fmt::Debug, A: ScratchAlloc + ?Sized> fmt::Debug for ScratchVec<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
