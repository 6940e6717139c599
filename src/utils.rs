pub(crate) trait AlignUp: Sized {
    /// Round up to the next multiple of `align`, which must be a power of two.
    /// Returns `None` on overflow.
    fn align_up(self, align: usize) -> Option<Self>;
}

impl AlignUp for usize {
    #[inline]
    fn align_up(self, align: usize) -> Option<Self> {
        debug_assert!(align.is_power_of_two(), "AlignUp::align_up");
        let mask = align - 1;
        self.checked_add(mask).map(|value| value & !mask)
    }
}
