use crate::utils::AlignUp;
use core::ops::Range;

/// Chunking policy for data-parallel slice nodes.
///
/// `max_chunks` caps scheduling overhead, `min_chunk_size` avoids
/// oversubscription on small inputs, and `alignment` (a power of two, or 0/1
/// for none) keeps chunk boundaries cache- or SIMD-friendly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePolicy {
    /// Upper bound on the number of chunks; 0 for no bound.
    pub max_chunks: usize,
    /// Smallest chunk worth scheduling, before alignment.
    pub min_chunk_size: usize,
    /// Chunk sizes are rounded up to a multiple of this; 0 or 1 for none.
    pub alignment: usize,
}

impl Default for SlicePolicy {
    fn default() -> Self {
        Self {
            max_chunks: 64,
            min_chunk_size: 1,
            alignment: 1,
        }
    }
}

impl SlicePolicy {
    /// Policy with the given limits.
    #[must_use]
    pub const fn new(max_chunks: usize, min_chunk_size: usize, alignment: usize) -> Self {
        Self {
            max_chunks,
            min_chunk_size,
            alignment,
        }
    }
}

/// Split of `count` elements into `num_chunks` contiguous ranges of
/// `chunk_size` elements; the last one holds the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    count: usize,
    chunk_size: usize,
    num_chunks: usize,
}

impl ChunkPlan {
    /// # Panics
    /// If `policy.alignment` is greater than one and not a power of two.
    #[must_use]
    pub fn new(count: usize, policy: SlicePolicy) -> Self {
        let SlicePolicy {
            max_chunks,
            min_chunk_size,
            alignment,
        } = policy;
        assert!(
            alignment <= 1 || alignment.is_power_of_two(),
            "slice alignment {alignment} is not a power of two"
        );
        if count == 0 {
            return Self {
                count,
                chunk_size: 0,
                num_chunks: 0,
            };
        }

        let mut chunk_size = if max_chunks == 0 {
            0
        } else {
            count.div_ceil(max_chunks)
        };
        chunk_size = chunk_size.max(min_chunk_size).min(count);
        if alignment > 1 {
            // A rounded size past `usize::MAX` covers everything in one chunk anyway.
            chunk_size = chunk_size.align_up(alignment).unwrap_or(count);
        }
        // Degenerate policy (no chunk cap and no minimum): one element per chunk.
        let chunk_size = chunk_size.max(1);

        Self {
            count,
            chunk_size,
            num_chunks: count.div_ceil(chunk_size),
        }
    }

    /// Number of elements split.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Elements per chunk, the last one excepted.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks; 0 only for an empty input.
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Range of chunk `index`.
    ///
    /// # Panics
    /// If `index >= num_chunks()`.
    #[must_use]
    pub fn chunk(&self, index: usize) -> Range<usize> {
        assert!(
            index < self.num_chunks,
            "chunk {index} out of range ({} chunks)",
            self.num_chunks
        );
        let offset = index * self.chunk_size;
        let len = self.chunk_size.min(self.count - offset);
        offset..offset + len
    }

    /// All chunk ranges in order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = Range<usize>> + '_ {
        (0..self.num_chunks).map(|index| self.chunk(index))
    }
}
