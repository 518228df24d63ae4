//! Bit-per-slot allocator for metadata pages and clusters
//!
//! Each bit represents one slot:
//! - 0 = free
//! - 1 = allocated
//!
//! Access beyond `capacity` is lenient: reads return `false` and writes are
//! ignored. On-disk chains can name arbitrary indices and recovery marks them
//! without pre-validating every one.

use crate::array::U32Array;
use crate::error::{BlobstoreError, Result};

const WORD_BITS: usize = 32;

/// Fixed-capacity bitmap with a running count of set bits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitset {
    /// Bitmap words (each word = 32 slots)
    words: U32Array,

    /// Number of slots tracked
    capacity: usize,

    /// Number of set slots
    size: usize,
}

impl Bitset {
    /// Create an all-free bitmap covering `capacity` slots
    pub fn new(capacity: usize) -> Result<Self> {
        let num_words = (capacity + WORD_BITS - 1) / WORD_BITS;
        let words = U32Array::new(num_words)?;
        Ok(Bitset {
            words,
            capacity,
            size: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently set
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots currently clear
    pub fn free_slots(&self) -> usize {
        self.capacity - self.size
    }

    /// Read slot `i` (false beyond capacity)
    pub fn get(&self, i: usize) -> bool {
        if i >= self.capacity {
            return false;
        }
        (self.words.get(i / WORD_BITS) >> (i % WORD_BITS)) & 1 == 1
    }

    /// Write slot `i` (ignored beyond capacity)
    ///
    /// Setting a slot to its current value leaves `size()` unchanged.
    pub fn set(&mut self, i: usize, value: bool) {
        if i >= self.capacity {
            return;
        }
        let old = self.get(i);
        if old == value {
            return;
        }

        let mask = 1u32 << (i % WORD_BITS);
        if value {
            self.words.as_mut_slice()[i / WORD_BITS] |= mask;
            self.size += 1;
        } else {
            self.words.as_mut_slice()[i / WORD_BITS] &= !mask;
            self.size -= 1;
        }
    }

    /// Claim `n` free slots, first-fit, returning them in ascending order
    pub fn alloc(&mut self, n: usize) -> Result<Vec<u32>> {
        self.check_free(n)?;
        let mut out = Vec::new();
        out.try_reserve_exact(n)?;
        out.resize(n, 0u32);
        self.alloc_into(&mut out)?;
        Ok(out)
    }

    /// Claim `out.len()` free slots, first-fit, writing them into `out`
    ///
    /// Slots are marked as they are found. If the bitmap runs out before
    /// `out` is full, every slot claimed by this call is cleared again and
    /// the bitmap is left exactly as it was.
    pub fn alloc_into(&mut self, out: &mut [u32]) -> Result<()> {
        let n = out.len();
        self.check_free(n)?;

        let mut found = 0usize;
        let mut i = 0usize;

        while found < n && i < self.capacity {
            // Skip fully allocated words
            if i % WORD_BITS == 0 && self.words.get(i / WORD_BITS) == u32::MAX {
                i += WORD_BITS;
                continue;
            }

            if !self.get(i) {
                self.set(i, true);
                out[found] = i as u32;
                found += 1;
            }
            i += 1;
        }

        if found == n {
            return Ok(());
        }

        for &slot in &out[..found] {
            self.set(slot as usize, false);
        }
        tracing::debug!("Bitset exhausted: wanted {}, rolled back {}", n, found);

        Err(BlobstoreError::Exhausted {
            requested: n,
            available: found,
        })
    }

    fn check_free(&self, n: usize) -> Result<()> {
        let available = self.free_slots();
        if n > available {
            tracing::debug!("Bitset exhausted: wanted {}, {} free", n, available);
            return Err(BlobstoreError::Exhausted {
                requested: n,
                available,
            });
        }
        Ok(())
    }

    /// Clear every listed slot
    ///
    /// Clearing a slot that is already free is a no-op.
    pub fn free(&mut self, slots: &[u32]) {
        for &slot in slots {
            self.set(slot as usize, false);
        }
    }

    /// Iterate over the indices of set slots
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |&i| self.get(i))
    }
}
