//! Fixed-length sequence of `u32` values
//!
//! Backing storage for a blob's cluster IDs and its cluster-index page list.
//! The length is fixed at creation; indexing past it is a programming error
//! and panics.

use crate::error::{BlobstoreError, Result};
use std::alloc::{self, Layout};
use std::ops::Range;
use std::ptr;

/// Zero-initialized, fixed-length `u32` sequence
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct U32Array {
    data: Box<[u32]>,
}

impl U32Array {
    /// Allocate `n` zeroed elements
    ///
    /// Host memory exhaustion is reported as `BlobstoreError::Allocation`.
    /// The storage comes from the allocator already zeroed, so large arrays
    /// are not written to on creation.
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            return Ok(U32Array::default());
        }
        let layout = Layout::array::<u32>(n).map_err(|_| {
            BlobstoreError::Allocation(format!("{} elements exceed the address space", n))
        })?;

        // SAFETY: `layout` has a non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) } as *mut u32;
        if raw.is_null() {
            return Err(BlobstoreError::Allocation(format!(
                "cannot allocate {} elements",
                n
            )));
        }

        // SAFETY: `raw` was returned by the global allocator for the layout
        // of `[u32; n]`, and all-zero bytes are valid `u32`s
        let data = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(raw, n)) };
        Ok(U32Array { data })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get element `i`
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`.
    pub fn get(&self, i: usize) -> u32 {
        assert!(i < self.data.len(), "index {} out of bounds (len {})", i, self.data.len());
        self.data[i]
    }

    /// Set element `i`
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`.
    pub fn set(&mut self, i: usize, value: u32) {
        assert!(i < self.data.len(), "index {} out of bounds (len {})", i, self.data.len());
        self.data[i] = value;
    }

    /// Mutable view of a sub-range, for bulk fills
    ///
    /// # Panics
    ///
    /// Panics if the range does not lie within `0..len()`.
    pub fn slice_mut(&mut self, range: Range<usize>) -> &mut [u32] {
        assert!(
            range.start <= range.end && range.end <= self.data.len(),
            "range {:?} out of bounds (len {})",
            range,
            self.data.len()
        );
        &mut self.data[range]
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        &mut self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.data.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let arr = U32Array::new(100).unwrap();
        assert_eq!(arr.len(), 100);
        assert!(arr.iter().all(|v| v == 0));
    }

    #[test]
    fn test_get_set() {
        let mut arr = U32Array::new(4).unwrap();
        arr.set(0, 7);
        arr.set(3, u32::MAX);
        assert_eq!(arr.get(0), 7);
        assert_eq!(arr.get(1), 0);
        assert_eq!(arr.get(3), u32::MAX);
    }

    #[test]
    fn test_slice_mut_fills_sub_range() {
        let mut arr = U32Array::new(6).unwrap();
        arr.slice_mut(2..5).copy_from_slice(&[1, 2, 3]);
        assert_eq!(arr.as_slice(), &[0, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_oversized_is_allocation_error() {
        let result = U32Array::new(usize::MAX);
        assert!(matches!(result, Err(BlobstoreError::Allocation(_))));
    }

    #[test]
    fn test_empty() {
        let arr = U32Array::new(0).unwrap();
        assert!(arr.is_empty());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds_panics() {
        let arr = U32Array::new(3).unwrap();
        arr.get(3);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_set_out_of_bounds_panics() {
        let mut arr = U32Array::new(3).unwrap();
        arr.set(10, 1);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_slice_mut_out_of_bounds_panics() {
        let mut arr = U32Array::new(3).unwrap();
        arr.slice_mut(1..4);
    }
}
