//! Slot allocation for the blobstore
//!
//! Metadata pages and data clusters are both tracked with a [`Bitset`].
//! Multi-step operations claim slots through a [`Reservation`], which hands
//! every claimed slot back when dropped unless the operation commits.

pub mod bitset;

pub use bitset::Bitset;

use crate::error::Result;

/// Scoped claim on bitset slots
///
/// Slots claimed through [`Reservation::claim`] or
/// [`Reservation::claim_into`] are released on drop. Calling
/// [`Reservation::commit`] keeps them allocated.
pub struct Reservation<'a> {
    bitset: &'a mut Bitset,
    claimed: Vec<u32>,
}

impl<'a> Reservation<'a> {
    pub fn new(bitset: &'a mut Bitset) -> Self {
        Reservation {
            bitset,
            claimed: Vec::new(),
        }
    }

    /// Claim a single slot
    pub fn claim(&mut self) -> Result<u32> {
        let mut slot = [0u32; 1];
        self.claim_into(&mut slot)?;
        Ok(slot[0])
    }

    /// Claim `out.len()` slots in one batch
    ///
    /// A failed batch leaves earlier claims in place; they are released with
    /// the reservation.
    pub fn claim_into(&mut self, out: &mut [u32]) -> Result<()> {
        self.bitset.alloc_into(out)?;
        if let Err(e) = self.claimed.try_reserve(out.len()) {
            self.bitset.free(out);
            return Err(e.into());
        }
        self.claimed.extend_from_slice(out);
        Ok(())
    }

    /// Slots claimed so far
    pub fn claimed(&self) -> &[u32] {
        &self.claimed
    }

    /// Keep every claimed slot allocated
    pub fn commit(mut self) {
        self.claimed.clear();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.claimed.is_empty() {
            tracing::warn!("Rolling back {} claimed slots", self.claimed.len());
            self.bitset.free(&self.claimed);
        }
    }
}
