//! Minimal random-access integer sequence abstraction.
//!
//! The compressor and the hierarchical iterators are written against
//! [`IntSequence`] so the same code runs over an in-memory `Vec<u32>` or a
//! disk-paged [`crate::paged::PagedIntegerSequence`].

use crate::error::{Error, Result};

/// Append-mostly sequence of `u32` with fallible random access.
///
/// `get` takes `&mut self` because paged implementations fault pages in on
/// demand.
pub trait IntSequence {
    /// Number of elements.
    fn len(&self) -> usize;

    /// `true` when the sequence holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`.
    fn get(&mut self, index: usize) -> Result<u32>;

    /// Overwrite the element at `index`, returning the previous value.
    ///
    /// Intended for in-place relabelling by the consumer that is iterating
    /// the sequence; it bypasses the mutation lock.
    fn replace(&mut self, index: usize, value: u32) -> Result<u32>;

    /// Append one element.
    fn push(&mut self, value: u32) -> Result<()>;

    /// Release the sequence and any storage behind it.
    fn discard(self) -> Result<()>
    where
        Self: Sized,
    {
        drop(self);
        Ok(())
    }

    /// Copy every element into a `Vec`.
    fn to_vec(&mut self) -> Result<Vec<u32>> {
        let n = self.len();
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(self.get(i)?);
        }
        Ok(out)
    }
}

impl IntSequence for Vec<u32> {
    #[inline]
    fn len(&self) -> usize {
        Self::len(self)
    }

    #[inline]
    fn get(&mut self, index: usize) -> Result<u32> {
        let len = Self::len(self);
        self.as_slice()
            .get(index)
            .copied()
            .ok_or(Error::OutOfBounds { index, len })
    }

    fn replace(&mut self, index: usize, value: u32) -> Result<u32> {
        let len = Self::len(self);
        let slot = self
            .get_mut(index)
            .ok_or(Error::OutOfBounds { index, len })?;
        Ok(std::mem::replace(slot, value))
    }

    #[inline]
    fn push(&mut self, value: u32) -> Result<()> {
        Self::push(self, value);
        Ok(())
    }

    fn to_vec(&mut self) -> Result<Vec<u32>> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_bounds_are_checked() {
        let mut v = vec![1u32, 2, 3];
        assert_eq!(IntSequence::get(&mut v, 2).unwrap(), 3);
        assert!(matches!(
            IntSequence::get(&mut v, 3),
            Err(Error::OutOfBounds { index: 3, len: 3 })
        ));
        assert_eq!(v.replace(0, 9).unwrap(), 1);
        assert_eq!(v, vec![9, 2, 3]);
    }
}
