//! Cursor abstraction shared by paged sequences and compressed traces.
//!
//! A cursor is a small `Clone` value holding only a position; the data it
//! walks is passed to each call. Cloning a cursor never copies data.

use crate::error::Result;

/// Detached, cheaply clonable position over a source of `u32` values.
pub trait TraceCursor<Src: ?Sized>: Clone {
    /// `true` while another element can be produced.
    fn has_next(&self, source: &Src) -> bool;

    /// Produce the next element and advance.
    fn next(&mut self, source: &mut Src) -> Result<Option<u32>>;

    /// The element [`Self::next`] would produce, without advancing.
    fn peek(&self, source: &mut Src) -> Result<Option<u32>>;

    /// Produce the next element, store `f(element)` in its physical slot and
    /// advance. Returns the element as it was before `f`.
    fn process_next_and_replace_with<F>(&mut self, source: &mut Src, f: F) -> Result<Option<u32>>
    where
        F: FnOnce(u32) -> u32;

    /// Reposition at absolute element index `index`.
    fn set_to_position(&mut self, source: &mut Src, index: usize) -> Result<()>;

    /// Borrow `source` and iterate from the current position.
    fn iter(self, source: &mut Src) -> CursorIter<'_, Self, Src>
    where
        Self: Sized,
    {
        CursorIter {
            cursor: self,
            source,
            failed: false,
        }
    }
}

/// [`Iterator`] adaptor over a cursor; stops after the first error.
#[derive(Debug)]
pub struct CursorIter<'a, C, Src: ?Sized> {
    cursor: C,
    source: &'a mut Src,
    failed: bool,
}

impl<C, Src: ?Sized> CursorIter<'_, C, Src> {
    /// Current cursor state.
    #[inline]
    pub const fn cursor(&self) -> &C {
        &self.cursor
    }
}

impl<C: TraceCursor<Src>, Src: ?Sized> Iterator for CursorIter<'_, C, Src> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.next(self.source) {
            Ok(v) => v.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
