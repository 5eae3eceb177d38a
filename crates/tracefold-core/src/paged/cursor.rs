//! Physical cursor over a [`PagedIntegerSequence`].
//!
//! The cursor remembers `(store_index, slot)` rather than a logical index,
//! so it keeps pointing at the same element when a prefix is cleared and
//! sees elements appended after it.

use crate::cursor::TraceCursor;
use crate::error::{Error, Result};
use crate::paged::queue::PagedIntegerSequence;

/// Position inside a paged sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceCursor {
    store: u64,
    slot: usize,
}

impl SequenceCursor {
    pub(crate) fn start(seq: &PagedIntegerSequence) -> Self {
        let h = seq.header();
        if h.len == 0 {
            return Self {
                store: h.tail_store_index,
                slot: 0,
            };
        }
        Self {
            store: h.first_store_index,
            slot: h.first_page_start,
        }
    }

    pub(crate) fn at(seq: &PagedIntegerSequence, index: usize) -> Result<Self> {
        let h = seq.header();
        if index > h.len {
            return Err(Error::OutOfBounds { index, len: h.len });
        }
        if index == h.len {
            if h.len == 0 {
                return Ok(Self::start(seq));
            }
            let (store, slot) = h.locate(index - 1);
            return Ok(Self {
                store,
                slot: slot + 1,
            });
        }
        let (store, slot) = h.locate(index);
        Ok(Self { store, slot })
    }

    /// Logical index of the element the cursor points at.
    #[must_use]
    pub fn position(&self, seq: &PagedIntegerSequence) -> usize {
        seq.header().logical(self.store, self.slot)
    }

    /// Move onto a live slot; `None` when nothing is available yet.
    fn settle(&mut self, seq: &mut PagedIntegerSequence) -> Result<Option<(u64, usize)>> {
        loop {
            if seq.is_empty() {
                return Ok(None);
            }
            let h = seq.header();
            if self.store < h.first_store_index
                || (self.store == h.first_store_index && self.slot < h.first_page_start)
            {
                self.store = h.first_store_index;
                self.slot = h.first_page_start;
            }
            let tail = h.tail_store_index;
            if self.store > tail {
                return Ok(None);
            }
            let end = seq.page_end(self.store)?;
            if self.slot < end {
                return Ok(Some((self.store, self.slot)));
            }
            if self.store < tail {
                self.store += 1;
                self.slot = 0;
                continue;
            }
            return Ok(None);
        }
    }
}

impl TraceCursor<PagedIntegerSequence> for SequenceCursor {
    fn has_next(&self, source: &PagedIntegerSequence) -> bool {
        self.position(source) < source.len()
    }

    fn next(&mut self, source: &mut PagedIntegerSequence) -> Result<Option<u32>> {
        let Some((store, slot)) = self.settle(source)? else {
            return Ok(None);
        };
        let value = source.read_slot(store, slot)?;
        self.slot += 1;
        Ok(Some(value))
    }

    fn peek(&self, source: &mut PagedIntegerSequence) -> Result<Option<u32>> {
        let mut probe = *self;
        match probe.settle(source)? {
            Some((store, slot)) => source.read_slot(store, slot).map(Some),
            None => Ok(None),
        }
    }

    fn process_next_and_replace_with<F>(
        &mut self,
        source: &mut PagedIntegerSequence,
        f: F,
    ) -> Result<Option<u32>>
    where
        F: FnOnce(u32) -> u32,
    {
        let Some((store, slot)) = self.settle(source)? else {
            return Ok(None);
        };
        let value = source.read_slot(store, slot)?;
        source.write_slot(store, slot, f(value))?;
        self.slot += 1;
        Ok(Some(value))
    }

    fn set_to_position(&mut self, source: &mut PagedIntegerSequence, index: usize) -> Result<()> {
        *self = Self::at(source, index)?;
        Ok(())
    }
}
