//! One fixed-capacity page of a paged sequence and its on-disk form.
//!
//! Layout (little-endian throughout):
//!
//! ```text
//! i32 start | i32 end | u32 items[end - start]
//! ```
//!
//! A file whose length does not match its header is rejected; pages are
//! never partially repaired.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, IoContext, Result};

const HEADER_BYTES: usize = 8;

#[derive(Debug)]
pub(crate) struct Page {
    pub(crate) store_index: u64,
    items: Vec<u32>,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) modified: bool,
}

impl Page {
    pub(crate) fn new(store_index: u64, capacity: usize) -> Self {
        Self {
            store_index,
            items: vec![0; capacity],
            start: 0,
            end: 0,
            modified: true,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.end == self.capacity()
    }

    /// Append into the free tail of the page. Caller checks `is_full`.
    pub(crate) fn push(&mut self, value: u32) {
        if let Some(slot) = self.items.get_mut(self.end) {
            *slot = value;
            self.end += 1;
            self.modified = true;
        }
    }

    /// Value at absolute slot `slot`, which must lie in `start..end`.
    pub(crate) fn read(&self, slot: usize, path: &Path) -> Result<u32> {
        if slot < self.start || slot >= self.end {
            return Err(self.slot_error(slot, path));
        }
        Ok(self.items[slot])
    }

    /// Overwrite absolute slot `slot`, returning the previous value.
    pub(crate) fn write(&mut self, slot: usize, value: u32, path: &Path) -> Result<u32> {
        if slot < self.start || slot >= self.end {
            return Err(self.slot_error(slot, path));
        }
        self.modified = true;
        Ok(std::mem::replace(&mut self.items[slot], value))
    }

    fn slot_error(&self, slot: usize, path: &Path) -> Error {
        Error::corrupt_page(
            path,
            format!(
                "slot {slot} outside live range {}..{} of page {}",
                self.start, self.end, self.store_index
            ),
        )
    }

    pub(crate) fn store(&self, path: &Path) -> Result<()> {
        let start = to_i32(self.start, path)?;
        let end = to_i32(self.end, path)?;
        let f = File::create(path).at(path)?;
        let mut w = BufWriter::new(f);
        w.write_all(&start.to_le_bytes()).at(path)?;
        w.write_all(&end.to_le_bytes()).at(path)?;
        for v in &self.items[self.start..self.end] {
            w.write_all(&v.to_le_bytes()).at(path)?;
        }
        w.flush().at(path)?;
        Ok(())
    }

    pub(crate) fn load(path: &Path, store_index: u64, capacity: usize) -> Result<Self> {
        let bytes = std::fs::read(path).at(path)?;
        if bytes.len() < HEADER_BYTES {
            return Err(Error::corrupt_page(
                path,
                format!("{} bytes is shorter than the page header", bytes.len()),
            ));
        }
        let start = read_i32(&bytes[0..4]);
        let end = read_i32(&bytes[4..8]);
        let (start, end) = match (usize::try_from(start), usize::try_from(end)) {
            (Ok(s), Ok(e)) if s <= e && e <= capacity => (s, e),
            _ => {
                return Err(Error::corrupt_page(
                    path,
                    format!("bounds {start}..{end} invalid for capacity {capacity}"),
                ))
            }
        };
        let expected = HEADER_BYTES + 4 * (end - start);
        if bytes.len() != expected {
            return Err(Error::corrupt_page(
                path,
                format!("expected {expected} bytes, found {}", bytes.len()),
            ));
        }

        let mut items = vec![0u32; capacity];
        for (slot, chunk) in items[start..end]
            .iter_mut()
            .zip(bytes[HEADER_BYTES..].chunks_exact(4))
        {
            *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self {
            store_index,
            items,
            start,
            end,
            modified: false,
        })
    }
}

#[inline]
fn read_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn to_i32(v: usize, path: &Path) -> Result<i32> {
    i32::try_from(v).map_err(|_| Error::corrupt_page(path, format!("bound {v} exceeds i32")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_load_preserves_live_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p-0.page");
        let mut page = Page::new(0, 8);
        for v in 10..15 {
            page.push(v);
        }
        page.start = 2;
        page.store(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8 + 3 * 4);

        let back = Page::load(&path, 0, 8).unwrap();
        assert_eq!((back.start, back.end), (2, 5));
        assert!(!back.modified);
        assert_eq!(back.read(4, &path).unwrap(), 14);
        assert!(back.read(1, &path).is_err());
    }

    #[test]
    fn torn_page_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p-1.page");
        let mut page = Page::new(1, 4);
        page.push(1);
        page.push(2);
        page.store(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        let err = Page::load(&path, 1, 4).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::FatalIo);
    }
}
