//! Paged map from `u32` keys to variable-length `u32` arrays.
//!
//! Keys are bucketed into pages of `page_span` consecutive keys
//! (`page = key / page_span`). Pages are faulted in through a FIFO cache and
//! written back to their [`PageBackend`] only when modified. Because pages
//! are self-contained blobs, a store can be relocated into another container
//! by copying page bytes verbatim ([`PagedKeyedStore::migrate_to`]).

/// Page storage backends and migration sinks.
pub mod backend;
mod page;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use page::KeyedPage;

pub use backend::{DirBackend, MemoryBackend, PageBackend, PageSink};

/// Persistent description of a keyed store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedHeader {
    /// Keys per page.
    pub page_span: u32,
    /// Number of entries.
    pub len: usize,
}

impl KeyedHeader {
    /// CBOR encoding of this header.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out)
            .map_err(|e| Error::corrupt_record("keyed header", e))?;
        Ok(out)
    }

    /// Decode a header written by [`Self::to_cbor`].
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let h: Self = ciborium::de::from_reader(bytes)
            .map_err(|e| Error::corrupt_record("keyed header", e))?;
        if h.page_span == 0 {
            return Err(Error::corrupt_record("keyed header", "page_span is zero"));
        }
        Ok(h)
    }
}

/// Disk-paged `u32 -> Vec<u32>` map.
#[derive(Debug)]
pub struct PagedKeyedStore {
    backend: Box<dyn PageBackend>,
    header: KeyedHeader,
    cache: HashMap<u32, KeyedPage>,
    order: VecDeque<u32>,
    cache_pages: usize,
    delete_on_drop: bool,
}

impl PagedKeyedStore {
    /// Empty store over `backend`.
    #[must_use]
    pub fn new(backend: Box<dyn PageBackend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            header: KeyedHeader {
                page_span: config.keyed_page_span.max(1),
                len: 0,
            },
            cache: HashMap::new(),
            order: VecDeque::new(),
            cache_pages: config.keyed_cache_pages.max(1),
            delete_on_drop: config.delete_on_drop,
        }
    }

    /// Empty store in a private directory of its own, placed under
    /// `config.work_dir` when set.
    pub fn temporary(prefix: &str, config: &StoreConfig) -> Result<Self> {
        let backend = DirBackend::temporary_in(config.work_dir.as_deref(), prefix)?;
        Ok(Self::new(Box::new(backend), config))
    }

    /// Existing store described by `header`. Never deletes pages on drop.
    #[must_use]
    pub fn open(backend: Box<dyn PageBackend>, header: KeyedHeader, config: &StoreConfig) -> Self {
        let mut store = Self::new(backend, config);
        store.header = header;
        store.delete_on_drop = false;
        store
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.header.len
    }

    /// `true` without entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.header.len == 0
    }

    /// Header to persist next to the pages.
    #[inline]
    #[must_use]
    pub const fn header(&self) -> KeyedHeader {
        self.header
    }

    /// Values stored under `key`.
    pub fn get(&mut self, key: u32) -> Result<Option<&[u32]>> {
        let id = key / self.header.page_span;
        let page = self.page_mut(id)?;
        Ok(page.entries.get(&key).map(Vec::as_slice))
    }

    /// Whether `key` has an entry.
    pub fn contains_key(&mut self, key: u32) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Store `values` under `key`, returning the previous values.
    pub fn insert(&mut self, key: u32, values: Vec<u32>) -> Result<Option<Vec<u32>>> {
        self.ensure_writable()?;
        let id = key / self.header.page_span;
        let page = self.page_mut(id)?;
        let old = page.entries.insert(key, values);
        page.modified = true;
        if old.is_none() {
            self.header.len += 1;
        }
        Ok(old)
    }

    /// Remove the entry for `key`.
    pub fn remove(&mut self, key: u32) -> Result<Option<Vec<u32>>> {
        self.ensure_writable()?;
        let id = key / self.header.page_span;
        let page = self.page_mut(id)?;
        let old = page.entries.remove(&key);
        page.modified |= old.is_some();
        if old.is_some() {
            self.header.len -= 1;
        }
        Ok(old)
    }

    /// Bulk insert: entries are grouped by page so each page is loaded once.
    pub fn replace_all<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (u32, Vec<u32>)>,
    {
        self.ensure_writable()?;
        let span = self.header.page_span;
        let mut by_page: BTreeMap<u32, Vec<(u32, Vec<u32>)>> = BTreeMap::new();
        for (key, values) in entries {
            by_page.entry(key / span).or_default().push((key, values));
        }
        for (id, batch) in by_page {
            let page = self.page_mut(id)?;
            let mut added = 0usize;
            for (key, values) in batch {
                if page.entries.insert(key, values).is_none() {
                    added += 1;
                }
            }
            page.modified = true;
            self.header.len += added;
        }
        Ok(())
    }

    /// Write dirty pages to the backend and empty the cache.
    pub fn flush(&mut self) -> Result<()> {
        while let Some(id) = self.order.pop_front() {
            if let Some(page) = self.cache.remove(&id) {
                self.write_back(&page)?;
            }
        }
        Ok(())
    }

    /// Visit every entry in ascending key order, one page in memory at a time.
    pub fn for_each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(u32, &[u32]) -> Result<()>,
    {
        self.flush()?;
        for id in self.backend.page_ids()? {
            let Some(bytes) = self.backend.read_page(id)? else {
                continue;
            };
            let page = KeyedPage::decode(id, &bytes)?;
            for (key, values) in &page.entries {
                f(*key, values)?;
            }
        }
        Ok(())
    }

    /// Copy every page into `sink` without decoding it. Returns the page count.
    pub fn migrate_to(&mut self, sink: &mut dyn PageSink) -> Result<usize> {
        self.flush()?;
        let ids = self.backend.page_ids()?;
        let mut moved = 0;
        for id in ids {
            if let Some(bytes) = self.backend.read_page(id)? {
                sink.put_page(id, &bytes)?;
                moved += 1;
            }
        }
        debug!(pages = moved, entries = self.header.len, "migrated keyed store");
        Ok(moved)
    }

    /// Delete all backend storage now.
    pub fn discard(mut self) -> Result<()> {
        self.delete_on_drop = false;
        self.cache.clear();
        self.order.clear();
        self.backend.destroy()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.backend.is_read_only() {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    fn page_mut(&mut self, id: u32) -> Result<&mut KeyedPage> {
        if !self.cache.contains_key(&id) {
            while self.cache.len() >= self.cache_pages {
                let Some(victim) = self.order.pop_front() else {
                    break;
                };
                if let Some(page) = self.cache.remove(&victim) {
                    self.write_back(&page)?;
                }
            }
        }
        match self.cache.entry(id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let page = match self.backend.read_page(id)? {
                    Some(bytes) => KeyedPage::decode(id, &bytes)?,
                    None => KeyedPage::empty(id),
                };
                self.order.push_back(id);
                Ok(v.insert(page))
            }
        }
    }

    fn write_back(&mut self, page: &KeyedPage) -> Result<()> {
        if !page.modified {
            return Ok(());
        }
        if page.entries.is_empty() {
            self.backend.remove_page(page.id)
        } else {
            self.backend.write_page(page.id, &page.encode())
        }
    }
}

impl Drop for PagedKeyedStore {
    fn drop(&mut self) {
        if self.delete_on_drop {
            if let Err(e) = self.backend.destroy() {
                warn!(error = %e, "failed to delete keyed store pages on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_store(span: u32, cache: usize) -> PagedKeyedStore {
        let cfg = StoreConfig {
            keyed_page_span: span,
            keyed_cache_pages: cache,
            ..StoreConfig::default()
        };
        PagedKeyedStore::new(Box::new(MemoryBackend::new()), &cfg)
    }

    #[test]
    fn insert_replace_remove() {
        let mut s = mem_store(10, 1);
        assert_eq!(s.insert(3, vec![1, 2]).unwrap(), None);
        assert_eq!(s.insert(25, vec![9]).unwrap(), None);
        assert_eq!(s.insert(3, vec![4]).unwrap(), Some(vec![1, 2]));
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(3).unwrap(), Some(&[4][..]));
        assert_eq!(s.remove(25).unwrap(), Some(vec![9]));
        assert_eq!(s.remove(25).unwrap(), None);
        assert_eq!(s.len(), 1);
        assert!(!s.contains_key(25).unwrap());
    }

    #[test]
    fn emptied_pages_disappear_from_backend() {
        let mut s = mem_store(4, 1);
        s.insert(1, vec![1]).unwrap();
        s.insert(9, vec![2]).unwrap();
        s.remove(1).unwrap();
        s.flush().unwrap();
        assert_eq!(s.backend.page_ids().unwrap(), vec![2]);
    }

    #[test]
    fn header_cbor_round_trip() {
        let h = KeyedHeader { page_span: 500, len: 42 };
        assert_eq!(KeyedHeader::from_cbor(&h.to_cbor().unwrap()).unwrap(), h);
        assert!(KeyedHeader::from_cbor(b"\xff").is_err());
    }
}
