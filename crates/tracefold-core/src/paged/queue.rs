// crates/tracefold-core/src/paged/queue.rs

//! Disk-backed, append-mostly integer queue.
//!
//! Elements live in fixed-capacity pages. The newest page (the *tail*) stays
//! in memory while it fills; once full it is written to
//! `{dir}/{prefix}-{store_index}.page` and released. Interior pages are
//! faulted back in on demand through a small FIFO cache.
//!
//! Spilled pages occupy store indices `first_store_index..tail_store_index`;
//! the tail page carries `tail_store_index`. Only the oldest page can be
//! partially consumed (its live slice starts at `first_page_start`), so a
//! logical index maps to `(store_index, slot)` from header fields alone.
//!
//! # Ownership
//!
//! A sequence deletes its page files when dropped unless it was handed off
//! with [`PagedIntegerSequence::persist`]. [`PagedIntegerSequence::discard`]
//! does the same deletion but reports failures.
//!
//! # Locking
//!
//! [`PagedIntegerSequence::lock`] is a single-writer assertion, not a mutex:
//! while set, `push`, `set`, `clear` and `clear_prefix` fail with
//! [`Error::Locked`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{Error, IoContext, Result};
use crate::paged::cursor::SequenceCursor;
use crate::paged::page::Page;
use crate::sequence::IntSequence;

/// Persistent description of a sequence; enough to reopen it later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceHeader {
    /// Directory holding the page files.
    pub dir: PathBuf,
    /// File-name prefix of every page.
    pub prefix: String,
    /// Store index of the oldest live page.
    pub first_store_index: u64,
    /// Store index of the tail page (next page id once the tail spills).
    pub tail_store_index: u64,
    /// First live slot in the oldest page.
    pub first_page_start: usize,
    /// Live elements in the oldest page.
    pub first_page_len: usize,
    /// Total live elements.
    pub len: usize,
    /// Slots per page.
    pub page_capacity: usize,
}

impl SequenceHeader {
    fn fresh(dir: PathBuf, prefix: String, page_capacity: usize) -> Self {
        Self {
            dir,
            prefix,
            first_store_index: 0,
            tail_store_index: 0,
            first_page_start: 0,
            first_page_len: 0,
            len: 0,
            page_capacity,
        }
    }

    /// Path of the page file for `store_index`.
    #[must_use]
    pub fn page_path(&self, store_index: u64) -> PathBuf {
        self.dir
            .join(format!("{}-{store_index}.page", self.prefix))
    }

    /// Map a logical index (`< len`) to `(store_index, slot)`.
    #[must_use]
    pub fn locate(&self, index: usize) -> (u64, usize) {
        if index < self.first_page_len {
            return (self.first_store_index, self.first_page_start + index);
        }
        let rest = index - self.first_page_len;
        let page = (rest / self.page_capacity) as u64;
        (
            self.first_store_index + 1 + page,
            rest % self.page_capacity,
        )
    }

    /// Inverse of [`Self::locate`]; positions before the live range map to 0.
    #[must_use]
    pub fn logical(&self, store_index: u64, slot: usize) -> usize {
        if store_index < self.first_store_index {
            return 0;
        }
        if store_index == self.first_store_index {
            return slot.saturating_sub(self.first_page_start);
        }
        let pages = usize::try_from(store_index - self.first_store_index - 1).unwrap_or(usize::MAX);
        self.first_page_len
            .saturating_add(pages.saturating_mul(self.page_capacity))
            .saturating_add(slot)
    }
}

/// Transient state rebuilt on every open.
#[derive(Debug)]
struct Runtime {
    tail: Option<Page>,
    cache: HashMap<u64, Page>,
    order: VecDeque<u64>,
    cache_pages: usize,
    locked: bool,
    delete_on_drop: bool,
    scratch: Option<TempDir>,
}

impl Runtime {
    fn new(config: &StoreConfig, delete_on_drop: bool) -> Self {
        Self {
            tail: None,
            cache: HashMap::new(),
            order: VecDeque::new(),
            cache_pages: config.cache_pages.max(1),
            locked: false,
            delete_on_drop,
            scratch: None,
        }
    }
}

/// Disk-paged queue of `u32`.
#[derive(Debug)]
pub struct PagedIntegerSequence {
    header: SequenceHeader,
    rt: Runtime,
}

static NEXT_PREFIX: AtomicU64 = AtomicU64::new(0);

impl PagedIntegerSequence {
    /// Create an empty sequence writing pages into `dir` (created if missing).
    pub fn create(dir: impl Into<PathBuf>, prefix: &str, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.into();
        std::fs::create_dir_all(&dir).at(&dir)?;
        Ok(Self {
            header: SequenceHeader::fresh(dir, prefix.to_owned(), config.page_capacity),
            rt: Runtime::new(config, config.delete_on_drop),
        })
    }

    /// Create an empty sequence with a unique prefix, in `config.work_dir`
    /// or in a private temporary directory removed together with the
    /// sequence.
    pub fn temporary(config: &StoreConfig) -> Result<Self> {
        let prefix = format!(
            "seq{}-{}",
            std::process::id(),
            NEXT_PREFIX.fetch_add(1, Ordering::Relaxed)
        );
        if let Some(dir) = &config.work_dir {
            return Self::create(dir.clone(), &prefix, config);
        }
        let scratch = tempfile::Builder::new()
            .prefix("tracefold-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let mut seq = Self::create(scratch.path().to_path_buf(), &prefix, config)?;
        seq.rt.scratch = Some(scratch);
        Ok(seq)
    }

    /// Reopen a sequence from a header produced by [`Self::persist`].
    ///
    /// The reopened instance does not delete its pages on drop; call
    /// [`Self::discard`] or [`Self::set_delete_on_drop`] to change that.
    pub fn reopen(header: SequenceHeader, config: &StoreConfig) -> Result<Self> {
        if header.page_capacity == 0 || header.first_store_index > header.tail_store_index {
            return Err(Error::corrupt_record(
                "sequence header",
                format!(
                    "capacity {} with store range {}..={}",
                    header.page_capacity, header.first_store_index, header.tail_store_index
                ),
            ));
        }
        if !header.dir.is_dir() {
            return Err(Error::io(
                &header.dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "page directory missing"),
            ));
        }
        Ok(Self {
            header,
            rt: Runtime::new(config, false),
        })
    }

    /// Flush everything to disk and keep the pages after this instance is gone.
    pub fn persist(mut self) -> Result<SequenceHeader> {
        self.flush()?;
        self.rt.delete_on_drop = false;
        if let Some(scratch) = self.rt.scratch.take() {
            let _kept = scratch.into_path();
        }
        Ok(self.header.clone())
    }

    /// Delete all page files now, surfacing any failure.
    pub fn discard(mut self) -> Result<()> {
        self.rt.delete_on_drop = false;
        self.delete_pages()
    }

    /// Choose whether dropping this instance removes its page files.
    pub fn set_delete_on_drop(&mut self, delete: bool) {
        self.rt.delete_on_drop = delete;
    }

    /* ---------------- Accessors ---------------- */

    /// Number of live elements.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.header.len
    }

    /// `true` when no elements are live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.header.len == 0
    }

    /// Current header (in-memory pages may be newer than the files).
    #[inline]
    #[must_use]
    pub const fn header(&self) -> &SequenceHeader {
        &self.header
    }

    /// Slots per page.
    #[inline]
    #[must_use]
    pub const fn page_capacity(&self) -> usize {
        self.header.page_capacity
    }

    /// Whether a consumer has declared exclusive iteration.
    #[inline]
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.rt.locked
    }

    /// Number of interior pages currently cached.
    #[inline]
    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.rt.cache.len()
    }

    /* ---------------- Locking ---------------- */

    /// Reject mutations until [`Self::unlock`].
    pub fn lock(&mut self) {
        self.rt.locked = true;
    }

    /// Allow mutations again.
    pub fn unlock(&mut self) {
        self.rt.locked = false;
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.rt.locked {
            return Err(Error::Locked);
        }
        Ok(())
    }

    /* ---------------- Element access ---------------- */

    /// Append `value` at the end.
    pub fn push(&mut self, value: u32) -> Result<()> {
        self.ensure_unlocked()?;
        let capacity = self.header.page_capacity;

        if self.header.len == 0 {
            let mut page = Page::new(self.header.tail_store_index, capacity);
            page.push(value);
            self.rt.tail = Some(page);
            self.header.first_store_index = self.header.tail_store_index;
            self.header.first_page_start = 0;
            self.header.first_page_len = 1;
            self.header.len = 1;
            return Ok(());
        }

        let tail_store = self.header.tail_store_index;
        if self.page_mut(tail_store)?.is_full() {
            self.spill_tail()?;
            let mut page = Page::new(self.header.tail_store_index, capacity);
            page.push(value);
            self.rt.tail = Some(page);
        } else {
            self.page_mut(tail_store)?.push(value);
            if tail_store == self.header.first_store_index {
                self.header.first_page_len += 1;
            }
        }
        self.header.len += 1;
        Ok(())
    }

    /// Element at logical `index`.
    pub fn get(&mut self, index: usize) -> Result<u32> {
        self.check_index(index)?;
        let (store, slot) = self.header.locate(index);
        self.read_slot(store, slot)
    }

    /// Overwrite the element at `index`, returning the previous value.
    pub fn set(&mut self, index: usize, value: u32) -> Result<u32> {
        self.ensure_unlocked()?;
        self.check_index(index)?;
        let (store, slot) = self.header.locate(index);
        self.write_slot(store, slot, value)
    }

    /// Replace the element at `index` with `f(element)`, returning the old value.
    pub fn get_and_replace_with(&mut self, index: usize, f: impl FnOnce(u32) -> u32) -> Result<u32> {
        self.ensure_unlocked()?;
        self.check_index(index)?;
        let (store, slot) = self.header.locate(index);
        let old = self.read_slot(store, slot)?;
        self.write_slot(store, slot, f(old))
    }

    /// Oldest live element.
    pub fn first_element(&mut self) -> Result<Option<u32>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.get(0).map(Some)
    }

    /// Newest element.
    pub fn last_element(&mut self) -> Result<Option<u32>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.get(self.header.len - 1).map(Some)
    }

    /// Remove and return the oldest element.
    pub fn pop_front(&mut self) -> Result<Option<u32>> {
        self.ensure_unlocked()?;
        let head = self.first_element()?;
        if head.is_some() {
            self.clear_prefix(1)?;
        }
        Ok(head)
    }

    /* ---------------- Bulk removal ---------------- */

    /// Remove every element and delete all page files.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_unlocked()?;
        self.delete_pages()?;
        // Fresh store ids so no stale file can be mistaken for live data.
        self.header.tail_store_index += 1;
        self.header.first_store_index = self.header.tail_store_index;
        self.header.first_page_start = 0;
        self.header.first_page_len = 0;
        self.header.len = 0;
        Ok(())
    }

    /// Drop the first `count` logical elements.
    ///
    /// Whole pages covered by `count` are deleted without being read; at
    /// most one page is loaded to advance its live start.
    pub fn clear_prefix(&mut self, count: usize) -> Result<()> {
        self.ensure_unlocked()?;
        if count == 0 {
            return Ok(());
        }
        if count >= self.header.len {
            return self.clear();
        }

        let mut count = count;
        while self.header.first_store_index < self.header.tail_store_index
            && count >= self.header.first_page_len
        {
            let store = self.header.first_store_index;
            self.forget_page(store)?;
            count -= self.header.first_page_len;
            self.header.len -= self.header.first_page_len;
            self.header.first_store_index += 1;
            self.header.first_page_start = 0;
            self.header.first_page_len = if self.header.first_store_index == self.header.tail_store_index {
                self.header.len
            } else {
                self.header.page_capacity
            };
            debug!(store, "dropped page by prefix clear");
        }

        if count > 0 {
            let store = self.header.first_store_index;
            let page = self.page_mut(store)?;
            page.start += count;
            page.modified = true;
            self.header.first_page_start += count;
            self.header.first_page_len -= count;
            self.header.len -= count;
        }
        Ok(())
    }

    /* ---------------- Paging ---------------- */

    /// Write every dirty page to disk and release all page memory.
    ///
    /// Idempotent; safe at any point.
    pub fn flush(&mut self) -> Result<()> {
        while let Some(store) = self.rt.order.pop_front() {
            if let Some(page) = self.rt.cache.remove(&store) {
                self.write_back(&page)?;
            }
        }
        if let Some(page) = self.rt.tail.take() {
            self.write_back(&page)?;
        }
        Ok(())
    }

    /// Alias of [`Self::flush`].
    pub fn sleep(&mut self) -> Result<()> {
        self.flush()
    }

    /// Cursor positioned at logical `index`.
    pub fn cursor_at(&self, index: usize) -> Result<SequenceCursor> {
        SequenceCursor::at(self, index)
    }

    /// Cursor positioned at the first element.
    #[must_use]
    pub fn cursor(&self) -> SequenceCursor {
        SequenceCursor::start(self)
    }

    pub(crate) fn read_slot(&mut self, store: u64, slot: usize) -> Result<u32> {
        let path = self.header.page_path(store);
        self.page_mut(store)?.read(slot, &path)
    }

    pub(crate) fn write_slot(&mut self, store: u64, slot: usize, value: u32) -> Result<u32> {
        let path = self.header.page_path(store);
        self.page_mut(store)?.write(slot, value, &path)
    }

    /// Live end slot of page `store`.
    pub(crate) fn page_end(&mut self, store: u64) -> Result<usize> {
        Ok(self.page_mut(store)?.end)
    }

    pub(crate) fn page_mut(&mut self, store: u64) -> Result<&mut Page> {
        let capacity = self.header.page_capacity;

        if store == self.header.tail_store_index {
            let page = match self.rt.tail.take() {
                Some(page) => page,
                None => {
                    debug!(store, "reloading tail page");
                    Page::load(&self.header.page_path(store), store, capacity)?
                }
            };
            return Ok(self.rt.tail.insert(page));
        }

        if !self.rt.cache.contains_key(&store) {
            while self.rt.cache.len() >= self.rt.cache_pages {
                if !self.evict_oldest()? {
                    break;
                }
            }
        }
        match self.rt.cache.entry(store) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let page = Page::load(&self.header.page_path(store), store, capacity)?;
                debug!(store, "faulted page into cache");
                self.rt.order.push_back(store);
                Ok(v.insert(page))
            }
        }
    }

    fn evict_oldest(&mut self) -> Result<bool> {
        while let Some(store) = self.rt.order.pop_front() {
            if let Some(page) = self.rt.cache.remove(&store) {
                self.write_back(&page)?;
                debug!(store, "evicted page");
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        if page.modified {
            page.store(&self.header.page_path(page.store_index))?;
        }
        Ok(())
    }

    fn spill_tail(&mut self) -> Result<()> {
        if let Some(page) = self.rt.tail.take() {
            self.write_back(&page)?;
            debug!(store = page.store_index, "spilled full tail page");
        }
        self.header.tail_store_index += 1;
        Ok(())
    }

    /// Drop `store` from memory and disk without writing it back.
    fn forget_page(&mut self, store: u64) -> Result<()> {
        if self.rt.cache.remove(&store).is_some() {
            self.rt.order.retain(|s| *s != store);
        }
        remove_if_present(&self.header.page_path(store))
    }

    fn delete_pages(&mut self) -> Result<()> {
        self.rt.cache.clear();
        self.rt.order.clear();
        self.rt.tail = None;
        for store in self.header.first_store_index..=self.header.tail_store_index {
            remove_if_present(&self.header.page_path(store))?;
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.header.len {
            return Err(Error::OutOfBounds {
                index,
                len: self.header.len,
            });
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

impl Drop for PagedIntegerSequence {
    fn drop(&mut self) {
        if self.rt.delete_on_drop {
            if let Err(e) = self.delete_pages() {
                warn!(error = %e, prefix = %self.header.prefix, "failed to delete pages on drop");
            }
        }
    }
}

impl IntSequence for PagedIntegerSequence {
    #[inline]
    fn len(&self) -> usize {
        self.header.len
    }

    fn get(&mut self, index: usize) -> Result<u32> {
        Self::get(self, index)
    }

    fn replace(&mut self, index: usize, value: u32) -> Result<u32> {
        self.check_index(index)?;
        let (store, slot) = self.header.locate(index);
        self.write_slot(store, slot, value)
    }

    fn push(&mut self, value: u32) -> Result<()> {
        Self::push(self, value)
    }

    fn discard(self) -> Result<()> {
        Self::discard(self)
    }
}
