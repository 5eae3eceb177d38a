//! Where keyed-store pages live.
//!
//! A [`PageBackend`] stores opaque page blobs by page id. The store never
//! assumes a particular medium: pages can sit in a directory, in memory, or
//! inside a read-only archive (see the archive crate).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, IoContext, Result};

/// Blob storage for keyed-store pages.
pub trait PageBackend: std::fmt::Debug {
    /// Raw bytes of page `id`, or `None` if it was never written.
    fn read_page(&mut self, id: u32) -> Result<Option<Vec<u8>>>;

    /// Store page `id`, replacing any previous content.
    fn write_page(&mut self, id: u32, bytes: &[u8]) -> Result<()>;

    /// Forget page `id`; absent pages are ignored.
    fn remove_page(&mut self, id: u32) -> Result<()>;

    /// Ids of all stored pages, ascending.
    fn page_ids(&mut self) -> Result<Vec<u32>>;

    /// `true` if writes are rejected.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Delete all storage owned by this backend.
    fn destroy(&mut self) -> Result<()> {
        for id in self.page_ids()? {
            self.remove_page(id)?;
        }
        Ok(())
    }
}

/// Destination of a raw page migration.
pub trait PageSink {
    /// Accept page `id` exactly as stored.
    fn put_page(&mut self, id: u32, bytes: &[u8]) -> Result<()>;
}

/* ---------------- Directory ---------------- */

/// Pages as `{dir}/{prefix}-{id}.page` files.
#[derive(Debug)]
pub struct DirBackend {
    dir: PathBuf,
    prefix: String,
    _scratch: Option<TempDir>,
}

impl DirBackend {
    /// Use `dir` (created if missing).
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).at(&dir)?;
        Ok(Self {
            dir,
            prefix: prefix.to_owned(),
            _scratch: None,
        })
    }

    /// Private temporary directory, removed with the backend.
    pub fn temporary(prefix: &str) -> Result<Self> {
        Self::temporary_in(None, prefix)
    }

    /// Private directory created under `parent` (the system temp dir when
    /// `None`), unique per backend and removed with it.
    pub fn temporary_in(parent: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tracefold-keyed-");
        let scratch = match parent {
            Some(dir) => {
                std::fs::create_dir_all(dir).at(dir)?;
                builder.tempdir_in(dir).map_err(|e| Error::io(dir, e))?
            }
            None => builder
                .tempdir()
                .map_err(|e| Error::io(std::env::temp_dir(), e))?,
        };
        Ok(Self {
            dir: scratch.path().to_path_buf(),
            prefix: prefix.to_owned(),
            _scratch: Some(scratch),
        })
    }

    /// Directory holding the page files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{}-{id}.page", self.prefix))
    }
}

impl PageBackend for DirBackend {
    fn read_page(&mut self, id: u32) -> Result<Option<Vec<u8>>> {
        let path = self.path(id);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn write_page(&mut self, id: u32, bytes: &[u8]) -> Result<()> {
        let path = self.path(id);
        std::fs::write(&path, bytes).at(&path)
    }

    fn remove_page(&mut self, id: u32) -> Result<()> {
        let path = self.path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn page_ids(&mut self) -> Result<Vec<u32>> {
        let head = format!("{}-", self.prefix);
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir).at(&self.dir)? {
            let entry = entry.at(&self.dir)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix(&head)
                .and_then(|rest| rest.strip_suffix(".page"))
                .and_then(|id| id.parse::<u32>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

/* ---------------- Memory ---------------- */

/// Pages held in a map; used for trace-local grammars and tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    pages: BTreeMap<u32, Vec<u8>>,
}

impl MemoryBackend {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageBackend for MemoryBackend {
    fn read_page(&mut self, id: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.pages.get(&id).cloned())
    }

    fn write_page(&mut self, id: u32, bytes: &[u8]) -> Result<()> {
        self.pages.insert(id, bytes.to_vec());
        Ok(())
    }

    fn remove_page(&mut self, id: u32) -> Result<()> {
        self.pages.remove(&id);
        Ok(())
    }

    fn page_ids(&mut self) -> Result<Vec<u32>> {
        Ok(self.pages.keys().copied().collect())
    }
}

impl PageSink for MemoryBackend {
    fn put_page(&mut self, id: u32, bytes: &[u8]) -> Result<()> {
        self.write_page(id, bytes)
    }
}

impl PageSink for DirBackend {
    fn put_page(&mut self, id: u32, bytes: &[u8]) -> Result<()> {
        self.write_page(id, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_backend_lists_only_its_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = DirBackend::new(dir.path(), "a").unwrap();
        let mut b = DirBackend::new(dir.path(), "b").unwrap();
        a.write_page(7, b"x").unwrap();
        a.write_page(2, b"y").unwrap();
        b.write_page(1, b"z").unwrap();
        assert_eq!(a.page_ids().unwrap(), vec![2, 7]);
        assert_eq!(a.read_page(7).unwrap().as_deref(), Some(&b"x"[..]));
        assert_eq!(a.read_page(3).unwrap(), None);
        a.destroy().unwrap();
        assert!(a.page_ids().unwrap().is_empty());
        assert_eq!(b.page_ids().unwrap(), vec![1]);
    }
}
