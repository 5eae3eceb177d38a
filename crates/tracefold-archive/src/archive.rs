//! Zip plumbing: a shared reader, a read-only page backend over a directory
//! inside the archive, and a page sink writing into a zip under
//! construction.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracefold_core::keyed::{PageBackend, PageSink};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// Options used for every entry this crate writes.
pub(crate) fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Cheaply clonable handle on an open archive.
#[derive(Clone, Debug)]
pub struct ArchiveReader {
    path: PathBuf,
    zip: Arc<Mutex<ZipArchive<File>>>,
}

impl ArchiveReader {
    /// Open the archive at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let zip = ZipArchive::new(file).map_err(|e| Error::zip(&path, e))?;
        Ok(Self {
            path,
            zip: Arc::new(Mutex::new(zip)),
        })
    }

    /// File this reader was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, ZipArchive<File>>> {
        self.zip
            .lock()
            .map_err(|_| Error::corrupt(self.path.display().to_string(), "archive lock poisoned"))
    }

    /// Bytes of entry `name`, or `None` when absent.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut zip = self.lock()?;
        let mut entry = match zip.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(Error::zip(&self.path, e)),
        };
        let mut out = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut out)
            .map_err(|e| Error::corrupt(name, e))?;
        Ok(Some(out))
    }

    /// Bytes of entry `name`, which must exist.
    pub fn require(&self, name: &str) -> Result<Vec<u8>> {
        self.read(name)?
            .ok_or_else(|| Error::corrupt(name, "entry missing"))
    }

    /// Whether entry `name` exists.
    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.index_for_name(name).is_some())
    }

    /// All entry names, in archive order.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.file_names().map(str::to_owned).collect())
    }

    /// Copy entry `name` into `out` as `new_name` without recompressing it.
    pub(crate) fn copy_raw<W: Write + Seek>(&self, name: &str, new_name: &str, out: &mut ZipWriter<W>) -> Result<()> {
        let mut zip = self.lock()?;
        let entry = zip.by_name(name).map_err(|e| Error::zip(&self.path, e))?;
        out.raw_copy_file_rename(entry, new_name)
            .map_err(|e| Error::zip(&self.path, e))
    }
}

fn core_error(e: Error) -> tracefold_core::Error {
    match e {
        Error::Core(inner) => inner,
        other => tracefold_core::Error::corrupt_record("archive", other),
    }
}

/* ---------------- Read-only pages ---------------- */

/// Keyed-store pages stored as `{dir}/{id}.page` entries of an archive.
#[derive(Debug)]
pub struct ArchiveBackend {
    reader: ArchiveReader,
    dir: String,
}

impl ArchiveBackend {
    /// Pages under directory `dir` of `reader`.
    #[must_use]
    pub fn new(reader: ArchiveReader, dir: &str) -> Self {
        Self {
            reader,
            dir: dir.to_owned(),
        }
    }
}

/// Entry name of page `id` in directory `dir`.
pub(crate) fn page_entry(dir: &str, id: u32) -> String {
    format!("{dir}/{id}.page")
}

impl PageBackend for ArchiveBackend {
    fn read_page(&mut self, id: u32) -> tracefold_core::Result<Option<Vec<u8>>> {
        self.reader.read(&page_entry(&self.dir, id)).map_err(core_error)
    }

    fn write_page(&mut self, _id: u32, _bytes: &[u8]) -> tracefold_core::Result<()> {
        Err(tracefold_core::Error::ReadOnly)
    }

    fn remove_page(&mut self, _id: u32) -> tracefold_core::Result<()> {
        Err(tracefold_core::Error::ReadOnly)
    }

    fn page_ids(&mut self) -> tracefold_core::Result<Vec<u32>> {
        let head = format!("{}/", self.dir);
        let mut ids: Vec<u32> = self
            .reader
            .names()
            .map_err(core_error)?
            .iter()
            .filter_map(|n| n.strip_prefix(&head)?.strip_suffix(".page")?.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn destroy(&mut self) -> tracefold_core::Result<()> {
        Ok(())
    }
}

/* ---------------- Page sink ---------------- */

/// Writes migrated pages into a zip under construction.
pub(crate) struct ZipPageSink<'a, W: Write + Seek> {
    zip: &'a mut ZipWriter<W>,
    dir: &'static str,
}

impl<'a, W: Write + Seek> ZipPageSink<'a, W> {
    pub(crate) fn new(zip: &'a mut ZipWriter<W>, dir: &'static str) -> Self {
        Self { zip, dir }
    }
}

impl<W: Write + Seek> PageSink for ZipPageSink<'_, W> {
    fn put_page(&mut self, id: u32, bytes: &[u8]) -> tracefold_core::Result<()> {
        let name = page_entry(self.dir, id);
        self.zip
            .start_file(name.as_str(), entry_options())
            .map_err(|e| tracefold_core::Error::corrupt_record(name.as_str(), e))?;
        self.zip
            .write_all(bytes)
            .map_err(|e| tracefold_core::Error::io(&name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracefold_core::keyed::MemoryBackend;
    use tracefold_core::{PagedKeyedStore, StoreConfig};

    #[test]
    fn pages_migrate_into_zip_and_read_back() {
        let cfg = StoreConfig {
            keyed_page_span: 4,
            ..StoreConfig::default()
        };
        let mut store = PagedKeyedStore::new(Box::new(MemoryBackend::new()), &cfg);
        for k in 0..20u32 {
            store.insert(k, vec![k, k * 2]).unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        let moved = store.migrate_to(&mut ZipPageSink::new(&mut zip, "nodeSeqs")).unwrap();
        zip.finish().unwrap();
        assert_eq!(moved, 5);

        let reader = ArchiveReader::open(&path).unwrap();
        assert!(reader.contains("nodeSeqs/0.page").unwrap());
        let backend = ArchiveBackend::new(reader, "nodeSeqs");
        let mut back = PagedKeyedStore::open(Box::new(backend), store.header(), &cfg);
        assert_eq!(back.get(13).unwrap(), Some(&[13, 26][..]));
        assert!(matches!(back.insert(1, vec![]), Err(tracefold_core::Error::ReadOnly)));
    }
}
