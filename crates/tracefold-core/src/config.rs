//! Tunables for paged storage.
//!
//! Every field has a default, so a TOML file only needs to name the values
//! it overrides:
//!
//! ```toml
//! page_capacity = 4096
//! cache_pages = 4
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoContext, Result};

/// Paging parameters shared by [`crate::paged::PagedIntegerSequence`] and
/// [`crate::keyed::PagedKeyedStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Integers per sequence page.
    pub page_capacity: usize,
    /// Interior sequence pages kept in memory besides the tail page.
    pub cache_pages: usize,
    /// Consecutive keys grouped into one keyed-store page.
    pub keyed_page_span: u32,
    /// Keyed-store pages kept in memory.
    pub keyed_cache_pages: usize,
    /// Delete page files when an instance is dropped without being persisted.
    pub delete_on_drop: bool,
    /// Directory for page files; a fresh temporary directory when unset.
    pub work_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_capacity: 1000,
            cache_pages: 2,
            keyed_page_span: 500,
            keyed_cache_pages: 50,
            delete_on_drop: true,
            work_dir: None,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).at(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values the paging code cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.page_capacity == 0 {
            return Err(Error::Config("page_capacity must be positive".into()));
        }
        if i32::try_from(self.page_capacity).is_err() {
            return Err(Error::Config("page_capacity must fit in an i32".into()));
        }
        if self.keyed_page_span == 0 {
            return Err(Error::Config("keyed_page_span must be positive".into()));
        }
        Ok(())
    }

    /// Same configuration with a different page capacity.
    #[inline]
    #[must_use]
    pub const fn with_page_capacity(mut self, capacity: usize) -> Self {
        self.page_capacity = capacity;
        self
    }

    /// Same configuration rooted at `dir`.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}
