//! The one-byte `status` entry selecting how involvement blobs are laid out.
//!
//! | code | layout | compressed | indexed |
//! |---|---|---|---|
//! | 0 / 2 | dense | no | no / yes |
//! | 1 / 3 | dense | yes | no / yes |
//! | 4 / 5 | sparse | yes | no / yes |
//! | 6 / 7 | counts | yes | no / yes |
//! | 8 / 9 | sparse | no | no / yes |
//! | 10 / 11 | counts | no | no / yes |
//!
//! Codes 0 to 7 are the historical set, where sparse and count blobs were
//! always compressed.

use crate::error::{Error, Result};

/// How per-trace involvement is encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    /// One byte per node.
    Dense,
    /// 1-based indices of involved nodes.
    Sparse,
    /// Hit count per node.
    Counts,
}

/// Decoded status byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FormatStatus {
    /// Blob layout.
    pub layout: Layout,
    /// Blobs are zstd frames.
    pub compressed: bool,
    /// Node identifiers go through the `index` name table.
    pub indexed: bool,
}

impl FormatStatus {
    /// Status assumed for archives without a `status` entry.
    pub const LEGACY_DEFAULT: Self = Self {
        layout: Layout::Dense,
        compressed: true,
        indexed: false,
    };

    /// Encode as the stored byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        let indexed = self.indexed as u8;
        match (self.layout, self.compressed) {
            (Layout::Dense, false) => indexed * 2,
            (Layout::Dense, true) => 1 + indexed * 2,
            (Layout::Sparse, true) => 4 + indexed,
            (Layout::Counts, true) => 6 + indexed,
            (Layout::Sparse, false) => 8 + indexed,
            (Layout::Counts, false) => 10 + indexed,
        }
    }

    /// Decode a stored byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        let (layout, compressed, indexed) = match b {
            0 => (Layout::Dense, false, false),
            1 => (Layout::Dense, true, false),
            2 => (Layout::Dense, false, true),
            3 => (Layout::Dense, true, true),
            4 | 5 => (Layout::Sparse, true, b == 5),
            6 | 7 => (Layout::Counts, true, b == 7),
            8 | 9 => (Layout::Sparse, false, b == 9),
            10 | 11 => (Layout::Counts, false, b == 11),
            _ => return Err(Error::corrupt("status", format!("unknown status byte {b}"))),
        };
        Ok(Self {
            layout,
            compressed,
            indexed,
        })
    }
}
