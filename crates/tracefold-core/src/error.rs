//! Error type shared by every storage component of the engine.
//!
//! Errors fall into two kinds (see [`ErrorKind`]): fatal I/O conditions that
//! abort the current operation, and contract violations raised when a caller
//! misuses an API. Neither is retried internally.

use std::io;
use std::path::{Path, PathBuf};

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Disk failure, truncated read or corrupt on-disk structure.
    FatalIo,
    /// Misuse of an API: mutating a locked sequence, unsupported operation,
    /// out-of-range access and similar programmer errors.
    ContractViolation,
}

/// Errors raised by paged sequences, keyed stores and the compressor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O call failed on `path`.
    #[error("i/o failure on {}: {source}", path.display())]
    Io {
        /// File or directory the failing call touched.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A page file is truncated or carries impossible bounds.
    #[error("corrupt page {}: {reason}", path.display())]
    CorruptPage {
        /// Page file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A serialized record (header, keyed page, level table) failed to decode.
    #[error("corrupt record {what}: {reason}")]
    CorruptRecord {
        /// Record description.
        what: String,
        /// Decoder message.
        reason: String,
    },

    /// A compression level holds or expands to the wrong number of elements.
    #[error("level {level}: expected {expected} elements, found {actual}")]
    LengthMismatch {
        /// Level index (0 = innermost).
        level: usize,
        /// Recorded original size.
        expected: usize,
        /// Size actually produced.
        actual: usize,
    },

    /// Mutation attempted while the sequence is locked for exclusive iteration.
    #[error("sequence is locked for exclusive iteration")]
    Locked,

    /// Logical index outside `0..len`.
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds {
        /// Requested index.
        index: usize,
        /// Current length.
        len: usize,
    },

    /// Operation intentionally not provided by this type.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Write attempted on a read-only page source.
    #[error("page source is read-only")]
    ReadOnly,

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. }
            | Self::CorruptPage { .. }
            | Self::CorruptRecord { .. }
            | Self::LengthMismatch { .. } => ErrorKind::FatalIo,
            Self::Locked
            | Self::OutOfBounds { .. }
            | Self::Unsupported(_)
            | Self::ReadOnly
            | Self::Config(_) => ErrorKind::ContractViolation,
        }
    }

    /// Wrap an [`io::Error`] with the path it occurred on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt_page(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::CorruptPage {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Build a [`Error::CorruptRecord`].
    pub fn corrupt_record(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptRecord {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

/// Attach a path to a raw [`io::Result`].
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    #[inline]
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_partition_variants() {
        let e = Error::io("/tmp/x", io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(e.kind(), ErrorKind::FatalIo);
        assert_eq!(Error::Locked.kind(), ErrorKind::ContractViolation);
        assert_eq!(
            Error::OutOfBounds { index: 3, len: 2 }.kind(),
            ErrorKind::ContractViolation
        );
        assert!(Error::Locked.to_string().contains("locked"));
    }
}
