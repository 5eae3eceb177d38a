//! Container errors.

use std::path::PathBuf;

pub use tracefold_core::ErrorKind;

/// Result alias for container operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while saving, loading or relocating a container.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Target of a plain save already exists.
    #[error("{} already exists; use save_replacing to overwrite", .0.display())]
    AlreadyExists(PathBuf),

    /// An identifier contains the table delimiter.
    #[error("identifier {0:?} contains a tab")]
    InvalidIdentifier(String),

    /// A required entry is missing or malformed.
    #[error("corrupt entry {entry}: {reason}")]
    CorruptEntry {
        /// Entry name inside the archive.
        entry: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Failure inside the zip layer.
    #[error("zip archive {}: {source}", path.display())]
    Zip {
        /// Archive file.
        path: PathBuf,
        /// Underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// Failure from the storage engine.
    #[error(transparent)]
    Core(#[from] tracefold_core::Error),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists(_) | Self::InvalidIdentifier(_) => ErrorKind::ContractViolation,
            Self::CorruptEntry { .. } | Self::Zip { .. } => ErrorKind::FatalIo,
            Self::Core(e) => e.kind(),
        }
    }

    pub(crate) fn corrupt(entry: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptEntry {
            entry: entry.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Core(tracefold_core::Error::io(path, source))
    }
}
