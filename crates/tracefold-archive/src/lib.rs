// crates/tracefold-archive/src/lib.rs

//! Persisted trace containers.
//!
//! - Identifier tables for nodes and traces, optionally compacted through a
//!   shared component-name index.
//! - A status byte selecting how per-trace involvement is encoded (dense,
//!   sparse or hit counts; zstd-compressed or not), plus the legacy
//!   single-table layout.
//! - Execution traces as `.flw` records referencing a shared grammar whose
//!   dictionary pages live in the archive and are read on demand.
//! - Atomic replace via a temporary file, and raw entry copies when a
//!   container is relocated.
//!
//! ```no_run
//! use tracefold_archive::{Involvement, SaveOptions, TraceContainer};
//! use tracefold_core::StoreConfig;
//!
//! # fn main() -> tracefold_archive::Result<()> {
//! let cfg = StoreConfig::default();
//! let mut c = TraceContainer::new(vec!["A.java:run:3".into(), "A.java:run:4".into()], &cfg);
//! c.add_trace("testRun", false, Involvement::Hit(vec![1]))?;
//! c.save("run.zip", &SaveOptions::default())?;
//!
//! let back = TraceContainer::load("run.zip", &cfg)?;
//! assert_eq!(back.counters()[1].ef, 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

/// Zip reader, read-only page backend and page sink.
pub mod archive;
/// The container and its save/load paths.
pub mod container;
/// Per-node pass/fail counters.
pub mod counters;
/// Error type.
pub mod error;
/// `.flw` execution-trace records.
pub mod flow;
/// Identifier tables.
pub mod identifiers;
/// Involvement blobs.
pub mod involvement;
/// Status byte.
pub mod status;

pub use archive::{ArchiveBackend, ArchiveReader};
pub use container::{ExecutionTrace, GrammarSource, SaveOptions, TraceContainer, TraceEntry};
pub use counters::SpectrumCounters;
pub use error::{Error, ErrorKind, Result};
pub use involvement::Involvement;
pub use status::{FormatStatus, Layout};
