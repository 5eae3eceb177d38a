// crates/tracefold-core/src/lib.rs

//! Out-of-core storage and self-compression of execution traces.
//!
//! The crate provides the building blocks every trace container sits on:
//! - disk-paged integer queues with a bounded page cache ([`paged`]),
//! - a paged `u32 -> Vec<u32>` store with raw page migration ([`keyed`]),
//! - recursive repetition folding ([`compress`]) and lazy forward/reverse
//!   replay of folded traces without expansion ([`iter`]),
//! - the shared statement grammar that deduplicates sub-sequences across
//!   traces ([`grammar`]).
//!
//! ```
//! use tracefold_core::{RepetitionCompressor, TraceCursor};
//!
//! let mut trace = RepetitionCompressor::new()
//!     .compress_vec(vec![4, 5, 4, 5, 4, 5, 4, 5, 6])
//!     .unwrap();
//! let cursor = trace.forward();
//! let replayed: Vec<u32> = cursor.iter(&mut trace).collect::<Result<_, _>>().unwrap();
//! assert_eq!(replayed, vec![4, 5, 4, 5, 4, 5, 4, 5, 6]);
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

/// Statement encoding and sub-sequence fingerprints.
pub mod codec;
/// Repetition markers, levels and the folding compressor.
pub mod compress;
/// Paging tunables loaded from TOML.
pub mod config;
/// Detached cursor trait and its borrowing iterator adapter.
pub mod cursor;
/// Error type and result alias.
pub mod error;
/// Shared grammar: sub-sequence and sub-trace dictionaries.
pub mod grammar;
/// Lazy forward and reverse replay of compressed traces.
pub mod iter;
/// Disk-paged keyed store.
pub mod keyed;
/// Disk-paged integer queue.
pub mod paged;
/// Random-access integer sequence trait.
pub mod sequence;
/// Seeded generator of loop-heavy statement traces.
pub mod synth;

pub use compress::{CompressedTrace, RepetitionCompressor, RepetitionLevel, RepetitionMarker};
pub use config::StoreConfig;
pub use cursor::{CursorIter, TraceCursor};
pub use error::{Error, ErrorKind, Result};
pub use grammar::{GrammarParams, GrammarRecord, LocalGrammar, TraceIndexer};
pub use iter::{ForwardCursor, ReverseCursor};
pub use keyed::{KeyedHeader, PagedKeyedStore};
pub use paged::{PagedIntegerSequence, SequenceCursor, SequenceHeader};
pub use sequence::IntSequence;

/// Commonly-used items for quick imports.
///
/// ```rust
/// use tracefold_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CompressedTrace, IntSequence, PagedIntegerSequence, RepetitionCompressor, StoreConfig,
        TraceCursor, TraceIndexer,
    };
}
