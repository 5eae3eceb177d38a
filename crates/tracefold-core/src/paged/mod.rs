//! Disk-paged integer queue.

/// Physical cursor over a paged sequence.
pub mod cursor;
mod page;
/// The paged queue itself and its persistent header.
pub mod queue;

pub use cursor::SequenceCursor;
pub use queue::{PagedIntegerSequence, SequenceHeader};
