// crates/tracefold-core/src/compress.rs

//! Recursive repetition folding.
//!
//! A pass over a sequence replaces every contiguous run of a repeated block
//! by one literal copy of the block plus a [`RepetitionMarker`]
//! `(start, length, repeat_count)` pointing at that copy in the pass output.
//! Passes repeat on their own output while it keeps shrinking, which folds
//! repeats of repeats.
//!
//! The result, a [`CompressedTrace`], is a flat list of [`RepetitionLevel`]s
//! plus the base sequence. `levels[0]` expands to the original input;
//! `levels[i]` expands to the compressed array of `levels[i - 1]`; the last
//! level's compressed array is the base.
//!
//! ```
//! use tracefold_core::compress::RepetitionCompressor;
//!
//! let mut t = RepetitionCompressor::new()
//!     .compress_vec(vec![1, 2, 1, 2, 1, 2, 9])
//!     .unwrap();
//! assert_eq!(t.base(), &vec![1, 2, 9]);
//! assert_eq!(t.reconstruct().unwrap(), vec![1, 2, 1, 2, 1, 2, 9]);
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

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::iter::{ForwardCursor, ReverseCursor};
use crate::sequence::IntSequence;

/* ---------------- Markers and levels ---------------- */

/// `length` elements starting at `start` occur `repeat_count` times in a row
/// in the next finer level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepetitionMarker {
    /// Index of the single stored copy in the compressed array.
    pub start: usize,
    /// Block length.
    pub length: usize,
    /// Total occurrences, stored copy included.
    pub repeat_count: usize,
}

impl RepetitionMarker {
    /// One past the stored copy.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.start + self.length
    }

    /// Elements this marker covers once expanded.
    #[inline]
    #[must_use]
    pub const fn expanded_len(&self) -> usize {
        self.length * self.repeat_count
    }
}

/// Markers of one fold pass plus the sizes on both sides of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LevelRecord", into = "LevelRecord")]
pub struct RepetitionLevel {
    markers: Vec<RepetitionMarker>,
    /// Index in the expanded sequence where each marker's first copy lands.
    expanded_starts: Vec<usize>,
    compressed_len: usize,
    original_len: usize,
}

#[derive(Serialize, Deserialize)]
struct LevelRecord {
    markers: Vec<RepetitionMarker>,
    compressed_len: usize,
    original_len: usize,
}

impl TryFrom<LevelRecord> for RepetitionLevel {
    type Error = Error;

    fn try_from(r: LevelRecord) -> Result<Self> {
        Self::new(r.markers, r.compressed_len, r.original_len)
    }
}

impl From<RepetitionLevel> for LevelRecord {
    fn from(l: RepetitionLevel) -> Self {
        Self {
            markers: l.markers,
            compressed_len: l.compressed_len,
            original_len: l.original_len,
        }
    }
}

impl RepetitionLevel {
    /// Validate markers against the level sizes.
    ///
    /// Markers must be sorted, non-overlapping, inside `0..compressed_len`,
    /// with `length >= 1` and `repeat_count >= 2`, and must account exactly
    /// for the difference between the two sizes.
    pub fn new(
        markers: Vec<RepetitionMarker>,
        compressed_len: usize,
        original_len: usize,
    ) -> Result<Self> {
        let bad = |reason: String| Error::corrupt_record("repetition level", reason);
        let mut expanded_starts = Vec::with_capacity(markers.len());
        let mut prev_end = 0usize;
        let mut extra = 0usize;
        for m in &markers {
            if m.length == 0 || m.repeat_count < 2 {
                return Err(bad(format!("degenerate marker {m:?}")));
            }
            if m.start < prev_end || m.end() > compressed_len {
                return Err(bad(format!(
                    "marker {m:?} overlaps or exceeds {compressed_len} elements"
                )));
            }
            expanded_starts.push(m.start + extra);
            extra += m.length * (m.repeat_count - 1);
            prev_end = m.end();
        }
        if compressed_len + extra != original_len {
            return Err(bad(format!(
                "{compressed_len} elements with markers expand to {}, recorded {original_len}",
                compressed_len + extra
            )));
        }
        Ok(Self {
            markers,
            expanded_starts,
            compressed_len,
            original_len,
        })
    }

    /// Markers, ascending by `start`.
    #[inline]
    #[must_use]
    pub fn markers(&self) -> &[RepetitionMarker] {
        &self.markers
    }

    /// Length of this level's compressed array.
    #[inline]
    #[must_use]
    pub const fn compressed_len(&self) -> usize {
        self.compressed_len
    }

    /// Length after expansion.
    #[inline]
    #[must_use]
    pub const fn original_len(&self) -> usize {
        self.original_len
    }

    pub(crate) fn expanded_starts(&self) -> &[usize] {
        &self.expanded_starts
    }

    /// Marker whose stored copy starts at `pos`.
    #[must_use]
    pub fn marker_at(&self, pos: usize) -> Option<&RepetitionMarker> {
        self.markers
            .binary_search_by_key(&pos, |m| m.start)
            .ok()
            .map(|i| &self.markers[i])
    }

    /// Marker whose stored copy ends (exclusive) at `end`.
    #[must_use]
    pub fn marker_ending_at(&self, end: usize) -> Option<&RepetitionMarker> {
        self.markers
            .binary_search_by_key(&end, RepetitionMarker::end)
            .ok()
            .map(|i| &self.markers[i])
    }

    /// Marker whose stored copy contains `pos`.
    #[must_use]
    pub fn marker_containing(&self, pos: usize) -> Option<&RepetitionMarker> {
        let i = self.markers.partition_point(|m| m.start <= pos);
        i.checked_sub(1)
            .map(|i| &self.markers[i])
            .filter(|m| pos < m.end())
    }

    /// Expand `compressed` (this level's array) into the finer sequence.
    pub fn expand(&self, compressed: &[u32], level: usize) -> Result<Vec<u32>> {
        if compressed.len() != self.compressed_len {
            return Err(Error::LengthMismatch {
                level,
                expected: self.compressed_len,
                actual: compressed.len(),
            });
        }
        let mut out = Vec::with_capacity(self.original_len);
        let mut prev = 0;
        for m in &self.markers {
            out.extend_from_slice(&compressed[prev..m.start]);
            let block = &compressed[m.start..m.end()];
            for _ in 0..m.repeat_count {
                out.extend_from_slice(block);
            }
            prev = m.end();
        }
        out.extend_from_slice(&compressed[prev..]);
        if out.len() != self.original_len {
            return Err(Error::LengthMismatch {
                level,
                expected: self.original_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

/* ---------------- Compressed trace ---------------- */

/// Levels plus the fully folded base sequence.
#[derive(Debug)]
pub struct CompressedTrace<S> {
    levels: Vec<RepetitionLevel>,
    base: S,
}

impl<S: IntSequence> CompressedTrace<S> {
    /// A trace with no repetition levels.
    pub const fn uncompressed(base: S) -> Self {
        Self {
            levels: Vec::new(),
            base,
        }
    }

    /// Assemble from stored parts, checking that level sizes chain up.
    pub fn from_parts(levels: Vec<RepetitionLevel>, base: S) -> Result<Self> {
        for (i, pair) in levels.windows(2).enumerate() {
            if pair[0].compressed_len != pair[1].original_len {
                return Err(Error::LengthMismatch {
                    level: i + 1,
                    expected: pair[0].compressed_len,
                    actual: pair[1].original_len,
                });
            }
        }
        if let Some(last) = levels.last() {
            if last.compressed_len != base.len() {
                return Err(Error::LengthMismatch {
                    level: levels.len(),
                    expected: last.compressed_len,
                    actual: base.len(),
                });
            }
        }
        Ok(Self { levels, base })
    }

    /// Expanded length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels
            .first()
            .map_or_else(|| self.base.len(), RepetitionLevel::original_len)
    }

    /// `true` if the expanded trace is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold levels, innermost first.
    #[inline]
    #[must_use]
    pub fn levels(&self) -> &[RepetitionLevel] {
        &self.levels
    }

    /// The base (most compressed) sequence.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> &S {
        &self.base
    }

    /// Mutable base, for in-place relabelling.
    #[inline]
    pub fn base_mut(&mut self) -> &mut S {
        &mut self.base
    }

    /// Split into levels and base.
    #[must_use]
    pub fn into_parts(self) -> (Vec<RepetitionLevel>, S) {
        (self.levels, self.base)
    }

    /// Expand every level in memory, verifying sizes along the way.
    pub fn reconstruct(&mut self) -> Result<Vec<u32>> {
        let mut current = self.base.to_vec()?;
        for (i, level) in self.levels.iter().enumerate().rev() {
            current = level.expand(&current, i)?;
        }
        Ok(current)
    }

    /// Stream the expanded trace into `out` without materialising levels.
    pub fn expand_into<T: IntSequence>(&mut self, out: &mut T) -> Result<()> {
        let mut cursor = self.forward();
        while let Some(v) = crate::cursor::TraceCursor::next(&mut cursor, self)? {
            out.push(v)?;
        }
        Ok(())
    }

    /// Cursor at the first element.
    #[must_use]
    pub fn forward(&self) -> ForwardCursor {
        ForwardCursor::new(self)
    }

    /// Cursor after the last element, walking backwards.
    #[must_use]
    pub fn reverse(&self) -> ReverseCursor {
        ReverseCursor::new(self)
    }
}

/* ---------------- Compressor ---------------- */

/// Builds [`CompressedTrace`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct RepetitionCompressor {
    max_levels: Option<usize>,
}

impl RepetitionCompressor {
    /// Fold until a pass stops shrinking.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_levels: None }
    }

    /// Stop after at most `levels` passes.
    #[must_use]
    pub const fn with_max_levels(levels: usize) -> Self {
        Self {
            max_levels: Some(levels),
        }
    }

    /// Compress an in-memory sequence.
    pub fn compress_vec(&self, input: Vec<u32>) -> Result<CompressedTrace<Vec<u32>>> {
        self.compress(input, || Ok(Vec::new()))
    }

    /// Compress `input`, taking ownership of it. `fresh` supplies empty
    /// sequences for pass outputs; intermediate sequences (including
    /// `input`) are discarded once the next pass exists.
    pub fn compress<S, F>(&self, input: S, mut fresh: F) -> Result<CompressedTrace<S>>
    where
        S: IntSequence,
        F: FnMut() -> Result<S>,
    {
        let mut levels = Vec::new();
        let mut current = input;
        loop {
            if self.max_levels.is_some_and(|max| levels.len() >= max) {
                break;
            }
            let mut next = fresh()?;
            let markers = fold_level(&mut current, &mut next)?;
            if next.len() >= current.len() {
                next.discard()?;
                break;
            }
            let level = RepetitionLevel::new(markers, next.len(), current.len())?;
            debug!(
                level = levels.len(),
                input = current.len(),
                output = next.len(),
                markers = level.markers().len(),
                "folded repetition level"
            );
            levels.push(level);
            std::mem::replace(&mut current, next).discard()?;
        }
        Ok(CompressedTrace {
            levels,
            base: current,
        })
    }
}

/// One fold pass from `input` into `output`; returns the markers, which
/// index into `output`.
pub fn fold_level<I, O>(input: &mut I, output: &mut O) -> Result<Vec<RepetitionMarker>>
where
    I: IntSequence + ?Sized,
    O: IntSequence + ?Sized,
{
    let n = input.len();
    let mut last_seen: HashMap<u32, usize> = HashMap::new();
    let mut markers = Vec::new();
    let mut pending = 0usize;
    let mut written = 0usize;
    let mut i = 0usize;

    while i < n {
        let token = input.get(i)?;
        let Some(p) = last_seen.get(&token).copied() else {
            last_seen.insert(token, i);
            i += 1;
            continue;
        };

        let length = i - p;
        let mut repeats = 0usize;
        if i + length <= n {
            let mut k = 0usize;
            while i + k < n && input.get(p + k)? == input.get(i + k)? {
                k += 1;
                if k % length == 0 {
                    repeats += 1;
                }
            }
        }
        if repeats == 0 {
            last_seen.insert(token, i);
            i += 1;
            continue;
        }

        for pos in pending..p {
            output.push(input.get(pos)?)?;
        }
        written += p - pending;
        markers.push(RepetitionMarker {
            start: written,
            length,
            repeat_count: repeats + 1,
        });
        for pos in p..i {
            output.push(input.get(pos)?)?;
        }
        written += length;

        i += repeats * length;
        last_seen.clear();
        pending = i;
    }

    for pos in pending..n {
        output.push(input.get(pos)?)?;
    }
    Ok(markers)
}
