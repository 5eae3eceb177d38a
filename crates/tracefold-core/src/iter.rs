//! Lazy replay of a [`CompressedTrace`] without expanding it.
//!
//! Each level keeps one [`LevelCursor`]: a position in the level's
//! compressed array and, while a repeated block is being replayed, the
//! block's anchor, length, repeat count and completed passes. A step reads
//! the base element under the outermost cursor, then advances cursors from
//! the outermost level inwards. When an inner level finishes a pass over a
//! repeated block and rewinds to the block start, every outer level is
//! re-seeked to the matching position; seeking is computed from the marker
//! tables, so no per-level reset snapshots are stored.
//!
//! [`ForwardCursor`] supports absolute seeking. [`ReverseCursor`] does not:
//! reverse iteration is single-pass from the end, and
//! `set_to_position` reports [`Error::Unsupported`].
//!
//! Cursors are plain `Clone` values; cloning copies one small tuple per level.

use crate::compress::{CompressedTrace, RepetitionLevel};
use crate::cursor::{CursorIter, TraceCursor};
use crate::error::{Error, Result};
use crate::sequence::IntSequence;

/// Replay state of one level inside a repeated block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Replay {
    /// Forward: block start. Reverse: block end (exclusive).
    anchor: usize,
    block_len: usize,
    repeat_count: usize,
    repeats_done: usize,
}

/// Cursor into one level's compressed array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LevelCursor {
    position: usize,
    replay: Option<Replay>,
}

impl LevelCursor {
    /// Position in the level's compressed array.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// `(anchor, block_len, repeat_count, repeats_done)` while replaying.
    #[must_use]
    pub fn replay(&self) -> Option<(usize, usize, usize, usize)> {
        self.replay
            .map(|r| (r.anchor, r.block_len, r.repeat_count, r.repeats_done))
    }

    const fn at(position: usize) -> Self {
        Self {
            position,
            replay: None,
        }
    }
}

/// Levels below the base; a trace without levels still needs one cursor.
fn depth(levels: &[RepetitionLevel]) -> usize {
    levels.len().max(1)
}

/// Cursor state at level `level` for expanded index `t` (forward).
fn seek_forward(level: Option<&RepetitionLevel>, t: usize) -> LevelCursor {
    let Some(level) = level else {
        return LevelCursor::at(t);
    };
    let starts = level.expanded_starts();
    let k = starts.partition_point(|&s| s <= t);
    let Some(k) = k.checked_sub(1) else {
        return LevelCursor::at(t);
    };
    let m = level.markers()[k];
    let start = starts[k];
    let span = m.expanded_len();
    if t >= start + span {
        return LevelCursor::at(t - (start + span) + m.end());
    }
    let off = t - start;
    if off == 0 {
        return LevelCursor::at(m.start);
    }
    LevelCursor {
        position: m.start + off % m.length,
        replay: Some(Replay {
            anchor: m.start,
            block_len: m.length,
            repeat_count: m.repeat_count,
            repeats_done: off / m.length,
        }),
    }
}

/// Cursor state at level `level` with `t` expanded elements left (reverse).
fn seek_backward(level: Option<&RepetitionLevel>, t: usize) -> LevelCursor {
    let Some(level) = level else {
        return LevelCursor::at(t);
    };
    let Some(last) = t.checked_sub(1) else {
        return LevelCursor::at(0);
    };
    let starts = level.expanded_starts();
    let k = starts.partition_point(|&s| s <= last);
    let Some(k) = k.checked_sub(1) else {
        return LevelCursor::at(t);
    };
    let m = level.markers()[k];
    let start = starts[k];
    let span = m.expanded_len();
    if last >= start + span {
        return LevelCursor::at(t - (start + span) + m.end());
    }
    let off = t - start;
    if off == span {
        return LevelCursor::at(m.end());
    }
    LevelCursor {
        position: m.start + (off - 1) % m.length + 1,
        replay: Some(Replay {
            anchor: m.end(),
            block_len: m.length,
            repeat_count: m.repeat_count,
            repeats_done: (span - off) / m.length,
        }),
    }
}

/* ---------------- Forward ---------------- */

/// Forward cursor over a compressed trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardCursor {
    levels: Vec<LevelCursor>,
    index: usize,
}

impl ForwardCursor {
    pub(crate) fn new<S: IntSequence>(trace: &CompressedTrace<S>) -> Self {
        let mut c = Self {
            levels: vec![LevelCursor::default(); depth(trace.levels())],
            index: 0,
        };
        c.seek(trace.levels(), 0, 0);
        c
    }

    /// Elements produced so far (the next element's expanded index).
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Per-level cursor tuples, innermost level first.
    #[inline]
    #[must_use]
    pub fn level_cursors(&self) -> &[LevelCursor] {
        &self.levels
    }

    /// Whether the next element starts a pass of a repeated block at any level.
    #[must_use]
    pub fn is_start_of_repetition<S: IntSequence>(&self, trace: &CompressedTrace<S>) -> bool {
        self.index < trace.len()
            && self.levels.iter().enumerate().any(|(j, c)| {
                trace.levels().get(j).and_then(|l| l.marker_containing(c.position))
                    .is_some_and(|m| m.start == c.position)
            })
    }

    /// Whether the next element ends a pass of a repeated block at any level.
    #[must_use]
    pub fn is_end_of_repetition<S: IntSequence>(&self, trace: &CompressedTrace<S>) -> bool {
        self.index < trace.len()
            && self.levels.iter().enumerate().any(|(j, c)| {
                trace.levels().get(j).and_then(|l| l.marker_containing(c.position))
                    .is_some_and(|m| m.end() - 1 == c.position)
            })
    }

    fn seek(&mut self, levels: &[RepetitionLevel], from: usize, target: usize) {
        let mut t = target;
        for j in from..self.levels.len() {
            let c = seek_forward(levels.get(j), t);
            self.levels[j] = c;
            t = c.position;
        }
    }

    fn enter_replays(&mut self, levels: &[RepetitionLevel]) {
        for (j, c) in self.levels.iter_mut().enumerate() {
            if c.replay.is_some() {
                continue;
            }
            if let Some(m) = levels.get(j).and_then(|l| l.marker_at(c.position)) {
                c.replay = Some(Replay {
                    anchor: m.start,
                    block_len: m.length,
                    repeat_count: m.repeat_count,
                    repeats_done: 0,
                });
            }
        }
    }

    fn base_position(&self) -> usize {
        self.levels.last().map_or(0, |c| c.position)
    }

    fn first_visit(&self) -> bool {
        self.levels
            .iter()
            .all(|c| c.replay.map_or(true, |r| r.repeats_done == 0))
    }

    fn advance(&mut self, levels: &[RepetitionLevel]) {
        self.index += 1;
        for j in (0..self.levels.len()).rev() {
            let c = &mut self.levels[j];
            c.position += 1;
            let Some(r) = c.replay else { continue };
            if c.position != r.anchor + r.block_len {
                continue;
            }
            let done = r.repeats_done + 1;
            if done < r.repeat_count {
                c.position = r.anchor;
                c.replay = Some(Replay {
                    repeats_done: done,
                    ..r
                });
                self.seek(levels, j + 1, r.anchor);
            } else {
                c.replay = None;
            }
        }
    }

    /// Step and return `(base slot, value, first visit)`.
    fn step<S: IntSequence>(&mut self, trace: &mut CompressedTrace<S>) -> Result<Option<(usize, u32, bool)>> {
        if self.index >= trace.len() {
            return Ok(None);
        }
        self.enter_replays(trace.levels());
        let slot = self.base_position();
        let first = self.first_visit();
        let value = trace.base_mut().get(slot)?;
        self.advance(trace.levels());
        Ok(Some((slot, value, first)))
    }
}

impl<S: IntSequence> TraceCursor<CompressedTrace<S>> for ForwardCursor {
    fn has_next(&self, source: &CompressedTrace<S>) -> bool {
        self.index < source.len()
    }

    fn next(&mut self, source: &mut CompressedTrace<S>) -> Result<Option<u32>> {
        Ok(self.step(source)?.map(|(_, v, _)| v))
    }

    fn peek(&self, source: &mut CompressedTrace<S>) -> Result<Option<u32>> {
        if self.index >= source.len() {
            return Ok(None);
        }
        source.base_mut().get(self.base_position()).map(Some)
    }

    /// Slots shared by repeated passes are rewritten on their first visit
    /// only; later passes return the rewritten value.
    fn process_next_and_replace_with<F>(
        &mut self,
        source: &mut CompressedTrace<S>,
        f: F,
    ) -> Result<Option<u32>>
    where
        F: FnOnce(u32) -> u32,
    {
        let Some((slot, value, first)) = self.step(source)? else {
            return Ok(None);
        };
        if first {
            source.base_mut().replace(slot, f(value))?;
        }
        Ok(Some(value))
    }

    fn set_to_position(&mut self, source: &mut CompressedTrace<S>, index: usize) -> Result<()> {
        let len = source.len();
        if index > len {
            return Err(Error::OutOfBounds { index, len });
        }
        self.seek(source.levels(), 0, index);
        self.index = index;
        Ok(())
    }
}

/* ---------------- Reverse ---------------- */

/// Backward cursor over a compressed trace; starts after the last element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReverseCursor {
    levels: Vec<LevelCursor>,
    remaining: usize,
}

impl ReverseCursor {
    pub(crate) fn new<S: IntSequence>(trace: &CompressedTrace<S>) -> Self {
        let mut c = Self {
            levels: vec![LevelCursor::default(); depth(trace.levels())],
            remaining: trace.len(),
        };
        c.seek(trace.levels(), 0, trace.len());
        c
    }

    /// Elements not yet produced.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }

    /// Whether the next element (in reverse order) is the first one produced
    /// of a repeated block pass, i.e. the block's last element.
    #[must_use]
    pub fn is_start_of_repetition<S: IntSequence>(&self, trace: &CompressedTrace<S>) -> bool {
        self.remaining > 0
            && self.levels.iter().enumerate().any(|(j, c)| {
                c.position.checked_sub(1).is_some_and(|p| {
                    trace.levels().get(j).and_then(|l| l.marker_containing(p))
                        .is_some_and(|m| m.end() - 1 == p)
                })
            })
    }

    /// Whether the next element (in reverse order) closes a pass, i.e. is
    /// the block's first element.
    #[must_use]
    pub fn is_end_of_repetition<S: IntSequence>(&self, trace: &CompressedTrace<S>) -> bool {
        self.remaining > 0
            && self.levels.iter().enumerate().any(|(j, c)| {
                c.position.checked_sub(1).is_some_and(|p| {
                    trace.levels().get(j).and_then(|l| l.marker_containing(p))
                        .is_some_and(|m| m.start == p)
                })
            })
    }

    fn seek(&mut self, levels: &[RepetitionLevel], from: usize, target: usize) {
        let mut t = target;
        for j in from..self.levels.len() {
            let c = seek_backward(levels.get(j), t);
            self.levels[j] = c;
            t = c.position;
        }
    }

    fn enter_replays(&mut self, levels: &[RepetitionLevel]) {
        for (j, c) in self.levels.iter_mut().enumerate() {
            if c.replay.is_some() {
                continue;
            }
            if let Some(m) = levels.get(j).and_then(|l| l.marker_ending_at(c.position)) {
                c.replay = Some(Replay {
                    anchor: m.end(),
                    block_len: m.length,
                    repeat_count: m.repeat_count,
                    repeats_done: 0,
                });
            }
        }
    }

    fn base_slot(&self) -> Option<usize> {
        self.levels.last().and_then(|c| c.position.checked_sub(1))
    }

    fn first_visit(&self) -> bool {
        self.levels
            .iter()
            .all(|c| c.replay.map_or(true, |r| r.repeats_done == 0))
    }

    fn retreat(&mut self, levels: &[RepetitionLevel]) {
        self.remaining -= 1;
        for j in (0..self.levels.len()).rev() {
            let c = &mut self.levels[j];
            c.position = c.position.saturating_sub(1);
            let Some(r) = c.replay else { continue };
            if c.position + r.block_len != r.anchor {
                continue;
            }
            let done = r.repeats_done + 1;
            if done < r.repeat_count {
                c.position = r.anchor;
                c.replay = Some(Replay {
                    repeats_done: done,
                    ..r
                });
                self.seek(levels, j + 1, r.anchor);
            } else {
                c.replay = None;
            }
        }
    }

    fn step<S: IntSequence>(&mut self, trace: &mut CompressedTrace<S>) -> Result<Option<(usize, u32, bool)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.enter_replays(trace.levels());
        let Some(slot) = self.base_slot() else {
            return Ok(None);
        };
        let first = self.first_visit();
        let value = trace.base_mut().get(slot)?;
        self.retreat(trace.levels());
        Ok(Some((slot, value, first)))
    }
}

impl<S: IntSequence> TraceCursor<CompressedTrace<S>> for ReverseCursor {
    fn has_next(&self, _source: &CompressedTrace<S>) -> bool {
        self.remaining > 0
    }

    fn next(&mut self, source: &mut CompressedTrace<S>) -> Result<Option<u32>> {
        Ok(self.step(source)?.map(|(_, v, _)| v))
    }

    fn peek(&self, source: &mut CompressedTrace<S>) -> Result<Option<u32>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.base_slot() {
            Some(slot) => source.base_mut().get(slot).map(Some),
            None => Ok(None),
        }
    }

    /// Same first-visit rule as the forward cursor, in reverse order.
    fn process_next_and_replace_with<F>(
        &mut self,
        source: &mut CompressedTrace<S>,
        f: F,
    ) -> Result<Option<u32>>
    where
        F: FnOnce(u32) -> u32,
    {
        let Some((slot, value, first)) = self.step(source)? else {
            return Ok(None);
        };
        if first {
            source.base_mut().replace(slot, f(value))?;
        }
        Ok(Some(value))
    }

    fn set_to_position(&mut self, _source: &mut CompressedTrace<S>, _index: usize) -> Result<()> {
        Err(Error::Unsupported("absolute seek on a reverse trace cursor"))
    }
}

/* ---------------- Convenience ---------------- */

impl<S: IntSequence> CompressedTrace<S> {
    /// Iterate the expanded trace front to back.
    pub fn iter(&mut self) -> CursorIter<'_, ForwardCursor, Self> {
        self.forward().iter(self)
    }

    /// Iterate the expanded trace back to front.
    pub fn iter_rev(&mut self) -> CursorIter<'_, ReverseCursor, Self> {
        self.reverse().iter(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::RepetitionCompressor;

    fn compress(v: &[u32]) -> CompressedTrace<Vec<u32>> {
        RepetitionCompressor::new().compress_vec(v.to_vec()).unwrap()
    }

    fn forward(t: &mut CompressedTrace<Vec<u32>>) -> Vec<u32> {
        t.iter().collect::<Result<Vec<_>>>().unwrap()
    }

    fn backward(t: &mut CompressedTrace<Vec<u32>>) -> Vec<u32> {
        t.iter_rev().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn nested_repeats_replay_both_ways() {
        let input = vec![1, 2, 1, 2, 3, 1, 2, 1, 2, 3, 7];
        let mut t = compress(&input);
        assert!(t.levels().len() >= 2);
        assert_eq!(forward(&mut t), input);
        let mut rev = input.clone();
        rev.reverse();
        assert_eq!(backward(&mut t), rev);
    }

    #[test]
    fn seek_matches_linear_walk() {
        let input = vec![4, 4, 4, 5, 6, 5, 6, 5, 6, 4, 4, 4, 5, 6, 5, 6, 5, 6, 9];
        let mut t = compress(&input);
        for start in 0..=input.len() {
            let mut c = t.forward();
            c.set_to_position(&mut t, start).unwrap();
            let rest = c.iter(&mut t).collect::<Result<Vec<_>>>().unwrap();
            assert_eq!(rest, input[start..].to_vec(), "seek to {start}");
        }
        let mut c = t.forward();
        assert!(c.set_to_position(&mut t, input.len() + 1).is_err());
    }

    #[test]
    fn reverse_seek_is_unsupported() {
        let mut t = compress(&[1, 2, 1, 2]);
        let mut c = t.reverse();
        let err = c.set_to_position(&mut t, 0).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        // The cursor is untouched and still walks from the end.
        assert_eq!(c.next(&mut t).unwrap(), Some(2));
    }

    #[test]
    fn clone_is_independent() {
        let mut t = compress(&[1, 2, 1, 2, 1, 2, 9]);
        let mut a = t.forward();
        for _ in 0..3 {
            a.next(&mut t).unwrap();
        }
        let mut b = a.clone();
        assert_eq!(a.next(&mut t).unwrap(), Some(2));
        assert_eq!(a.next(&mut t).unwrap(), Some(1));
        assert_eq!(b.peek(&mut t).unwrap(), Some(2));
        assert_eq!(b.next(&mut t).unwrap(), Some(2));
        assert_eq!(b.index(), 4);
    }

    #[test]
    fn repetition_boundaries() {
        let mut t = compress(&[1, 2, 1, 2, 9]);
        let mut c = t.forward();
        assert!(c.is_start_of_repetition(&t));
        assert!(!c.is_end_of_repetition(&t));
        c.next(&mut t).unwrap();
        assert!(c.is_end_of_repetition(&t));
        c.next(&mut t).unwrap();
        assert!(c.is_start_of_repetition(&t));
        c.next(&mut t).unwrap();
        c.next(&mut t).unwrap();
        assert!(!c.is_start_of_repetition(&t));
        assert!(!c.is_end_of_repetition(&t));

        let r = t.reverse();
        assert!(!r.is_start_of_repetition(&t));
    }

    #[test]
    fn relabel_rewrites_each_base_slot_once() {
        let input = vec![3, 4, 3, 4, 3, 4, 5];
        let mut t = compress(&input);
        let mut c = t.forward();
        let mut seen = Vec::new();
        while let Some(v) = c.process_next_and_replace_with(&mut t, |x| x + 10).unwrap() {
            seen.push(v);
        }
        assert_eq!(seen[..2], [3, 4]);
        assert_eq!(t.base(), &vec![13, 14, 15]);
        let expected: Vec<u32> = input.iter().map(|x| x + 10).collect();
        assert_eq!(forward(&mut t), expected);
    }
}
