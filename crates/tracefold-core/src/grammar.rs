//! Shared grammar: deduplicated sub-sequences referenced by many traces.
//!
//! A raw statement trace is cut twice before compression:
//!
//! 1. into *sub-sequences*, maximal runs of statements of one class (capped
//!    at [`GrammarParams::max_run`]), each interned in the node-sequence
//!    store (`sub-sequence id -> encoded statements`);
//! 2. the resulting id stream into *sub-traces* at content-defined
//!    boundaries, each interned in the sub-trace store
//!    (`sub-trace id -> sub-sequence ids`).
//!
//! The sub-trace id stream is then folded by the
//! [`RepetitionCompressor`]. Interning looks candidates up by
//! [`fingerprint_of`] and compares full sequences before reusing an id.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::codec::{decode_class_id, fingerprint_of};
use crate::compress::{CompressedTrace, RepetitionCompressor};
use crate::config::StoreConfig;
use crate::cursor::TraceCursor;
use crate::error::{Error, Result};
use crate::iter::{ForwardCursor, ReverseCursor};
use crate::keyed::{KeyedHeader, MemoryBackend, PageSink, PagedKeyedStore};
use crate::paged::PagedIntegerSequence;
use crate::sequence::IntSequence;

/// Format version of [`GrammarRecord`].
pub const GRAMMAR_VERSION: u16 = 1;

/// How raw traces are cut into dictionary entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarParams {
    /// Longest sub-sequence.
    pub max_run: usize,
    /// A sub-sequence id whose hash is divisible by this ends a sub-trace.
    pub chunk_divisor: u32,
    /// Longest sub-trace, in sub-sequences.
    pub max_chunk: usize,
}

impl Default for GrammarParams {
    fn default() -> Self {
        Self {
            max_run: 64,
            chunk_divisor: 8,
            max_chunk: 32,
        }
    }
}

/// Descriptor of a persisted grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarRecord {
    /// Always [`GRAMMAR_VERSION`] when written by this crate.
    pub version: u16,
    /// Cutting parameters the dictionaries were built with.
    pub params: GrammarParams,
    /// Header of the sub-sequence store.
    pub sub_sequences: KeyedHeader,
    /// Header of the sub-trace store.
    pub sub_traces: KeyedHeader,
}

impl GrammarRecord {
    /// CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out)
            .map_err(|e| Error::corrupt_record("grammar record", e))?;
        Ok(out)
    }

    /// Decode bytes produced by [`Self::to_cbor`].
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let r: Self = ciborium::de::from_reader(bytes)
            .map_err(|e| Error::corrupt_record("grammar record", e))?;
        if r.version > GRAMMAR_VERSION {
            return Err(Error::corrupt_record(
                "grammar record",
                format!("unsupported version {}", r.version),
            ));
        }
        Ok(r)
    }
}

/// Dictionary entries needed by a single trace, stored alongside it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGrammar {
    /// `sub-sequence id -> encoded statements`.
    pub sub_sequences: Vec<(u32, Vec<u32>)>,
    /// `sub-trace id -> sub-sequence ids`.
    pub sub_traces: Vec<(u32, Vec<u32>)>,
}

/* ---------------- Interning ---------------- */

#[derive(Debug)]
struct Interner {
    what: &'static str,
    store: PagedKeyedStore,
    by_fingerprint: HashMap<u64, Vec<u32>>,
    indexed: bool,
    next_id: u32,
    collisions: usize,
}

impl Interner {
    fn new(what: &'static str, store: PagedKeyedStore) -> Self {
        Self {
            what,
            store,
            by_fingerprint: HashMap::new(),
            indexed: false,
            next_id: 0,
            collisions: 0,
        }
    }

    /// Build the fingerprint index from whatever the store already holds.
    fn ensure_indexed(&mut self) -> Result<()> {
        if self.indexed {
            return Ok(());
        }
        let index = &mut self.by_fingerprint;
        let next = &mut self.next_id;
        self.store.for_each(|id, values| {
            index.entry(fingerprint_of(values)).or_default().push(id);
            *next = (*next).max(id.saturating_add(1));
            Ok(())
        })?;
        self.indexed = true;
        Ok(())
    }

    fn intern(&mut self, seq: &[u32]) -> Result<u32> {
        self.ensure_indexed()?;
        let fp = fingerprint_of(seq);
        let candidates = self.by_fingerprint.get(&fp).cloned().unwrap_or_default();
        for id in &candidates {
            if self.store.get(*id)? == Some(seq) {
                return Ok(*id);
            }
        }
        if !candidates.is_empty() {
            self.collisions += 1;
        }
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| Error::corrupt_record(self.what, "id space exhausted"))?;
        self.store.insert(id, seq.to_vec())?;
        self.by_fingerprint.entry(fp).or_default().push(id);
        Ok(id)
    }

    fn lookup(&mut self, id: u32) -> Result<Vec<u32>> {
        self.store
            .get(id)?
            .map(<[u32]>::to_vec)
            .ok_or_else(|| Error::corrupt_record(self.what, format!("unknown id {id}")))
    }
}

/* ---------------- Indexer ---------------- */

/// Owner of the two grammar dictionaries.
#[derive(Debug)]
pub struct TraceIndexer {
    params: GrammarParams,
    config: StoreConfig,
    sub_sequences: Interner,
    sub_traces: Interner,
}

impl TraceIndexer {
    /// Empty grammar backed by temporary page stores.
    pub fn new(params: GrammarParams, config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            params,
            config: config.clone(),
            sub_sequences: Interner::new(
                "sub-sequence store",
                PagedKeyedStore::temporary("nodeSeqs", config)?,
            ),
            sub_traces: Interner::new(
                "sub-trace store",
                PagedKeyedStore::temporary("subTraceSeqs", config)?,
            ),
        })
    }

    /// Grammar over existing stores (e.g. pages inside an archive).
    #[must_use]
    pub fn open(
        params: GrammarParams,
        sub_sequences: PagedKeyedStore,
        sub_traces: PagedKeyedStore,
        config: &StoreConfig,
    ) -> Self {
        Self {
            params,
            config: config.clone(),
            sub_sequences: Interner::new("sub-sequence store", sub_sequences),
            sub_traces: Interner::new("sub-trace store", sub_traces),
        }
    }

    /// In-memory grammar holding exactly the entries of `local`.
    pub fn from_local(local: &LocalGrammar, config: &StoreConfig) -> Result<Self> {
        let mut seqs = PagedKeyedStore::new(Box::new(MemoryBackend::new()), config);
        seqs.replace_all(local.sub_sequences.iter().cloned())?;
        let mut traces = PagedKeyedStore::new(Box::new(MemoryBackend::new()), config);
        traces.replace_all(local.sub_traces.iter().cloned())?;
        Ok(Self::open(GrammarParams::default(), seqs, traces, config))
    }

    /// Cutting parameters.
    #[inline]
    #[must_use]
    pub const fn params(&self) -> GrammarParams {
        self.params
    }

    /// Distinct sub-sequences.
    #[must_use]
    pub const fn sub_sequence_count(&self) -> usize {
        self.sub_sequences.store.len()
    }

    /// Distinct sub-traces.
    #[must_use]
    pub const fn sub_trace_count(&self) -> usize {
        self.sub_traces.store.len()
    }

    /// Fingerprint hits that turned out to be different sequences.
    #[must_use]
    pub const fn fingerprint_collisions(&self) -> usize {
        self.sub_sequences.collisions + self.sub_traces.collisions
    }

    /// Encoded statements of sub-sequence `id`.
    pub fn sub_sequence(&mut self, id: u32) -> Result<Vec<u32>> {
        self.sub_sequences.lookup(id)
    }

    /// Sub-sequence ids of sub-trace `id`.
    pub fn sub_trace(&mut self, id: u32) -> Result<Vec<u32>> {
        self.sub_traces.lookup(id)
    }

    /// Cut, intern and compress `raw`. `fresh` supplies empty sequences for
    /// the sub-trace id stream and every fold pass.
    pub fn index_trace<I, S, F>(&mut self, raw: &mut I, mut fresh: F) -> Result<CompressedTrace<S>>
    where
        I: IntSequence + ?Sized,
        S: IntSequence,
        F: FnMut() -> Result<S>,
    {
        let mut ids = fresh()?;
        let mut run: Vec<u32> = Vec::new();
        let mut chunk: Vec<u32> = Vec::new();

        for i in 0..raw.len() {
            let stmt = raw.get(i)?;
            if let Some(&prev) = run.last() {
                if decode_class_id(prev) != decode_class_id(stmt) || run.len() >= self.params.max_run {
                    self.close_run(&mut run, &mut chunk, &mut ids)?;
                }
            }
            run.push(stmt);
        }
        if !run.is_empty() {
            self.close_run(&mut run, &mut chunk, &mut ids)?;
        }
        if !chunk.is_empty() {
            self.close_chunk(&mut chunk, &mut ids)?;
        }

        debug!(
            statements = raw.len(),
            sub_traces = ids.len(),
            dictionary = self.sub_sequences.store.len(),
            "indexed trace"
        );
        RepetitionCompressor::new().compress(ids, fresh)
    }

    /// [`Self::index_trace`] keeping every intermediate sequence in memory.
    pub fn index_trace_in_memory<I>(&mut self, raw: &mut I) -> Result<CompressedTrace<Vec<u32>>>
    where
        I: IntSequence + ?Sized,
    {
        self.index_trace(raw, || Ok(Vec::new()))
    }

    /// [`Self::index_trace`] with paged intermediate sequences.
    pub fn index_trace_paged<I>(&mut self, raw: &mut I) -> Result<CompressedTrace<PagedIntegerSequence>>
    where
        I: IntSequence + ?Sized,
    {
        let config = self.config.clone();
        self.index_trace(raw, || PagedIntegerSequence::temporary(&config))
    }

    fn close_run<S: IntSequence>(&mut self, run: &mut Vec<u32>, chunk: &mut Vec<u32>, ids: &mut S) -> Result<()> {
        let id = self.sub_sequences.intern(run)?;
        run.clear();
        chunk.push(id);
        if self.is_boundary(id) || chunk.len() >= self.params.max_chunk {
            self.close_chunk(chunk, ids)?;
        }
        Ok(())
    }

    fn close_chunk<S: IntSequence>(&mut self, chunk: &mut Vec<u32>, ids: &mut S) -> Result<()> {
        let id = self.sub_traces.intern(chunk)?;
        chunk.clear();
        ids.push(id)
    }

    fn is_boundary(&self, id: u32) -> bool {
        let divisor = u64::from(self.params.chunk_divisor.max(1));
        xxh3_64(&id.to_le_bytes()) % divisor == 0
    }

    /// Dictionary entries referenced by `trace`.
    ///
    /// Every id the expanded trace yields also occurs in its base, so only
    /// the base is scanned.
    pub fn local_grammar<S: IntSequence>(&mut self, trace: &mut CompressedTrace<S>) -> Result<LocalGrammar> {
        let mut trace_ids = BTreeSet::new();
        let base = trace.base_mut();
        for i in 0..base.len() {
            trace_ids.insert(base.get(i)?);
        }
        let mut sub_traces = BTreeMap::new();
        let mut seq_ids = BTreeSet::new();
        for tid in trace_ids {
            let seqs = self.sub_trace(tid)?;
            seq_ids.extend(seqs.iter().copied());
            sub_traces.insert(tid, seqs);
        }
        let mut sub_sequences = Vec::with_capacity(seq_ids.len());
        for sid in seq_ids {
            sub_sequences.push((sid, self.sub_sequence(sid)?));
        }
        Ok(LocalGrammar {
            sub_sequences,
            sub_traces: sub_traces.into_iter().collect(),
        })
    }

    /// Write both dictionaries to disk/backends.
    pub fn flush(&mut self) -> Result<()> {
        self.sub_sequences.store.flush()?;
        self.sub_traces.store.flush()
    }

    /// Descriptor to persist with the dictionaries.
    #[must_use]
    pub const fn record(&self) -> GrammarRecord {
        GrammarRecord {
            version: GRAMMAR_VERSION,
            params: self.params,
            sub_sequences: self.sub_sequences.store.header(),
            sub_traces: self.sub_traces.store.header(),
        }
    }

    /// Copy both dictionaries page by page into the given sinks.
    pub fn migrate(
        &mut self,
        sub_sequences: &mut dyn PageSink,
        sub_traces: &mut dyn PageSink,
    ) -> Result<GrammarRecord> {
        self.migrate_sub_sequences(sub_sequences)?;
        self.migrate_sub_traces(sub_traces)?;
        Ok(self.record())
    }

    /// Copy the sub-sequence dictionary into `sink`. Returns the page count.
    pub fn migrate_sub_sequences(&mut self, sink: &mut dyn PageSink) -> Result<usize> {
        self.sub_sequences.store.migrate_to(sink)
    }

    /// Copy the sub-trace dictionary into `sink`. Returns the page count.
    pub fn migrate_sub_traces(&mut self, sink: &mut dyn PageSink) -> Result<usize> {
        self.sub_traces.store.migrate_to(sink)
    }

    /// Encoded statements of `trace`, front to back.
    pub fn statements<'a, S: IntSequence>(
        &'a mut self,
        trace: &'a mut CompressedTrace<S>,
    ) -> Statements<'a, S, ForwardCursor> {
        let cursor = trace.forward();
        Statements::new(self, trace, cursor, false)
    }

    /// Encoded statements of `trace`, back to front.
    pub fn statements_rev<'a, S: IntSequence>(
        &'a mut self,
        trace: &'a mut CompressedTrace<S>,
    ) -> Statements<'a, S, ReverseCursor> {
        let cursor = trace.reverse();
        Statements::new(self, trace, cursor, true)
    }
}

/* ---------------- Expansion ---------------- */

/// Lazily expands sub-trace ids down to encoded statements.
#[derive(Debug)]
pub struct Statements<'a, S, C> {
    indexer: &'a mut TraceIndexer,
    trace: &'a mut CompressedTrace<S>,
    cursor: C,
    reverse: bool,
    sub_seqs: Vec<u32>,
    sub_seq_pos: usize,
    stmts: Vec<u32>,
    stmt_pos: usize,
    failed: bool,
}

impl<'a, S, C> Statements<'a, S, C> {
    fn new(indexer: &'a mut TraceIndexer, trace: &'a mut CompressedTrace<S>, cursor: C, reverse: bool) -> Self {
        Self {
            indexer,
            trace,
            cursor,
            reverse,
            sub_seqs: Vec::new(),
            sub_seq_pos: 0,
            stmts: Vec::new(),
            stmt_pos: 0,
            failed: false,
        }
    }
}

impl<S, C> Statements<'_, S, C>
where
    S: IntSequence,
    C: TraceCursor<CompressedTrace<S>>,
{
    fn advance(&mut self) -> Result<Option<u32>> {
        loop {
            if let Some(v) = self.stmts.as_slice().get(self.stmt_pos) {
                self.stmt_pos += 1;
                return Ok(Some(*v));
            }
            if let Some(&sid) = self.sub_seqs.as_slice().get(self.sub_seq_pos) {
                self.sub_seq_pos += 1;
                self.stmts = self.indexer.sub_sequence(sid)?;
                if self.reverse {
                    self.stmts.reverse();
                }
                self.stmt_pos = 0;
                continue;
            }
            let Some(tid) = self.cursor.next(self.trace)? else {
                return Ok(None);
            };
            self.sub_seqs = self.indexer.sub_trace(tid)?;
            if self.reverse {
                self.sub_seqs.reverse();
            }
            self.sub_seq_pos = 0;
        }
    }
}

impl<S, C> Iterator for Statements<'_, S, C>
where
    S: IntSequence,
    C: TraceCursor<CompressedTrace<S>>,
{
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(v) => v.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;

    fn looped() -> Vec<u32> {
        let mut raw = Vec::new();
        for _ in 0..3 {
            for _ in 0..20 {
                raw.extend([encode(1, 1), encode(1, 2), encode(1, 3)]);
                raw.push(encode(2, 7));
            }
            raw.push(encode(3, 9));
        }
        raw
    }

    #[test]
    fn index_then_expand_both_directions() {
        let mut raw = looped();
        let mut g = TraceIndexer::new(GrammarParams::default(), &StoreConfig::default()).unwrap();
        let mut t = g.index_trace_in_memory(&mut raw).unwrap();
        assert!(t.base().len() < raw.len());

        let fwd = g.statements(&mut t).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(fwd, raw);
        let mut rev = g.statements_rev(&mut t).collect::<Result<Vec<_>>>().unwrap();
        rev.reverse();
        assert_eq!(rev, raw);
    }

    #[test]
    fn identical_runs_share_ids_across_traces() {
        let mut g = TraceIndexer::new(GrammarParams::default(), &StoreConfig::default()).unwrap();
        let mut a = looped();
        let mut b = looped();
        g.index_trace_in_memory(&mut a).unwrap();
        let before = (g.sub_sequence_count(), g.sub_trace_count());
        g.index_trace_in_memory(&mut b).unwrap();
        assert_eq!((g.sub_sequence_count(), g.sub_trace_count()), before);
    }

    #[test]
    fn fingerprint_collision_gets_distinct_id() {
        let mut g = TraceIndexer::new(GrammarParams::default(), &StoreConfig::default()).unwrap();
        let x = g.sub_sequences.intern(&[encode(1, 1), encode(1, 5), encode(1, 9)]).unwrap();
        let y = g.sub_sequences.intern(&[encode(1, 1), encode(1, 6), encode(1, 9)]).unwrap();
        let z = g.sub_sequences.intern(&[encode(1, 1), encode(1, 5), encode(1, 9)]).unwrap();
        assert_ne!(x, y);
        assert_eq!(x, z);
        assert_eq!(g.fingerprint_collisions(), 1);
    }

    #[test]
    fn local_grammar_is_self_sufficient() {
        let mut raw = looped();
        let mut g = TraceIndexer::new(GrammarParams::default(), &StoreConfig::default()).unwrap();
        let mut t = g.index_trace_in_memory(&mut raw).unwrap();
        let local = g.local_grammar(&mut t).unwrap();
        let mut alone = TraceIndexer::from_local(&local, &StoreConfig::default()).unwrap();
        let fwd = alone.statements(&mut t).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(fwd, raw);
    }

    #[test]
    fn record_round_trips_through_cbor() {
        let g = TraceIndexer::new(GrammarParams::default(), &StoreConfig::default()).unwrap();
        let r = g.record();
        assert_eq!(GrammarRecord::from_cbor(&r.to_cbor().unwrap()).unwrap(), r);
    }
}
