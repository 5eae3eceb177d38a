//! The persisted trace container.
//!
//! A container is a zip archive with these entries:
//!
//! | entry | contents |
//! |---|---|
//! | `nodeIdentifiers` | node identifiers joined by tabs |
//! | `traceIdentifiers` | trace identifiers joined by tabs |
//! | `status` | one [`FormatStatus`] byte |
//! | `index` | component-name table, when node names are indexed |
//! | `{n}.trc` | involvement blob of 1-based trace `n` |
//! | `involvementTable` | all blobs in one entry (older archives) |
//! | `{n}-{t}.flw` | execution trace of thread `t` of trace `n` |
//! | `grammar` | CBOR [`GrammarRecord`] of the shared grammar |
//! | `nodeSeqs/`, `subTraceSeqs/` | pages of the two grammar dictionaries |
//!
//! Loading is lazy: involvement is decoded up front, execution traces and
//! dictionary pages are read from the archive when first used.

use std::collections::HashSet;
use std::io::{Seek, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracefold_core::grammar::Statements;
use tracefold_core::keyed::DirBackend;
use tracefold_core::{
    CompressedTrace, ForwardCursor, GrammarParams, GrammarRecord, IntSequence, PagedKeyedStore, ReverseCursor,
    StoreConfig, TraceIndexer,
};
use tracing::{debug, info, warn};
use zip::ZipWriter;

use crate::archive::{entry_options, ArchiveBackend, ArchiveReader, ZipPageSink};
use crate::counters::{spectrum_counters, SpectrumCounters};
use crate::error::{Error, Result};
use crate::flow;
use crate::identifiers::{self, IdentifierIndex};
use crate::involvement::{decode_blob, decode_table, encode_blob, encode_table, Involvement};
use crate::status::{FormatStatus, Layout};

/// Node identifier table.
pub const NODE_IDENTIFIERS: &str = "nodeIdentifiers";
/// Trace identifier table.
pub const TRACE_IDENTIFIERS: &str = "traceIdentifiers";
/// Status byte.
pub const STATUS: &str = "status";
/// Component-name index.
pub const INDEX: &str = "index";
/// Legacy single involvement blob.
pub const INVOLVEMENT_TABLE: &str = "involvementTable";
/// Shared grammar descriptor.
pub const GRAMMAR: &str = "grammar";
/// Directory of sub-sequence dictionary pages.
pub const SUB_SEQUENCE_DIR: &str = "nodeSeqs";
/// Directory of sub-trace dictionary pages.
pub const SUB_TRACE_DIR: &str = "subTraceSeqs";

/// Entry name of the involvement blob of 1-based trace `n`.
#[must_use]
pub fn trace_entry_name(n: usize) -> String {
    format!("{n}.trc")
}

/* ---------------- Options ---------------- */

/// How [`TraceContainer::save`] lays out the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    /// Wrap involvement blobs in zstd frames.
    pub compress: bool,
    /// Store involved node indices instead of one byte per node. Ignored
    /// when any trace carries hit counts.
    pub sparse: bool,
    /// Compact node identifiers through the `index` entry.
    pub index_names: bool,
    /// Embed a trace-local grammar in every execution trace instead of
    /// writing the shared dictionaries.
    pub inline_grammar: bool,
    /// Write all involvement into one `involvementTable` entry.
    pub legacy_table: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            compress: true,
            sparse: false,
            index_names: false,
            inline_grammar: false,
            legacy_table: false,
        }
    }
}

/// Where execution traces find their grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrammarSource {
    /// No execution traces.
    None,
    /// The container's shared dictionaries.
    Shared,
    /// Each execution trace carries its own; the shared grammar was missing.
    TraceLocal,
}

/* ---------------- Traces ---------------- */

#[derive(Clone, Debug)]
enum FlowSlot {
    /// Entry of the archive the container was loaded from.
    Archived(String),
    /// Encoded `.flw` record not yet written anywhere.
    Encoded(Vec<u8>),
}

/// One recorded test run.
#[derive(Clone, Debug)]
pub struct TraceEntry {
    identifier: String,
    successful: bool,
    involvement: Involvement,
    flows: Vec<FlowSlot>,
}

impl TraceEntry {
    /// Trace identifier.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the run passed.
    #[inline]
    #[must_use]
    pub const fn successful(&self) -> bool {
        self.successful
    }

    /// Nodes the run executed.
    #[inline]
    #[must_use]
    pub const fn involvement(&self) -> &Involvement {
        &self.involvement
    }

    /// Recorded threads.
    #[inline]
    #[must_use]
    pub fn execution_trace_count(&self) -> usize {
        self.flows.len()
    }
}

/// An opened execution trace, ready for [`TraceContainer::statements`].
#[derive(Debug)]
pub struct ExecutionTrace {
    entry: String,
    trace: CompressedTrace<Vec<u32>>,
    local: Option<TraceIndexer>,
}

impl ExecutionTrace {
    /// Entry name the trace was read from (or will be written to).
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Compressed sub-trace id stream.
    #[must_use]
    pub const fn compressed(&self) -> &CompressedTrace<Vec<u32>> {
        &self.trace
    }

    /// Whether the record embeds its own grammar.
    #[must_use]
    pub const fn has_local_grammar(&self) -> bool {
        self.local.is_some()
    }
}

/* ---------------- Container ---------------- */

/// Node and trace tables, involvement, and execution traces with their
/// grammar.
#[derive(Debug)]
pub struct TraceContainer {
    nodes: Vec<String>,
    traces: Vec<TraceEntry>,
    grammar: Option<TraceIndexer>,
    grammar_params: GrammarParams,
    grammar_archived: bool,
    grammar_source: GrammarSource,
    source: Option<ArchiveReader>,
    config: StoreConfig,
}

impl TraceContainer {
    /// Empty container over `nodes`.
    #[must_use]
    pub fn new(nodes: Vec<String>, config: &StoreConfig) -> Self {
        Self {
            nodes,
            traces: Vec::new(),
            grammar: None,
            grammar_params: GrammarParams::default(),
            grammar_archived: false,
            grammar_source: GrammarSource::None,
            source: None,
            config: config.clone(),
        }
    }

    /// Cutting parameters for a grammar created by this container.
    #[must_use]
    pub const fn with_grammar_params(mut self, params: GrammarParams) -> Self {
        self.grammar_params = params;
        self
    }

    /// Node identifiers in storage order.
    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// All traces in storage order.
    #[inline]
    #[must_use]
    pub fn traces(&self) -> &[TraceEntry] {
        &self.traces
    }

    /// Trace `index`, 0-based.
    #[must_use]
    pub fn trace(&self, index: usize) -> Option<&TraceEntry> {
        self.traces.get(index)
    }

    /// Where execution traces get their grammar from.
    #[inline]
    #[must_use]
    pub const fn grammar_source(&self) -> GrammarSource {
        self.grammar_source
    }

    /// The shared grammar, if any.
    #[must_use]
    pub const fn grammar(&self) -> Option<&TraceIndexer> {
        self.grammar.as_ref()
    }

    /// Archive this container was loaded from.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_ref().map(ArchiveReader::path)
    }

    /// Per-node pass/fail counters over all traces.
    #[must_use]
    pub fn counters(&self) -> Vec<SpectrumCounters> {
        spectrum_counters(&self.traces, self.nodes.len())
    }

    /// Record a trace. Returns its 0-based index.
    pub fn add_trace(
        &mut self,
        identifier: impl Into<String>,
        successful: bool,
        involvement: Involvement,
    ) -> Result<usize> {
        let identifier = identifier.into();
        if identifier.contains(identifiers::DELIMITER) {
            return Err(Error::InvalidIdentifier(identifier));
        }
        involvement.check(self.nodes.len())?;
        self.traces.push(TraceEntry {
            identifier,
            successful,
            involvement,
            flows: Vec::new(),
        });
        Ok(self.traces.len() - 1)
    }

    /// Index and compress `raw` as the next thread of trace `trace`.
    /// Returns the thread index.
    pub fn add_execution_trace<I>(&mut self, trace: usize, raw: &mut I) -> Result<usize>
    where
        I: IntSequence + ?Sized,
    {
        let len = self.traces.len();
        if trace >= len {
            return Err(tracefold_core::Error::OutOfBounds { index: trace, len }.into());
        }
        let grammar = self.writable_grammar()?;
        let mut compressed = grammar.index_trace_paged(raw)?;
        let bytes = flow::encode(&mut compressed, None)?;
        compressed.into_parts().1.discard()?;

        self.grammar_source = GrammarSource::Shared;
        let flows = &mut self.traces[trace].flows;
        flows.push(FlowSlot::Encoded(bytes));
        Ok(flows.len() - 1)
    }

    /// Shared grammar ready for interning, detached from the source archive
    /// if needed.
    fn writable_grammar(&mut self) -> Result<&mut TraceIndexer> {
        if self.grammar_archived {
            if let Some(g) = self.grammar.as_mut() {
                let work_dir = self.config.work_dir.as_deref();
                let mut seqs = DirBackend::temporary_in(work_dir, SUB_SEQUENCE_DIR)?;
                let mut traces = DirBackend::temporary_in(work_dir, SUB_TRACE_DIR)?;
                let record = g.migrate(&mut seqs, &mut traces)?;
                let seqs = PagedKeyedStore::open(Box::new(seqs), record.sub_sequences, &self.config);
                let traces = PagedKeyedStore::open(Box::new(traces), record.sub_traces, &self.config);
                self.grammar = Some(TraceIndexer::open(record.params, seqs, traces, &self.config));
                debug!("copied shared grammar out of the source archive");
            }
            self.grammar_archived = false;
        }
        let grammar = match self.grammar.take() {
            Some(g) => g,
            None => TraceIndexer::new(self.grammar_params, &self.config)?,
        };
        Ok(self.grammar.insert(grammar))
    }

    /// Open thread `thread` of trace `trace` without expanding it.
    pub fn open_execution_trace(&self, trace: usize, thread: usize) -> Result<ExecutionTrace> {
        let flows = &self
            .traces
            .get(trace)
            .ok_or(tracefold_core::Error::OutOfBounds {
                index: trace,
                len: self.traces.len(),
            })?
            .flows;
        let slot = flows.get(thread).ok_or(tracefold_core::Error::OutOfBounds {
            index: thread,
            len: flows.len(),
        })?;

        let read;
        let (entry, bytes) = match slot {
            FlowSlot::Archived(name) => {
                read = self.archive(name)?.require(name)?;
                (name.clone(), read.as_slice())
            }
            FlowSlot::Encoded(bytes) => (flow::entry_name(trace + 1, thread), bytes.as_slice()),
        };
        let record = flow::decode(bytes, Vec::new())?;
        let local = record
            .local
            .map(|l| TraceIndexer::from_local(&l, &self.config))
            .transpose()?;
        if local.is_none() && self.grammar.is_none() {
            return Err(Error::corrupt(entry, "no grammar available"));
        }
        Ok(ExecutionTrace {
            entry,
            trace: record.trace,
            local,
        })
    }

    fn resolve<'a>(
        &'a mut self,
        execution: &'a mut ExecutionTrace,
    ) -> Result<(&'a mut TraceIndexer, &'a mut CompressedTrace<Vec<u32>>)> {
        let ExecutionTrace { entry, trace, local } = execution;
        let grammar = match local {
            Some(g) => g,
            None => self
                .grammar
                .as_mut()
                .ok_or_else(|| Error::corrupt(entry.as_str(), "no grammar available"))?,
        };
        Ok((grammar, trace))
    }

    /// Encoded statements of `execution`, front to back.
    pub fn statements<'a>(
        &'a mut self,
        execution: &'a mut ExecutionTrace,
    ) -> Result<Statements<'a, Vec<u32>, ForwardCursor>> {
        let (grammar, trace) = self.resolve(execution)?;
        Ok(grammar.statements(trace))
    }

    /// Encoded statements of `execution`, back to front.
    pub fn statements_rev<'a>(
        &'a mut self,
        execution: &'a mut ExecutionTrace,
    ) -> Result<Statements<'a, Vec<u32>, ReverseCursor>> {
        let (grammar, trace) = self.resolve(execution)?;
        Ok(grammar.statements_rev(trace))
    }

    /// Fully expanded statements of one execution trace.
    pub fn expand_execution_trace(&mut self, trace: usize, thread: usize, reverse: bool) -> Result<Vec<u32>> {
        let mut execution = self.open_execution_trace(trace, thread)?;
        let out = if reverse {
            self.statements_rev(&mut execution)?.collect::<tracefold_core::Result<Vec<u32>>>()?
        } else {
            self.statements(&mut execution)?.collect::<tracefold_core::Result<Vec<u32>>>()?
        };
        Ok(out)
    }

    /// Write dirty grammar pages to their backends.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(g) = self.grammar.as_mut() {
            g.flush()?;
        }
        Ok(())
    }

    fn archive(&self, entry: &str) -> Result<&ArchiveReader> {
        self.source
            .as_ref()
            .ok_or_else(|| Error::corrupt(entry, "source archive is not open"))
    }

    /* ---------------- Save ---------------- */

    /// Write the container to `path`, which must not exist.
    pub fn save(&mut self, path: impl AsRef<Path>, options: &SaveOptions) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }
        self.write_to(path, options, false)
    }

    /// Write the container to `path`, atomically replacing any file there.
    ///
    /// Safe when `path` is the archive this container was loaded from.
    pub fn save_replacing(&mut self, path: impl AsRef<Path>, options: &SaveOptions) -> Result<()> {
        self.write_to(path.as_ref(), options, true)
    }

    fn write_to(&mut self, path: &Path, options: &SaveOptions, replace: bool) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".tracefold-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| Error::io(dir, e))?;

        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let summary = self.write_entries(&mut zip, path, options)?;
        zip.finish().map_err(|e| Error::zip(path, e))?;

        let persisted = if replace {
            tmp.persist(path)
        } else {
            tmp.persist_noclobber(path)
        };
        persisted.map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                Error::AlreadyExists(path.to_path_buf())
            } else {
                Error::io(path, e.error)
            }
        })?;

        info!(
            path = %path.display(),
            nodes = self.nodes.len(),
            traces = self.traces.len(),
            execution_traces = summary.flows,
            copied = summary.copied,
            status = summary.status,
            "saved container"
        );
        Ok(())
    }

    fn write_entries<W: Write + Seek>(
        &mut self,
        zip: &mut ZipWriter<W>,
        path: &Path,
        options: &SaveOptions,
    ) -> Result<SaveSummary> {
        let Self {
            nodes,
            traces,
            grammar,
            grammar_archived,
            source,
            ..
        } = self;
        let layout = if traces.iter().any(|t| t.involvement.has_counts()) {
            Layout::Counts
        } else if options.sparse {
            Layout::Sparse
        } else {
            Layout::Dense
        };
        let status = FormatStatus {
            layout,
            compressed: options.compress,
            indexed: options.index_names,
        };
        let mut summary = SaveSummary {
            status: status.to_byte(),
            ..SaveSummary::default()
        };

        let node_table = if options.index_names {
            let mut index = IdentifierIndex::new();
            let compacted = nodes.iter().map(|n| index.compact(n)).collect::<Result<Vec<_>>>()?;
            put(zip, path, INDEX, identifiers::join(index.names().iter().map(String::as_str))?.as_bytes())?;
            identifiers::join(compacted.iter().map(String::as_str))?
        } else {
            identifiers::join(nodes.iter().map(String::as_str))?
        };
        put(zip, path, NODE_IDENTIFIERS, node_table.as_bytes())?;
        put(
            zip,
            path,
            TRACE_IDENTIFIERS,
            identifiers::join(traces.iter().map(|t| t.identifier.as_str()))?.as_bytes(),
        )?;
        put(zip, path, STATUS, &[summary.status])?;

        let node_count = nodes.len();
        if options.legacy_table {
            let rows = traces.iter().map(|t| (&t.involvement, t.successful));
            let blob = encode_table(rows, node_count, layout, options.compress)?;
            put(zip, path, INVOLVEMENT_TABLE, &blob)?;
        } else {
            for (i, t) in traces.iter().enumerate() {
                let blob = encode_blob(&t.involvement, t.successful, node_count, layout, options.compress)?;
                put(zip, path, &trace_entry_name(i + 1), &blob)?;
            }
        }

        let inline = options.inline_grammar && grammar.is_some();
        for (i, t) in traces.iter().enumerate() {
            for (thread, slot) in t.flows.iter().enumerate() {
                let name = flow::entry_name(i + 1, thread);
                match (slot, grammar.as_mut().filter(|_| inline)) {
                    (FlowSlot::Archived(from), None) => {
                        archived(source.as_ref(), from)?.copy_raw(from, &name, zip)?;
                        summary.copied += 1;
                    }
                    (FlowSlot::Encoded(bytes), None) => put(zip, path, &name, bytes)?,
                    (FlowSlot::Archived(from), Some(g)) => {
                        let bytes = archived(source.as_ref(), from)?.require(from)?;
                        put(zip, path, &name, &with_local_grammar(g, &bytes)?)?;
                    }
                    (FlowSlot::Encoded(bytes), Some(g)) => {
                        put(zip, path, &name, &with_local_grammar(g, bytes)?)?;
                    }
                }
                summary.flows += 1;
            }
        }

        if summary.flows > 0 && !inline {
            if let Some(g) = grammar.as_mut() {
                if *grammar_archived {
                    let reader = archived(source.as_ref(), GRAMMAR)?;
                    let dirs = [format!("{SUB_SEQUENCE_DIR}/"), format!("{SUB_TRACE_DIR}/")];
                    for name in reader.names()? {
                        if name == GRAMMAR || dirs.iter().any(|d| name.starts_with(d.as_str())) {
                            reader.copy_raw(&name, &name, zip)?;
                            summary.copied += 1;
                        }
                    }
                } else {
                    g.migrate_sub_sequences(&mut ZipPageSink::new(zip, SUB_SEQUENCE_DIR))?;
                    g.migrate_sub_traces(&mut ZipPageSink::new(zip, SUB_TRACE_DIR))?;
                    put(zip, path, GRAMMAR, &g.record().to_cbor()?)?;
                }
            }
        }
        Ok(summary)
    }

    /* ---------------- Load ---------------- */

    /// Open the container at `path`.
    pub fn load(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let reader = ArchiveReader::open(path)?;

        let status = match reader.read(STATUS)? {
            Some(bytes) => match bytes.as_slice() {
                [b] => FormatStatus::from_byte(*b)?,
                other => return Err(Error::corrupt(STATUS, format!("{} bytes", other.len()))),
            },
            None => {
                warn!(path = %path.display(), "no status entry, assuming compressed dense involvement");
                FormatStatus::LEGACY_DEFAULT
            }
        };

        let mut nodes = identifiers::split(&text(&reader, NODE_IDENTIFIERS)?);
        if status.indexed {
            let index = IdentifierIndex::from_table(&text(&reader, INDEX)?);
            nodes = nodes.iter().map(|n| index.expand(n)).collect::<Result<_>>()?;
        }
        let trace_ids = identifiers::split(&text(&reader, TRACE_IDENTIFIERS)?);

        let rows = if let Some(blob) = reader.read(INVOLVEMENT_TABLE)? {
            debug!("reading legacy involvement table");
            decode_table(&blob, nodes.len(), status.layout, status.compressed)?
        } else {
            let mut rows = Vec::with_capacity(trace_ids.len());
            while let Some(blob) = reader.read(&trace_entry_name(rows.len() + 1))? {
                rows.push(decode_blob(&blob, nodes.len(), status.layout, status.compressed)?);
            }
            rows
        };
        if rows.len() != trace_ids.len() {
            return Err(Error::corrupt(
                TRACE_IDENTIFIERS,
                format!("{} identifiers for {} involvement rows", trace_ids.len(), rows.len()),
            ));
        }

        let names = reader.names()?;
        let present: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut flow_count = 0;
        let traces: Vec<TraceEntry> = trace_ids
            .into_iter()
            .zip(rows)
            .enumerate()
            .map(|(i, (identifier, (successful, involvement)))| {
                let mut flows = Vec::new();
                loop {
                    let name = flow::entry_name(i + 1, flows.len());
                    if !present.contains(name.as_str()) {
                        break;
                    }
                    flows.push(FlowSlot::Archived(name));
                }
                flow_count += flows.len();
                TraceEntry {
                    identifier,
                    successful,
                    involvement,
                    flows,
                }
            })
            .collect();

        let mut grammar_params = GrammarParams::default();
        let (grammar, grammar_source) = match reader.read(GRAMMAR)? {
            Some(bytes) => {
                let record = GrammarRecord::from_cbor(&bytes)?;
                grammar_params = record.params;
                let seqs = PagedKeyedStore::open(
                    Box::new(ArchiveBackend::new(reader.clone(), SUB_SEQUENCE_DIR)),
                    record.sub_sequences,
                    config,
                );
                let subs = PagedKeyedStore::open(
                    Box::new(ArchiveBackend::new(reader.clone(), SUB_TRACE_DIR)),
                    record.sub_traces,
                    config,
                );
                (
                    Some(TraceIndexer::open(record.params, seqs, subs, config)),
                    GrammarSource::Shared,
                )
            }
            None if flow_count > 0 => {
                warn!(
                    path = %path.display(),
                    execution_traces = flow_count,
                    "shared grammar missing, assuming trace-local grammars"
                );
                (None, GrammarSource::TraceLocal)
            }
            None => (None, GrammarSource::None),
        };

        info!(
            path = %path.display(),
            nodes = nodes.len(),
            traces = traces.len(),
            execution_traces = flow_count,
            status = status.to_byte(),
            "loaded container"
        );
        Ok(Self {
            nodes,
            traces,
            grammar_archived: grammar.is_some(),
            grammar,
            grammar_params,
            grammar_source,
            source: Some(reader),
            config: config.clone(),
        })
    }

    /// Load `from` and save it to `to`, copying untouched execution data
    /// verbatim.
    pub fn relocate(
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        options: &SaveOptions,
        config: &StoreConfig,
    ) -> Result<Self> {
        let mut container = Self::load(from, config)?;
        container.save(to, options)?;
        Ok(container)
    }
}

#[derive(Debug, Default)]
struct SaveSummary {
    status: u8,
    flows: usize,
    copied: usize,
}

fn put<W: Write + Seek>(zip: &mut ZipWriter<W>, path: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    zip.start_file(name, entry_options())
        .map_err(|e| Error::zip(path, e))?;
    zip.write_all(bytes).map_err(|e| Error::io(path, e))
}

fn text(reader: &ArchiveReader, name: &str) -> Result<String> {
    String::from_utf8(reader.require(name)?).map_err(|e| Error::corrupt(name, e))
}

fn archived<'a>(source: Option<&'a ArchiveReader>, entry: &str) -> Result<&'a ArchiveReader> {
    source.ok_or_else(|| Error::corrupt(entry, "source archive is not open"))
}

/// Re-encode a `.flw` record with the dictionary entries it references.
fn with_local_grammar(grammar: &mut TraceIndexer, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut record = flow::decode(bytes, Vec::new())?;
    if record.local.is_some() {
        return Ok(bytes.to_vec());
    }
    let local = grammar.local_grammar(&mut record.trace)?;
    flow::encode(&mut record.trace, Some(&local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracefold_core::codec::encode;

    fn nodes() -> Vec<String> {
        vec!["org/a/A.java:run:3".into(), "org/a/A.java:run:4".into(), "org/b/B.java:go:9".into()]
    }

    #[test]
    fn add_trace_validates_input() {
        let mut c = TraceContainer::new(nodes(), &StoreConfig::default());
        assert!(matches!(
            c.add_trace("a\tb", true, Involvement::Hit(vec![])),
            Err(Error::InvalidIdentifier(_))
        ));
        assert!(c.add_trace("t", true, Involvement::Hit(vec![3])).is_err());
        assert_eq!(c.add_trace("t", true, Involvement::Hit(vec![0, 2])).unwrap(), 0);
        assert!(c.add_execution_trace(1, &mut vec![encode(1, 1)]).is_err());
    }

    #[test]
    fn execution_traces_expand_before_saving() {
        let mut c = TraceContainer::new(nodes(), &StoreConfig::default());
        c.add_trace("t", false, Involvement::Hit(vec![1])).unwrap();
        let mut raw: Vec<u32> = (0..40).map(|i| encode(i % 3, i % 5)).collect();
        assert_eq!(c.add_execution_trace(0, &mut raw.clone()).unwrap(), 0);
        assert_eq!(c.grammar_source(), GrammarSource::Shared);
        assert_eq!(c.expand_execution_trace(0, 0, false).unwrap(), raw);
        raw.reverse();
        assert_eq!(c.expand_execution_trace(0, 0, true).unwrap(), raw);
        assert!(c.open_execution_trace(0, 1).is_err());
    }

    #[test]
    fn save_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.zip");
        std::fs::write(&path, b"keep").unwrap();
        let mut c = TraceContainer::new(nodes(), &StoreConfig::default());
        let err = c.save(&path, &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep");
    }
}
