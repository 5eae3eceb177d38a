//! Grammar indexing over synthetic program traces and keyed-store
//! persistence.

use tracefold_core::grammar::GrammarParams;
use tracefold_core::keyed::{DirBackend, MemoryBackend};
use tracefold_core::synth::{generate_into, generate_trace, SynthConfig};
use tracefold_core::{
    KeyedHeader, PagedIntegerSequence, PagedKeyedStore, Result, StoreConfig, TraceIndexer,
};

#[test]
fn synthetic_traces_survive_indexing() {
    let cfg = StoreConfig::default();
    let mut g = TraceIndexer::new(GrammarParams::default(), &cfg).unwrap();

    for seed in 0..4 {
        let mut raw = generate_trace(20_000, &SynthConfig::default(), seed).unwrap();
        let mut t = g.index_trace_in_memory(&mut raw).unwrap();
        assert!(t.base().len() * 4 < raw.len(), "seed {seed}: weak compression");

        let fwd: Vec<u32> = g.statements(&mut t).collect::<Result<_>>().unwrap();
        assert_eq!(fwd, raw, "seed {seed}");
        let mut rev: Vec<u32> = g.statements_rev(&mut t).collect::<Result<_>>().unwrap();
        rev.reverse();
        assert_eq!(rev, raw, "seed {seed}");
    }
}

#[test]
fn paged_indexing_with_small_pages() {
    let cfg = StoreConfig {
        keyed_page_span: 16,
        keyed_cache_pages: 2,
        ..StoreConfig::default().with_page_capacity(64)
    };
    let mut raw = PagedIntegerSequence::temporary(&cfg).unwrap();
    generate_into(&mut raw, 5_000, &SynthConfig::default(), 99).unwrap();

    let mut g = TraceIndexer::new(GrammarParams::default(), &cfg).unwrap();
    let mut t = g.index_trace_paged(&mut raw).unwrap();
    let expected = generate_trace(5_000, &SynthConfig::default(), 99).unwrap();
    let fwd: Vec<u32> = g.statements(&mut t).collect::<Result<_>>().unwrap();
    assert_eq!(fwd, expected);
}

#[test]
fn grammar_migrates_into_other_backends() {
    let cfg = StoreConfig::default();
    let mut g = TraceIndexer::new(GrammarParams::default(), &cfg).unwrap();
    let mut raw = generate_trace(3_000, &SynthConfig::default(), 5).unwrap();
    let mut t = g.index_trace_in_memory(&mut raw).unwrap();

    let mut seqs = MemoryBackend::new();
    let mut traces = MemoryBackend::new();
    let record = g.migrate(&mut seqs, &mut traces).unwrap();
    drop(g);

    let mut reopened = TraceIndexer::open(
        record.params,
        PagedKeyedStore::open(Box::new(seqs), record.sub_sequences, &cfg),
        PagedKeyedStore::open(Box::new(traces), record.sub_traces, &cfg),
        &cfg,
    );
    assert_eq!(reopened.sub_sequence_count(), record.sub_sequences.len);
    let fwd: Vec<u32> = reopened.statements(&mut t).collect::<Result<_>>().unwrap();
    assert_eq!(fwd, raw);

    // Interning against the reopened grammar reuses stored ids.
    let before = reopened.sub_sequence_count();
    reopened.index_trace_in_memory(&mut raw).unwrap();
    assert_eq!(reopened.sub_sequence_count(), before);
}

#[test]
fn keyed_store_persists_in_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreConfig {
        keyed_page_span: 8,
        keyed_cache_pages: 1,
        delete_on_drop: false,
        ..StoreConfig::default()
    };

    let header: KeyedHeader = {
        let backend = DirBackend::new(dir.path(), "k").unwrap();
        let mut store = PagedKeyedStore::new(Box::new(backend), &cfg);
        for key in 0..100u32 {
            store.insert(key, (0..key % 5).collect()).unwrap();
        }
        store.remove(42).unwrap();
        store.flush().unwrap();
        store.header()
    };
    assert_eq!(header.len, 99);

    let backend = DirBackend::new(dir.path(), "k").unwrap();
    let mut store = PagedKeyedStore::open(Box::new(backend), header, &cfg);
    assert_eq!(store.get(42).unwrap(), None);
    assert_eq!(store.get(99).unwrap(), Some(&[0, 1, 2, 3][..]));

    let mut seen = 0;
    store
        .for_each(|key, values| {
            assert_eq!(values.len() as u32, key % 5);
            seen += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(seen, 99);
}

#[test]
fn indexers_sharing_a_work_dir_keep_separate_dictionaries() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreConfig {
        keyed_page_span: 1,
        keyed_cache_pages: 1,
        ..StoreConfig::default().with_work_dir(dir.path())
    };
    let synth = SynthConfig::default();

    let mut a = TraceIndexer::new(GrammarParams::default(), &cfg).unwrap();
    let mut b = TraceIndexer::new(GrammarParams::default(), &cfg).unwrap();
    let mut raw_a = generate_trace(4_000, &synth, 11).unwrap();
    let mut raw_b = generate_trace(4_000, &synth, 12).unwrap();
    let mut t = a.index_trace_in_memory(&mut raw_a).unwrap();
    b.index_trace_in_memory(&mut raw_b).unwrap();
    a.flush().unwrap();
    b.flush().unwrap();

    drop(b);
    a.flush().unwrap();
    let fwd: Vec<u32> = a.statements(&mut t).collect::<Result<_>>().unwrap();
    assert_eq!(fwd, raw_a);

    // A later indexer in the same directory starts empty.
    let c = TraceIndexer::new(GrammarParams::default(), &cfg).unwrap();
    assert_eq!(c.sub_sequence_count(), 0);

    drop((a, c));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
