//! Save/load behaviour of whole containers.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use proptest::prelude::*;
use tracefold_archive::{ArchiveReader, Error, GrammarSource, Involvement, SaveOptions, TraceContainer};
use tracefold_core::synth::{generate_trace, SynthConfig};
use tracefold_core::StoreConfig;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn small_pages() -> StoreConfig {
    StoreConfig {
        page_capacity: 64,
        keyed_page_span: 16,
        keyed_cache_pages: 4,
        ..StoreConfig::default()
    }
}

fn node_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("org/pkg/C{}.java:m{}:{i}", i % 3, i % 5)).collect()
}

/// Container with `traces` traces, each carrying `threads` synthetic execution traces.
fn with_execution(traces: usize, threads: usize, cfg: &StoreConfig) -> (TraceContainer, Vec<Vec<Vec<u32>>>) {
    let mut c = TraceContainer::new(node_names(6), cfg);
    let synth = SynthConfig::default();
    let mut raws = Vec::new();
    for t in 0..traces {
        let idx = c
            .add_trace(format!("test{t}"), t % 2 == 0, Involvement::Hit(vec![t as u32 % 6]))
            .unwrap();
        let mut per_thread = Vec::new();
        for th in 0..threads {
            let raw = generate_trace(600, &synth, (t * 31 + th) as u64).unwrap();
            c.add_execution_trace(idx, &mut raw.clone()).unwrap();
            per_thread.push(raw);
        }
        raws.push(per_thread);
    }
    (c, raws)
}

fn rows() -> impl Strategy<Value = Vec<(bool, Vec<bool>)>> {
    (1usize..12).prop_flat_map(|nodes| prop::collection::vec((any::<bool>(), prop::collection::vec(any::<bool>(), nodes)), 0..8))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn save_load_preserves_tables_and_involvement(
        rows in rows(),
        compress in any::<bool>(),
        sparse in any::<bool>(),
        index_names in any::<bool>(),
        legacy_table in any::<bool>(),
    ) {
        let node_count = rows.first().map_or(3, |(_, f)| f.len());
        let cfg = StoreConfig::default();
        let mut c = TraceContainer::new(node_names(node_count), &cfg);
        for (i, (ok, flags)) in rows.iter().enumerate() {
            c.add_trace(format!("t{i}"), *ok, Involvement::from_flags(flags)).unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.zip");
        let options = SaveOptions { compress, sparse, index_names, legacy_table, ..SaveOptions::default() };
        c.save(&path, &options).unwrap();

        let back = TraceContainer::load(&path, &cfg).unwrap();
        prop_assert_eq!(back.nodes(), c.nodes());
        prop_assert_eq!(back.traces().len(), rows.len());
        for (a, b) in back.traces().iter().zip(c.traces()) {
            prop_assert_eq!(a.identifier(), b.identifier());
            prop_assert_eq!(a.successful(), b.successful());
            prop_assert_eq!(a.involvement(), b.involvement());
        }
        prop_assert_eq!(back.counters(), c.counters());
        prop_assert_eq!(back.grammar_source(), GrammarSource::None);
    }
}

#[test]
fn hit_counts_survive_every_flag_combination() {
    let cfg = StoreConfig::default();
    let mut c = TraceContainer::new(node_names(4), &cfg);
    c.add_trace("a", true, Involvement::Count(vec![0, 3, 0, 1])).unwrap();
    c.add_trace("b", false, Involvement::Count(vec![9, 0, 0, 0])).unwrap();
    let dir = tempfile::tempdir().unwrap();

    for (i, (compress, legacy_table)) in [(true, false), (false, false), (true, true), (false, true)]
        .into_iter()
        .enumerate()
    {
        let path = dir.path().join(format!("{i}.zip"));
        let options = SaveOptions { compress, legacy_table, sparse: true, ..SaveOptions::default() };
        c.save(&path, &options).unwrap();
        let back = TraceContainer::load(&path, &cfg).unwrap();
        assert_eq!(back.traces()[0].involvement(), &Involvement::Count(vec![0, 3, 0, 1]));
        assert_eq!(back.traces()[1].involvement().hits(0), 9);
    }
}

#[test]
fn execution_traces_round_trip_through_shared_grammar() {
    let cfg = small_pages();
    let (mut c, raws) = with_execution(3, 2, &cfg);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flows.zip");
    c.save(&path, &SaveOptions::default()).unwrap();

    let reader = ArchiveReader::open(&path).unwrap();
    assert!(reader.contains("grammar").unwrap());
    assert!(reader.contains("3-1.flw").unwrap());
    assert!(!reader.contains("3-2.flw").unwrap());
    assert!(reader.names().unwrap().iter().any(|n| n.starts_with("nodeSeqs/")));

    let mut back = TraceContainer::load(&path, &cfg).unwrap();
    assert_eq!(back.grammar_source(), GrammarSource::Shared);
    for (t, threads) in raws.iter().enumerate() {
        assert_eq!(back.traces()[t].execution_trace_count(), threads.len());
        for (th, raw) in threads.iter().enumerate() {
            assert_eq!(&back.expand_execution_trace(t, th, false).unwrap(), raw);
            let mut rev = raw.clone();
            rev.reverse();
            assert_eq!(back.expand_execution_trace(t, th, true).unwrap(), rev);
        }
    }

    let mut opened = back.open_execution_trace(1, 0).unwrap();
    assert_eq!(opened.entry(), "2-0.flw");
    assert!(!opened.has_local_grammar());
    let first: Vec<u32> = back
        .statements(&mut opened)
        .unwrap()
        .take(5)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(first, raws[1][0][..5]);
}

#[test]
fn inline_grammar_loads_as_trace_local() {
    let cfg = small_pages();
    let (mut c, raws) = with_execution(2, 1, &cfg);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inline.zip");
    c.save(&path, &SaveOptions { inline_grammar: true, ..SaveOptions::default() })
        .unwrap();

    let reader = ArchiveReader::open(&path).unwrap();
    assert!(!reader.contains("grammar").unwrap());

    let mut back = TraceContainer::load(&path, &cfg).unwrap();
    assert_eq!(back.grammar_source(), GrammarSource::TraceLocal);
    assert!(back.open_execution_trace(0, 0).unwrap().has_local_grammar());
    assert_eq!(back.expand_execution_trace(1, 0, false).unwrap(), raws[1][0]);
}

#[test]
fn relocation_copies_execution_data_verbatim() {
    let cfg = small_pages();
    let (mut c, raws) = with_execution(2, 2, &cfg);
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("from.zip");
    let to = dir.path().join("to.zip");
    c.save(&from, &SaveOptions::default()).unwrap();

    let mut moved = TraceContainer::relocate(&from, &to, &SaveOptions::default(), &cfg).unwrap();
    assert_eq!(moved.expand_execution_trace(1, 1, false).unwrap(), raws[1][1]);

    let (a, b) = (ArchiveReader::open(&from).unwrap(), ArchiveReader::open(&to).unwrap());
    for name in a.names().unwrap() {
        if name.ends_with(".flw") || name.ends_with(".page") || name == "grammar" {
            assert_eq!(a.read(&name).unwrap(), b.read(&name).unwrap(), "{name}");
        }
    }
    assert!(matches!(
        TraceContainer::relocate(&from, &to, &SaveOptions::default(), &cfg),
        Err(Error::AlreadyExists(_))
    ));
}

#[test]
fn loaded_container_accepts_new_execution_traces_and_replaces_itself() {
    let cfg = small_pages();
    let (mut c, raws) = with_execution(1, 1, &cfg);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grow.zip");
    c.save(&path, &SaveOptions::default()).unwrap();

    let mut loaded = TraceContainer::load(&path, &cfg).unwrap();
    let extra = generate_trace(400, &SynthConfig::default(), 99).unwrap();
    assert_eq!(loaded.add_execution_trace(0, &mut extra.clone()).unwrap(), 1);
    loaded.save_replacing(&path, &SaveOptions::default()).unwrap();

    let mut back = TraceContainer::load(&path, &cfg).unwrap();
    assert_eq!(back.traces()[0].execution_trace_count(), 2);
    assert_eq!(back.expand_execution_trace(0, 0, false).unwrap(), raws[0][0]);
    assert_eq!(back.expand_execution_trace(0, 1, false).unwrap(), extra);
}

fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn archives_without_status_assume_compressed_dense_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.zip");
    let blob = zstd::encode_all(&[0u8, 1, 0, 1][..], 3).unwrap();
    write_zip(
        &path,
        &[
            ("nodeIdentifiers", b"a\tb\tc".to_vec()),
            ("traceIdentifiers", b"only".to_vec()),
            ("1.trc", blob),
        ],
    );
    let c = TraceContainer::load(&path, &StoreConfig::default()).unwrap();
    assert_eq!(c.nodes(), ["a", "b", "c"]);
    assert!(!c.traces()[0].successful());
    assert_eq!(c.traces()[0].involvement(), &Involvement::Hit(vec![0, 2]));
}

#[test]
fn missing_grammar_without_local_records_fails_on_open() {
    let cfg = small_pages();
    let (mut c, _) = with_execution(1, 1, &cfg);
    let dir = tempfile::tempdir().unwrap();
    let full = dir.path().join("full.zip");
    c.save(&full, &SaveOptions::default()).unwrap();

    let reader = ArchiveReader::open(&full).unwrap();
    let kept: Vec<(String, Vec<u8>)> = reader
        .names()
        .unwrap()
        .into_iter()
        .filter(|n| n != "grammar" && !n.contains('/'))
        .map(|n| {
            let bytes = reader.require(&n).unwrap();
            (n, bytes)
        })
        .collect();
    let stripped = dir.path().join("stripped.zip");
    let entries: Vec<(&str, Vec<u8>)> = kept.iter().map(|(n, b)| (n.as_str(), b.clone())).collect();
    write_zip(&stripped, &entries);

    let back = TraceContainer::load(&stripped, &cfg).unwrap();
    assert_eq!(back.grammar_source(), GrammarSource::TraceLocal);
    assert!(matches!(back.open_execution_trace(0, 0), Err(Error::CorruptEntry { .. })));
}

#[test]
fn trace_count_must_match_identifiers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.zip");
    write_zip(
        &path,
        &[
            ("nodeIdentifiers", b"a".to_vec()),
            ("traceIdentifiers", b"x\ty".to_vec()),
            ("status", vec![0]),
            ("1.trc", vec![1, 1]),
        ],
    );
    assert!(matches!(
        TraceContainer::load(&path, &StoreConfig::default()),
        Err(Error::CorruptEntry { .. })
    ));
}

#[test]
fn detached_grammar_pages_stay_in_the_work_dir() {
    let (mut c, _) = with_execution(1, 1, &small_pages());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("src.zip");
    c.save(&path, &SaveOptions::default()).unwrap();

    let work = tempfile::tempdir().unwrap();
    let cfg = small_pages().with_work_dir(work.path());
    let mut loaded = TraceContainer::load(&path, &cfg).unwrap();
    let extra = generate_trace(400, &SynthConfig::default(), 3).unwrap();
    loaded.add_execution_trace(0, &mut extra.clone()).unwrap();
    assert!(std::fs::read_dir(work.path()).unwrap().count() >= 2);
    assert_eq!(loaded.expand_execution_trace(0, 1, false).unwrap(), extra);

    drop(loaded);
    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
}
