use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use tracefold_core::grammar::GrammarParams;
use tracefold_core::synth::{generate_trace, SynthConfig};
use tracefold_core::{
    PagedIntegerSequence, RepetitionCompressor, StoreConfig, TraceCursor, TraceIndexer,
};

fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("repetition_fold");
    for &n in &[10_000usize, 100_000] {
        group.throughput(Throughput::Elements(n as u64));

        // Deterministic input, stable across runs.
        let input = generate_trace(n, &SynthConfig::default(), 2024).expect("synthetic trace");

        group.bench_function(BenchmarkId::new("compress_vec", n), |b| {
            b.iter_batched(
                || input.clone(),
                |v| black_box(RepetitionCompressor::new().compress_vec(v).expect("compress")),
                BatchSize::LargeInput,
            );
        });

        let mut trace = RepetitionCompressor::new()
            .compress_vec(input.clone())
            .expect("compress");
        group.bench_function(BenchmarkId::new("forward_replay", n), |b| {
            b.iter(|| {
                let mut sum = 0u64;
                let mut cursor = trace.forward();
                while let Some(v) = cursor.next(&mut trace).expect("replay") {
                    sum = sum.wrapping_add(u64::from(v));
                }
                black_box(sum)
            });
        });
    }
    group.finish();
}

fn bench_grammar(c: &mut Criterion) {
    let mut group = c.benchmark_group("grammar_index");
    let n = 50_000usize;
    group.throughput(Throughput::Elements(n as u64));
    let input = generate_trace(n, &SynthConfig::default(), 7).expect("synthetic trace");

    group.bench_function("index_trace_in_memory", |b| {
        b.iter_batched(
            || {
                let g = TraceIndexer::new(GrammarParams::default(), &StoreConfig::default())
                    .expect("indexer");
                (g, input.clone())
            },
            |(mut g, mut raw)| black_box(g.index_trace_in_memory(&mut raw).expect("index")),
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

fn bench_paged_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("paged_append");
    let n = 200_000u32;
    group.throughput(Throughput::Elements(u64::from(n)));
    for &capacity in &[1_000usize, 16_384] {
        let cfg = StoreConfig::default().with_page_capacity(capacity);
        group.bench_function(BenchmarkId::new("push_then_flush", capacity), |b| {
            b.iter_batched(
                || PagedIntegerSequence::temporary(&cfg).expect("sequence"),
                |mut seq| {
                    for v in 0..n {
                        seq.push(v).expect("push");
                    }
                    seq.flush().expect("flush");
                    black_box(seq.len())
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compress, bench_grammar, bench_paged_append);
criterion_main!(benches);
