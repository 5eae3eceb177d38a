// crates/tracefold-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracefold_archive::{GrammarSource, Involvement, SaveOptions, TraceContainer};
use tracefold_core::codec::{decode_class_id, decode_counter_id};
use tracefold_core::synth::{generate_into, SynthConfig};
use tracefold_core::{GrammarParams, PagedIntegerSequence, StoreConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "tracefold",
    about = "Trace container CLI",
    long_about = "Trace container CLI.\n\nUse this tool to build containers from synthetic execution traces, inspect them, move them, and replay their traces.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    /// TOML file with `[store]`, `[grammar]`, `[synth]` and `[save]` tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build a container from synthetic loop-heavy traces.
    Simulate {
        /// Output container path
        #[arg(long)]
        out: PathBuf,

        /// Number of traces (>0)
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
        traces: u32,

        /// Execution traces (threads) per trace
        #[arg(long, default_value_t = 1)]
        threads: u32,

        /// Statements per execution trace
        #[arg(long, default_value_t = 100_000)]
        length: usize,

        /// How many of the traces fail (the first ones)
        #[arg(long, default_value_t = 1)]
        failing: u32,

        /// Record hit counts instead of plain involvement
        #[arg(long, default_value_t = false)]
        counts: bool,

        /// Base seed; trace t thread k uses `seed + t * threads + k`
        #[arg(long, default_value_t = 0)]
        seed: u64,

        #[command(flatten)]
        save: SaveFlags,
    },

    /// Print a container summary.
    Inspect {
        /// Container path
        path: PathBuf,

        /// Emit JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Load a container and write it elsewhere, copying execution data verbatim.
    Relocate {
        /// Source container
        from: PathBuf,

        /// Destination container
        to: PathBuf,

        #[command(flatten)]
        save: SaveFlags,
    },

    /// Print the statements of one execution trace as `class:counter`.
    Dump {
        /// Container path
        path: PathBuf,

        /// 1-based trace number
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        trace: u64,

        /// 0-based thread number
        #[arg(long, default_value_t = 0)]
        thread: usize,

        /// Walk from the last statement to the first
        #[arg(long, default_value_t = false)]
        reverse: bool,

        /// Stop after this many statements
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Layout switches shared by commands that write a container.
#[derive(Args, Debug, Clone, Copy)]
struct SaveFlags {
    /// Store involvement blobs without zstd
    #[arg(long, default_value_t = false)]
    no_compress: bool,

    /// Store involved node indices instead of one byte per node
    #[arg(long, default_value_t = false)]
    sparse: bool,

    /// Compact node identifiers through a name index
    #[arg(long, default_value_t = false)]
    index_names: bool,

    /// Embed trace-local grammars instead of shared dictionaries
    #[arg(long, default_value_t = false)]
    inline_grammar: bool,

    /// Write involvement as one legacy table
    #[arg(long, default_value_t = false)]
    legacy_table: bool,

    /// Atomically replace an existing output file
    #[arg(long, default_value_t = false)]
    replace: bool,
}

impl SaveFlags {
    /// Command-line switches override the `[save]` table.
    fn apply(self, base: SaveOptions) -> SaveOptions {
        SaveOptions {
            compress: base.compress && !self.no_compress,
            sparse: base.sparse || self.sparse,
            index_names: base.index_names || self.index_names,
            inline_grammar: base.inline_grammar || self.inline_grammar,
            legacy_table: base.legacy_table || self.legacy_table,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    store: StoreConfig,
    grammar: GrammarParams,
    synth: SynthConfig,
    save: SaveOptions,
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.cmd {
        Cmd::Simulate {
            out,
            traces,
            threads,
            length,
            failing,
            counts,
            seed,
            save,
        } => simulate(
            &config,
            &SimulateArgs {
                out,
                traces,
                threads,
                length,
                failing,
                counts,
                seed,
            },
            save,
        ),

        Cmd::Inspect { path, json } => inspect(&config, &path, json),

        Cmd::Relocate { from, to, save } => relocate(&config, &from, &to, save),

        Cmd::Dump {
            path,
            trace,
            thread,
            reverse,
            limit,
        } => dump(&config, &path, trace, thread, reverse, limit),
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let config: CliConfig = toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    config
        .store
        .validate()
        .with_context(|| format!("invalid [store] table in {}", path.display()))?;
    Ok(config)
}

/// Ensure the parent directory for a file exists.
fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", dir.display()))?;
        }
    }
    Ok(())
}

fn write_container(container: &mut TraceContainer, out: &Path, options: &SaveOptions, replace: bool) -> Result<()> {
    ensure_parent_dir(out)?;
    let saved = if replace {
        container.save_replacing(out, options)
    } else {
        container.save(out, options)
    };
    saved.with_context(|| format!("writing container {}", out.display()))
}

struct SimulateArgs {
    out: PathBuf,
    traces: u32,
    threads: u32,
    length: usize,
    failing: u32,
    counts: bool,
    seed: u64,
}

fn simulate(config: &CliConfig, args: &SimulateArgs, save: SaveFlags) -> Result<()> {
    if args.failing > args.traces {
        bail!(
            "failing traces ({}) cannot exceed the number of traces ({})",
            args.failing,
            args.traces
        );
    }
    if args.out.exists() && !save.replace {
        bail!("{} already exists (pass --replace to overwrite)", args.out.display());
    }

    let synth = config.synth.clamped();
    // Counters reach `max_body` when a class has fewer counters than a loop body.
    let per_class = (synth.counters_per_class as usize).max(synth.max_body + 1);
    let nodes: Vec<String> = (0..synth.classes)
        .flat_map(|c| (0..per_class).map(move |k| format!("demo/Class{c}.java:run:{k}")))
        .collect();
    let node_count = nodes.len();
    let mut container = TraceContainer::new(nodes, &config.store).with_grammar_params(config.grammar);

    info!(
        traces = args.traces,
        threads = args.threads,
        length = args.length,
        nodes = node_count,
        "simulating traces"
    );
    for t in 0..args.traces {
        let mut hits = vec![0u32; node_count];
        let mut raws = Vec::new();
        for k in 0..args.threads {
            let seed = args.seed + u64::from(t) * u64::from(args.threads) + u64::from(k);
            let mut raw = PagedIntegerSequence::temporary(&config.store)?;
            generate_into(&mut raw, args.length, &synth, seed)?;
            for i in 0..raw.len() {
                let stmt = raw.get(i)?;
                let node = decode_class_id(stmt) as usize * per_class + decode_counter_id(stmt) as usize;
                if let Some(h) = hits.get_mut(node) {
                    *h = h.saturating_add(1);
                }
            }
            raws.push(raw);
        }

        let involvement = if args.counts {
            Involvement::Count(hits)
        } else {
            Involvement::from_flags(&hits.iter().map(|h| *h > 0).collect::<Vec<_>>())
        };
        let idx = container.add_trace(format!("DemoTest::case{t}"), t >= args.failing, involvement)?;
        for mut raw in raws {
            container
                .add_execution_trace(idx, &mut raw)
                .with_context(|| format!("indexing execution trace of trace {}", t + 1))?;
            raw.discard()?;
        }
    }

    let options = save.apply(config.save);
    write_container(&mut container, &args.out, &options, save.replace)?;

    let grammar = container.grammar();
    println!(
        "Simulated {} traces x {} threads x {} statements -> {} ({} sub-sequences, {} sub-traces)",
        args.traces,
        args.threads,
        args.length,
        args.out.display(),
        grammar.map_or(0, tracefold_core::TraceIndexer::sub_sequence_count),
        grammar.map_or(0, tracefold_core::TraceIndexer::sub_trace_count),
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct TraceSummary {
    number: usize,
    identifier: String,
    successful: bool,
    involved_nodes: usize,
    execution_traces: usize,
}

#[derive(Debug, Serialize)]
struct ContainerSummary {
    path: PathBuf,
    nodes: usize,
    passed: usize,
    failed: usize,
    grammar: GrammarSource,
    sub_sequences: Option<usize>,
    sub_traces: Option<usize>,
    traces: Vec<TraceSummary>,
    most_suspicious: Vec<(String, u32, u32)>,
}

fn inspect(config: &CliConfig, path: &Path, json: bool) -> Result<()> {
    let container =
        TraceContainer::load(path, &config.store).with_context(|| format!("loading container {}", path.display()))?;

    let traces: Vec<TraceSummary> = container
        .traces()
        .iter()
        .enumerate()
        .map(|(i, t)| TraceSummary {
            number: i + 1,
            identifier: t.identifier().to_owned(),
            successful: t.successful(),
            involved_nodes: t.involvement().involved_count(),
            execution_traces: t.execution_trace_count(),
        })
        .collect();
    let passed = traces.iter().filter(|t| t.successful).count();

    // Nodes executed by the most failing and fewest passing traces.
    let mut ranked: Vec<(String, u32, u32)> = container
        .nodes()
        .iter()
        .zip(container.counters())
        .filter(|(_, c)| c.ef > 0)
        .map(|(n, c)| (n.clone(), c.ef, c.ep))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(10);

    let summary = ContainerSummary {
        path: path.to_path_buf(),
        nodes: container.nodes().len(),
        passed,
        failed: traces.len() - passed,
        grammar: container.grammar_source(),
        sub_sequences: container.grammar().map(tracefold_core::TraceIndexer::sub_sequence_count),
        sub_traces: container.grammar().map(tracefold_core::TraceIndexer::sub_trace_count),
        traces,
        most_suspicious: ranked,
    };

    if json {
        let text = serde_json::to_string_pretty(&summary).context("serialize summary")?;
        println!("{text}");
        return Ok(());
    }

    println!("{}", summary.path.display());
    println!(
        "  nodes: {}  traces: {} ({} passed, {} failed)  grammar: {:?}",
        summary.nodes,
        summary.traces.len(),
        summary.passed,
        summary.failed,
        summary.grammar
    );
    if let (Some(s), Some(t)) = (summary.sub_sequences, summary.sub_traces) {
        println!("  dictionaries: {s} sub-sequences, {t} sub-traces");
    }
    for t in &summary.traces {
        println!(
            "  {:>4} {} {} nodes={} threads={}",
            t.number,
            if t.successful { "PASS" } else { "FAIL" },
            t.identifier,
            t.involved_nodes,
            t.execution_traces
        );
    }
    for (node, ef, ep) in &summary.most_suspicious {
        println!("  ef={ef:<4} ep={ep:<4} {node}");
    }
    Ok(())
}

fn relocate(config: &CliConfig, from: &Path, to: &Path, save: SaveFlags) -> Result<()> {
    info!(from=%from.display(), to=%to.display(), "relocating container");
    let mut container =
        TraceContainer::load(from, &config.store).with_context(|| format!("loading container {}", from.display()))?;
    let options = save.apply(config.save);
    write_container(&mut container, to, &options, save.replace)?;
    println!("Relocated {} -> {}", from.display(), to.display());
    Ok(())
}

fn dump(
    config: &CliConfig,
    path: &Path,
    trace: u64,
    thread: usize,
    reverse: bool,
    limit: Option<usize>,
) -> Result<()> {
    let mut container =
        TraceContainer::load(path, &config.store).with_context(|| format!("loading container {}", path.display()))?;
    let index = usize::try_from(trace - 1).context("trace number out of range")?;
    let mut execution = container
        .open_execution_trace(index, thread)
        .with_context(|| format!("opening execution trace {trace}-{thread}"))?;

    let stdout = std::io::stdout();
    let mut w = BufWriter::new(stdout.lock());
    let limit = limit.unwrap_or(usize::MAX);
    let mut n = 0usize;
    let mut emit = |stmt: u32| -> Result<()> {
        writeln!(w, "{}:{}", decode_class_id(stmt), decode_counter_id(stmt))?;
        n += 1;
        Ok(())
    };
    if reverse {
        for stmt in container.statements_rev(&mut execution)?.take(limit) {
            emit(stmt?)?;
        }
    } else {
        for stmt in container.statements(&mut execution)?.take(limit) {
            emit(stmt?)?;
        }
    }
    drop(emit);
    w.flush()?;
    info!(statements = n, "dumped execution trace");
    Ok(())
}
