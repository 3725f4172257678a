use anyhow::{Context as _, Result};
use clap::Parser;
use ctxprof::cli::{Cli, CounterArg, DumpMode, OutputFormat};
use ctxprof::{Counter, LocalEngine, ManagedThread, Profiler, ProfilerConfig};
use serde::Serialize;
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    command: String,
    threads: usize,
    duration_ms: u64,
    samples: u64,
    context_enabled: bool,
    dump: String,
}

fn load_config(args: &Cli) -> Result<ProfilerConfig> {
    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_toml(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ProfilerConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

/// Burn CPU for roughly `budget`
fn spin(budget: Duration) -> u64 {
    let started = Instant::now();
    let mut acc = 0u64;
    while started.elapsed() < budget {
        for i in 0..1_000u64 {
            acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
    }
    acc
}

/// Each worker runs traces of `spans_per_trace` spans, tagging every span
fn run_workload(profiler: &Arc<Profiler>, args: &Cli) -> Result<()> {
    let deadline = Instant::now() + Duration::from_millis(args.duration_ms);
    let mut handles = Vec::with_capacity(args.threads);

    for worker in 0..args.threads {
        let thread = ManagedThread::new(format!("worker-{worker}"));
        let profiler = Arc::clone(profiler);
        let spans_per_trace = args.spans_per_trace.max(1);
        let filter = args.filter;

        let handle = thread.start(move || {
            if filter {
                profiler.add_thread(None);
            }
            let mut trace = 0u64;
            while Instant::now() < deadline {
                trace += 1;
                let root = ((worker as u64 + 1) << 32) | trace;
                for span in 1..=spans_per_trace {
                    profiler.set_context(root + span, root);
                    spin(Duration::from_millis(span));
                }
                profiler.clear_context();
            }
            trace
        })?;
        handles.push((thread, handle));
    }

    for (thread, handle) in handles {
        match handle.join() {
            Ok(traces) => debug!(thread = thread.name(), traces, "Worker finished"),
            Err(_) => anyhow::bail!("worker {} panicked", thread.name()),
        }
    }
    Ok(())
}

fn dump(profiler: &Profiler, args: &Cli) -> Result<String> {
    let text = match args.dump {
        DumpMode::Collapsed => profiler.dump_collapsed(match args.counter {
            CounterArg::Samples => Counter::Samples,
            CounterArg::Total => Counter::Total,
        })?,
        DumpMode::Flat => profiler.dump_flat(args.limit)?,
        DumpMode::Traces => profiler.dump_traces(args.limit)?,
    };
    Ok(text)
}

fn emit(args: &Cli, text: &str) -> Result<()> {
    match &args.output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    if args.threads == 0 {
        anyhow::bail!("Invalid value for --threads: 0 (must be >= 1)");
    }

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let profiler = Arc::new(Profiler::with_engine(Arc::new(LocalEngine::new(config)?)));

    // Raw commands bypass the workload entirely
    if !args.exec.is_empty() {
        for command in &args.exec {
            let result = profiler.execute(command)?;
            print!("{result}");
            if !result.is_empty() && !result.ends_with('\n') {
                println!();
            }
        }
        return Ok(());
    }

    let command = args.start_command();
    profiler.execute(&command)?;
    run_workload(&profiler, &args)?;
    profiler.stop()?;

    let text = dump(&profiler, &args)?;
    match args.format {
        OutputFormat::Text => emit(&args, &text)?,
        OutputFormat::Json => {
            let report = RunReport {
                command,
                threads: args.threads,
                duration_ms: args.duration_ms,
                samples: profiler.get_samples(),
                context_enabled: profiler.context_enabled(),
                dump: text,
            };
            let mut json = serde_json::to_string_pretty(&report)?;
            json.push('\n');
            emit(&args, &json)?;
        }
    }

    Ok(())
}
