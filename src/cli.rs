//! CLI argument parsing for the ctxprof demo driver

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON report for machine parsing
    Json,
}

/// Which dump to produce after the workload finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpMode {
    /// One line per (thread, root span, span) with a count
    Collapsed,
    /// Histogram of innermost frames
    Flat,
    /// Per-trace listing
    Traces,
}

/// Value reported per stack in collapsed dumps
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CounterArg {
    Samples,
    Total,
}

#[derive(Parser, Debug)]
#[command(name = "ctxprof")]
#[command(version)]
#[command(
    about = "Run a span-tagged workload under the in-process sampler and dump the profile",
    long_about = None
)]
pub struct Cli {
    /// Sampling event (cpu or wall)
    #[arg(short = 'e', long = "event", default_value = "cpu")]
    pub event: String,

    /// Sampling interval, with optional unit suffix (e.g. 1ms, 500us)
    #[arg(short = 'i', long = "interval", value_name = "INTERVAL")]
    pub interval: Option<String>,

    /// How long the workload runs, in milliseconds
    #[arg(short = 'd', long = "duration", value_name = "MS", default_value = "500")]
    pub duration_ms: u64,

    /// Number of worker threads
    #[arg(short = 't', long = "threads", default_value = "2")]
    pub threads: usize,

    /// Spans each worker opens per trace before starting a new one
    #[arg(long = "spans-per-trace", default_value = "4")]
    pub spans_per_trace: u64,

    /// Only sample worker threads (they add themselves to the thread filter)
    #[arg(long = "filter")]
    pub filter: bool,

    /// Dump produced after the workload
    #[arg(long = "dump", value_enum, default_value = "collapsed")]
    pub dump: DumpMode,

    /// Counter for collapsed dumps
    #[arg(long = "counter", value_enum, default_value = "samples")]
    pub counter: CounterArg,

    /// Maximum traces or flat entries (0 = all)
    #[arg(short = 'n', long = "limit", default_value = "0")]
    pub limit: usize,

    /// Write the dump to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Load profiler configuration from a TOML file
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run a raw engine command instead of the workload (repeatable)
    #[arg(short = 'x', long = "exec", value_name = "COMMAND")]
    pub exec: Vec<String>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Engine command that starts the session described by the flags
    pub fn start_command(&self) -> String {
        let mut command = format!("start,event={}", self.event);
        if let Some(interval) = &self.interval {
            command.push_str(",interval=");
            command.push_str(interval);
        }
        if self.filter {
            command.push_str(",filter");
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["ctxprof"]);
        assert_eq!(cli.event, "cpu");
        assert_eq!(cli.duration_ms, 500);
        assert_eq!(cli.threads, 2);
        assert_eq!(cli.dump, DumpMode::Collapsed);
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(!cli.filter);
        assert!(cli.exec.is_empty());
    }

    #[test]
    fn test_start_command_minimal() {
        let cli = Cli::parse_from(["ctxprof"]);
        assert_eq!(cli.start_command(), "start,event=cpu");
    }

    #[test]
    fn test_start_command_full() {
        let cli = Cli::parse_from(["ctxprof", "-e", "wall", "-i", "2ms", "--filter"]);
        assert_eq!(cli.start_command(), "start,event=wall,interval=2ms,filter");
    }

    #[test]
    fn test_cli_exec_repeatable() {
        let cli = Cli::parse_from(["ctxprof", "-x", "version", "-x", "list"]);
        assert_eq!(cli.exec, vec!["version", "list"]);
    }

    #[test]
    fn test_cli_dump_flat_with_limit() {
        let cli = Cli::parse_from(["ctxprof", "--dump", "flat", "-n", "5", "--format", "json"]);
        assert_eq!(cli.dump, DumpMode::Flat);
        assert_eq!(cli.limit, 5);
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
