//! Command grammar understood by the engine
//!
//! A command is a comma-separated list `arg[,arg...]` where each `arg` is
//! `name` or `name=value`:
//!
//! - actions: `start`, `resume`, `stop`, `check`, `status`, `list`, `version[=full]`, `dump`
//! - events: `event=NAME`, `cpu[=INTERVAL]`, `wall[=INTERVAL]`, `interval=N`
//! - output: `collapsed`, `samples`, `total`, `flat[=N]`, `traces[=N]`, `file=PATH`
//! - filtering: `filter[=...]`
//!
//! Intervals accept a unit suffix (`n`, `u`, `m`, `s` for time; `b`, `k`, `g`
//! for bytes). A bare output mode implies the `dump` action.

use crate::error::{ProfilerError, Result};
use std::fmt;

pub const EVENT_CPU: &str = "cpu";
pub const EVENT_WALL: &str = "wall";

const MAX_ENV_KEY: usize = 128;

const NANOS: &[(char, u64)] = &[('n', 1), ('u', 1_000), ('m', 1_000_000), ('s', 1_000_000_000)];
const UNIVERSAL: &[(char, u64)] = &[
    ('n', 1),
    ('u', 1_000),
    ('m', 1_000_000),
    ('s', 1_000_000_000),
    ('b', 1),
    ('k', 1_024),
    ('g', 1_073_741_824),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    None,
    Start,
    Resume,
    Stop,
    Check,
    Status,
    List,
    Version,
    Dump,
}

impl Action {
    /// Actions that change the session state
    pub fn is_session(self) -> bool {
        matches!(self, Self::Start | Self::Resume | Self::Stop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    None,
    Collapsed,
    Flat,
    Traces,
}

/// Which value a collapsed dump reports per stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Counter {
    /// Number of samples
    #[default]
    Samples,
    /// Sum of sampling intervals (nanoseconds)
    Total,
}

impl Counter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Samples => "samples",
            Self::Total => "total",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Arguments {
    pub action: Action,
    pub event: Option<String>,
    pub cpu: Option<u64>,
    pub wall: Option<u64>,
    pub interval: Option<u64>,
    pub output: Output,
    pub counter: Counter,
    /// Maximum flat entries, 0 = no limit
    pub flat: usize,
    /// Maximum traces, 0 = no limit
    pub traces: usize,
    pub file: Option<String>,
    pub filter: Option<String>,
    pub version_full: bool,
}

impl Arguments {
    /// Arguments for a session started through the API rather than a command
    pub fn for_event(event: &str, interval: i64) -> Self {
        let interval = u64::try_from(interval).ok().filter(|&i| i > 0);
        let mut args = Self::default();
        match event {
            EVENT_CPU => args.cpu = Some(interval.unwrap_or(0)),
            EVENT_WALL => args.wall = Some(interval.unwrap_or(0)),
            other => {
                args.event = Some(other.to_string());
                args.interval = interval;
            }
        }
        args
    }

    /// Parse a command string
    ///
    /// Every argument is scanned before the first error is reported.
    pub fn parse(command: &str) -> Result<Self> {
        let mut args = Self::default();
        let mut error: Option<String> = None;

        for arg in command.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (arg, None),
            };
            if let Err(msg) = args.apply(name, value) {
                error.get_or_insert(msg);
            }
        }

        if let Some(msg) = error {
            return Err(ProfilerError::InvalidArgument(msg));
        }

        if args.action == Action::None && args.output != Output::None {
            args.action = Action::Dump;
        }
        Ok(args)
    }

    fn apply(&mut self, name: &str, value: Option<&str>) -> std::result::Result<(), String> {
        match name {
            "start" => self.action = Action::Start,
            "resume" => self.action = Action::Resume,
            "stop" => self.action = Action::Stop,
            "check" => self.action = Action::Check,
            "status" => self.action = Action::Status,
            "list" => self.action = Action::List,
            "dump" => self.action = Action::Dump,
            "version" => {
                self.action = Action::Version;
                self.version_full = value == Some("full");
            }
            "cpu" => self.cpu = Some(optional_units(value, NANOS, "cpu")?),
            "wall" => self.wall = Some(optional_units(value, NANOS, "wall")?),
            "interval" => {
                let interval = value
                    .and_then(|v| parse_units(v, UNIVERSAL))
                    .filter(|&i| i > 0)
                    .ok_or_else(|| "Invalid interval".to_string())?;
                self.interval = Some(interval);
            }
            "event" => match value {
                None | Some("") => return Err("event must not be empty".to_string()),
                Some(_) if self.event.is_some() => {
                    return Err("Duplicate event argument".to_string())
                }
                Some(event) => self.event = Some(event.to_string()),
            },
            "collapsed" => self.output = Output::Collapsed,
            "samples" => self.counter = Counter::Samples,
            "total" => self.counter = Counter::Total,
            "flat" => {
                self.output = Output::Flat;
                self.flat = optional_limit(value, "flat")?;
            }
            "traces" => {
                self.output = Output::Traces;
                self.traces = optional_limit(value, "traces")?;
            }
            "file" => match value {
                None | Some("") => return Err("file must not be empty".to_string()),
                Some(file) => self.file = Some(file.to_string()),
            },
            "filter" => self.filter = Some(value.unwrap_or_default().to_string()),
            unknown => return Err(format!("Unknown argument: {unknown}")),
        }
        Ok(())
    }

    /// Event that a `start`/`resume` should enable
    pub fn event_name(&self) -> &str {
        if let Some(event) = &self.event {
            return event;
        }
        if self.cpu.is_none() && self.wall.is_some() {
            return EVENT_WALL;
        }
        EVENT_CPU
    }

    /// Requested sampling interval for the selected event, 0 = engine default
    pub fn event_interval(&self) -> u64 {
        let specific = match self.event_name() {
            EVENT_CPU => self.cpu,
            EVENT_WALL => self.wall,
            _ => None,
        };
        specific
            .filter(|&i| i > 0)
            .or(self.interval)
            .unwrap_or(0)
    }

    /// Whether samples are restricted to threads in the filter table
    pub fn filter_enabled(&self) -> bool {
        self.filter.is_some()
    }

    /// Output file with `%p`, `%t` and `%{ENV}` patterns expanded
    pub fn output_file(&self) -> Option<String> {
        self.file.as_deref().map(expand_file_pattern)
    }
}

fn optional_units(
    value: Option<&str>,
    multipliers: &[(char, u64)],
    name: &str,
) -> std::result::Result<u64, String> {
    match value {
        None => Ok(0),
        Some(v) => parse_units(v, multipliers).ok_or_else(|| format!("{name} must be >= 0")),
    }
}

fn optional_limit(value: Option<&str>, name: &str) -> std::result::Result<usize, String> {
    match value {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| format!("{name} must be a non-negative integer")),
    }
}

/// Parse a number with an optional unit suffix, e.g. `10ms` or `0x100`
pub fn parse_units(value: &str, multipliers: &[(char, u64)]) -> Option<u64> {
    let digits_end = value
        .find(|c: char| !(c.is_ascii_hexdigit() || c == 'x' || c == 'X'))
        .unwrap_or(value.len());
    // Hex digits overlap with some suffixes ("1b"), so retry without the last char
    let (number, suffix) = match parse_number(&value[..digits_end]) {
        Some(n) => (n, &value[digits_end..]),
        None if digits_end > 0 => (
            parse_number(&value[..digits_end - 1])?,
            &value[digits_end - 1..],
        ),
        None => return None,
    };

    let mut chars = suffix.chars();
    let Some(symbol) = chars.next() else {
        return Some(number);
    };
    let symbol = symbol.to_ascii_lowercase();
    // "ms", "us", "ns" spell the same multiplier as their first letter
    let rest = chars.as_str();
    if !(rest.is_empty() || (rest == "s" && symbol != 's')) {
        return None;
    }
    multipliers
        .iter()
        .find(|(s, _)| *s == symbol)
        .and_then(|(_, m)| number.checked_mul(*m))
}

fn parse_number(digits: &str) -> Option<u64> {
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).ok();
    }
    digits.parse().ok()
}

fn expand_file_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 16);
    let mut rest = pattern;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let mut chars = rest[pos + 1..].chars();
        // A trailing '%' ends the pattern
        let Some(c) = chars.next() else {
            return out;
        };
        rest = chars.as_str();
        match c {
            'p' => out.push_str(&std::process::id().to_string()),
            't' => out.push_str(&timestamp()),
            '{' => {
                let expanded = rest
                    .split_once('}')
                    .and_then(|(key, after)| env_value(key).map(|value| (value, after)));
                match expanded {
                    Some((value, after)) => {
                        out.push_str(&value);
                        rest = after;
                    }
                    // Unset or unterminated: keep the brace and copy the rest as is
                    None => out.push('{'),
                }
            }
            other => out.push(other),
        }
    }
    out.push_str(rest);
    out
}

fn env_value(key: &str) -> Option<String> {
    if key.is_empty() || key.len() >= MAX_ENV_KEY || key.contains(['=', '\0']) {
        return None;
    }
    std::env::var(key).ok()
}

/// Local time as `yyyyMMdd-hhmmss`
fn timestamp() -> String {
    // SAFETY: time(NULL) and localtime_r only write into the provided struct
    unsafe {
        let now = libc::time(std::ptr::null_mut());
        let mut tm: libc::tm = std::mem::zeroed();
        if libc::localtime_r(&now, &mut tm).is_null() {
            return now.to_string();
        }
        format!(
            "{:04}{:02}{:02}-{:02}{:02}{:02}",
            tm.tm_year + 1900,
            tm.tm_mon + 1,
            tm.tm_mday,
            tm.tm_hour,
            tm.tm_min,
            tm.tm_sec
        )
    }
}
