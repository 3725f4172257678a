//! Textual command channel to the engine
//!
//! `execute` accepts the same comma-separated grammar the engine parses (see
//! [`crate::arguments`]). Session actions go through the [`SessionController`]
//! so the session state has a single owner; everything else is handed to the
//! engine with an output sink that is either the returned string or `file=`.

use crate::arguments::{Action, Arguments, Counter, Output};
use crate::error::{require_non_empty, ProfilerError, Result};
use crate::session::SessionController;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::debug;

pub const VERSION_COMMAND: &str = "version";

/// `collapsed,<counter>`
pub fn collapsed_command(counter: Counter) -> String {
    format!("collapsed,{counter}")
}

/// `traces` or `traces=N`; a limit of 0 means all traces
pub fn traces_command(max_traces: usize) -> String {
    limited("traces", max_traces)
}

/// `flat` or `flat=N`; a limit of 0 means all entries
pub fn flat_command(max_methods: usize) -> String {
    limited("flat", max_methods)
}

fn limited(name: &str, limit: usize) -> String {
    if limit == 0 {
        name.to_string()
    } else {
        format!("{name}={limit}")
    }
}

/// Run a command and return its textual result
///
/// With `file=PATH` the output goes to that file and the result is `"OK"`.
pub fn execute(session: &SessionController, command: &str) -> Result<String> {
    let command = require_non_empty(command, "command")?;
    let args = Arguments::parse(command)?;

    if let Some(path) = args.output_file() {
        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);
        dispatch(session, &args, &mut out)?;
        out.flush()?;
        debug!(path = %path, "Command output written to file");
        return Ok("OK".to_string());
    }

    let mut out = Vec::new();
    dispatch(session, &args, &mut out)?;
    String::from_utf8(out)
        .map_err(|e| ProfilerError::Engine(format!("engine produced invalid UTF-8: {e}")))
}

fn dispatch(session: &SessionController, args: &Arguments, out: &mut dyn Write) -> Result<()> {
    match args.action {
        Action::Start | Action::Resume => {
            session.begin(args, args.action == Action::Start)?;
            writeln!(out, "Profiling started")?;
        }
        Action::Stop => {
            session.stop()?;
            if args.output == Output::None {
                writeln!(out, "Profiling stopped")?;
            } else {
                // `stop,<output>` dumps what the session collected
                let dump = Arguments {
                    action: Action::Dump,
                    ..args.clone()
                };
                session.engine().run(&dump, out)?;
            }
        }
        _ => session.engine().run(args, out)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_limit_zero_omits_term() {
        assert_eq!(traces_command(0), "traces");
        assert_eq!(flat_command(0), "flat");
        assert_eq!(traces_command(5), "traces=5");
        assert_eq!(flat_command(12), "flat=12");
    }

    #[test]
    fn test_collapsed_counter_term() {
        assert_eq!(collapsed_command(Counter::Samples), "collapsed,samples");
        assert_eq!(collapsed_command(Counter::Total), "collapsed,total");
    }

    #[test]
    fn test_builders_parse_back() {
        let args = Arguments::parse(&collapsed_command(Counter::Total)).unwrap();
        assert_eq!(args.action, Action::Dump);
        assert_eq!(args.counter, Counter::Total);
        assert_eq!(Arguments::parse(VERSION_COMMAND).unwrap().action, Action::Version);
    }

    proptest! {
        #[test]
        fn prop_limited_commands_carry_limit(limit in 1usize..1_000_000) {
            let traces = Arguments::parse(&traces_command(limit)).unwrap();
            prop_assert_eq!(traces.output, Output::Traces);
            prop_assert_eq!(traces.traces, limit);

            let flat = Arguments::parse(&flat_command(limit)).unwrap();
            prop_assert_eq!(flat.output, Output::Flat);
            prop_assert_eq!(flat.flat, limit);
        }
    }
}
