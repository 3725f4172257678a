// Shared test doubles for the integration tests
//
// RecordingEngine counts every call that reaches the engine boundary so tests
// can assert that rejected input never gets that far.

#![allow(dead_code)]

use ctxprof::arguments::{Action, Arguments};
use ctxprof::context::{ContextStorage, CONTEXT_RECORD_SIZE};
use ctxprof::{NativeEngine, ProfilerError, Result, Tid};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Engine double with scriptable probes and call counters
pub struct RecordingEngine {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub runs: AtomicUsize,
    pub filter_calls: Mutex<Vec<(Option<Tid>, bool)>>,
    pub resets: Mutex<Vec<bool>>,
    pub pointer_size: usize,
    pub record_size: usize,
    pub storage: Option<Arc<ContextStorage>>,
    /// Body written for any dump command
    pub dump_body: String,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            filter_calls: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
            pointer_size: 8,
            record_size: CONTEXT_RECORD_SIZE,
            storage: Some(Arc::new(
                ContextStorage::new(ctxprof::config::PID_MAX_LIMIT).unwrap(),
            )),
            dump_body: "[worker];[root=1];[span=2] 3\n".to_string(),
        }
    }

    pub fn with_probes(pointer_size: usize, record_size: usize) -> Self {
        Self {
            pointer_size,
            record_size,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
            + self.stops.load(Ordering::SeqCst)
            + self.runs.load(Ordering::SeqCst)
            + self.filter_calls.lock().unwrap().len()
    }
}

impl NativeEngine for RecordingEngine {
    fn start(&self, args: &Arguments, reset: bool) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if args.event_name() == "unsupported" {
            return Err(ProfilerError::Engine("Unsupported event".to_string()));
        }
        self.resets.lock().unwrap().push(reset);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run(&self, args: &Arguments, out: &mut dyn Write) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match args.action {
            Action::Dump => out.write_all(self.dump_body.as_bytes())?,
            Action::Version => out.write_all(b"test-engine")?,
            _ => writeln!(out, "{:?}", args.action)?,
        }
        Ok(())
    }

    fn total_samples(&self) -> u64 {
        0
    }

    fn filter_thread(&self, tid: Option<Tid>, enable: bool) {
        self.filter_calls.lock().unwrap().push((tid, enable));
    }

    fn native_pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn context_record_size(&self) -> usize {
        self.record_size
    }

    fn context_storage(&self) -> Option<Arc<ContextStorage>> {
        self.storage.clone()
    }
}
