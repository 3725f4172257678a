//! In-process sampling engine
//!
//! A sampler thread wakes every interval, enumerates the threads of this
//! process, and attributes one sample to each selected thread's current
//! context. It reads the context storage exactly the way a signal-driven
//! engine would: lock-free, keyed by tid, from a thread other than the writer.

use super::dump::{SampleKey, SampleStore};
use super::procfs::{list_tasks, TaskInfo};
use super::NativeEngine;
use crate::arguments::{Action, Arguments, Output, EVENT_CPU, EVENT_WALL};
use crate::config::ProfilerConfig;
use crate::context::ContextStorage;
use crate::error::{ProfilerError, Result};
use crate::thread_filter::ThreadFilter;
use crate::tid::Tid;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SAMPLER_THREAD_NAME: &str = "ctxprof-sampler";

/// Events this engine can sample
pub const SUPPORTED_EVENTS: &[&str] = &[EVENT_CPU, EVENT_WALL];

struct Sampler {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
    event: String,
    interval: u64,
    started_at: Instant,
}

/// Reference engine sampling `/proc/self/task` from a background thread
pub struct LocalEngine {
    config: ProfilerConfig,
    storage: Arc<ContextStorage>,
    filter: Arc<ThreadFilter>,
    samples: Arc<SampleStore>,
    sampler: Mutex<Option<Sampler>>,
}

impl LocalEngine {
    /// Create the engine and map its context storage
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(ContextStorage::new(config.max_tid)?);
        let filter = Arc::new(ThreadFilter::new(config.max_tid));
        debug!(
            max_tid = config.max_tid,
            filter_bytes = filter.byte_len(),
            "Local engine created"
        );
        Ok(Self {
            config,
            storage,
            filter,
            samples: Arc::new(SampleStore::new()),
            sampler: Mutex::new(None),
        })
    }

    pub fn thread_filter(&self) -> &ThreadFilter {
        &self.filter
    }

    pub fn is_sampling(&self) -> bool {
        self.lock_sampler().is_some()
    }

    fn lock_sampler(&self) -> MutexGuard<'_, Option<Sampler>> {
        self.sampler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_event(event: &str) -> Result<()> {
        if SUPPORTED_EVENTS.contains(&event) {
            Ok(())
        } else {
            Err(ProfilerError::Engine(format!("Unsupported event: {event}")))
        }
    }

    /// Sampling interval for `event`, falling back to the configured default
    fn effective_interval(&self, event: &str, requested: u64) -> u64 {
        if requested > 0 {
            return requested;
        }
        match event {
            EVENT_WALL => self.config.default_wall_interval,
            _ => self.config.default_cpu_interval,
        }
    }

    fn write_status(&self, out: &mut dyn Write) -> Result<()> {
        match &*self.lock_sampler() {
            Some(sampler) => writeln!(
                out,
                "Profiling is running for {} seconds ({} every {} ns)",
                sampler.started_at.elapsed().as_secs(),
                sampler.event,
                sampler.interval
            )?,
            None => writeln!(out, "Profiler is not active")?,
        }
        Ok(())
    }
}

impl NativeEngine for LocalEngine {
    fn start(&self, args: &Arguments, reset: bool) -> Result<()> {
        let event = args.event_name().to_string();
        Self::check_event(&event)?;

        let mut slot = self.lock_sampler();
        if slot.is_some() {
            return Err(ProfilerError::InvalidState(
                "Profiler already started".to_string(),
            ));
        }

        if reset {
            self.samples.reset();
        }
        self.filter.set_enabled(args.filter_enabled());

        let interval = self.effective_interval(&event, args.event_interval());
        let tick = Duration::from_nanos(interval.max(self.config.min_sampling_interval));
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let worker = Worker {
            storage: Arc::clone(&self.storage),
            filter: Arc::clone(&self.filter),
            samples: Arc::clone(&self.samples),
            running_only: event == EVENT_CPU,
            interval,
        };

        let handle = thread::Builder::new()
            .name(SAMPLER_THREAD_NAME.to_string())
            .spawn(move || {
                let own = Tid::current();
                loop {
                    match stop_rx.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => worker.tick(own),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        info!(event = %event, interval, reset, "Sampler started");
        *slot = Some(Sampler {
            stop_tx,
            handle,
            event,
            interval,
            started_at: Instant::now(),
        });
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let sampler = self.lock_sampler().take().ok_or_else(|| {
            ProfilerError::InvalidState("Profiler is not active".to_string())
        })?;
        // A full channel means a stop is already pending
        let _ = sampler.stop_tx.try_send(());
        if sampler.handle.join().is_err() {
            warn!("Sampler thread panicked");
        }
        info!(
            seconds = sampler.started_at.elapsed().as_secs(),
            samples = self.samples.total_samples(),
            "Sampler stopped"
        );
        Ok(())
    }

    fn run(&self, args: &Arguments, out: &mut dyn Write) -> Result<()> {
        if args.action.is_session() {
            return Err(ProfilerError::InvalidArgument(
                "session actions are handled by the session controller".to_string(),
            ));
        }
        match args.action {
            Action::Dump => {
                match args.output {
                    Output::Collapsed | Output::None => {
                        self.samples.write_collapsed(out, args.counter)?
                    }
                    Output::Flat => self.samples.write_flat(out, args.flat)?,
                    Output::Traces => self.samples.write_traces(out, args.traces)?,
                }
                debug!(output = ?args.output, "Dump written");
            }
            Action::Status => self.write_status(out)?,
            Action::List => {
                writeln!(out, "Basic events:")?;
                for event in SUPPORTED_EVENTS {
                    writeln!(out, "  {event}")?;
                }
            }
            Action::Version => {
                if args.version_full {
                    writeln!(
                        out,
                        "{} {} (context record {} bytes, {} tids)",
                        env!("CARGO_PKG_NAME"),
                        env!("CARGO_PKG_VERSION"),
                        self.context_record_size(),
                        self.storage.capacity()
                    )?;
                } else {
                    write!(out, "{}", env!("CARGO_PKG_VERSION"))?;
                }
            }
            Action::Check => {
                Self::check_event(args.event_name())?;
                writeln!(out, "OK")?;
            }
            Action::Start | Action::Resume | Action::Stop | Action::None => {}
        }
        Ok(())
    }

    fn total_samples(&self) -> u64 {
        self.samples.total_samples()
    }

    fn filter_thread(&self, tid: Option<Tid>, enable: bool) {
        let tid = tid.unwrap_or_else(Tid::current);
        if enable {
            self.filter.add(tid);
        } else {
            self.filter.remove(tid);
        }
    }

    fn context_storage(&self) -> Option<Arc<ContextStorage>> {
        Some(Arc::clone(&self.storage))
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        if self.is_sampling() {
            let _ = self.stop();
        }
    }
}

/// State moved into the sampler thread
struct Worker {
    storage: Arc<ContextStorage>,
    filter: Arc<ThreadFilter>,
    samples: Arc<SampleStore>,
    running_only: bool,
    interval: u64,
}

impl Worker {
    fn tick(&self, own: Tid) {
        let tasks = match list_tasks() {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Failed to enumerate threads: {}", e);
                return;
            }
        };
        for task in tasks.into_iter().filter(|t| self.selects(t, own)) {
            let context = self.storage.read(task.tid);
            self.samples.record(
                SampleKey {
                    thread: task.name,
                    context,
                },
                self.interval,
            );
        }
    }

    fn selects(&self, task: &TaskInfo, own: Tid) -> bool {
        task.tid != own && self.filter.accept(task.tid) && (!self.running_only || task.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PID_MAX_LIMIT;

    fn engine() -> LocalEngine {
        let mut config = ProfilerConfig::with_max_tid(PID_MAX_LIMIT);
        config.min_sampling_interval = 1_000_000;
        LocalEngine::new(config).unwrap()
    }

    fn run(engine: &LocalEngine, command: &str) -> String {
        let args = Arguments::parse(command).unwrap();
        let mut out = Vec::new();
        engine.run(&args, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_unsupported_event() {
        let engine = engine();
        let args = Arguments::for_event("cache-misses", 0);
        assert!(matches!(
            engine.start(&args, true),
            Err(ProfilerError::Engine(_))
        ));
        assert!(!engine.is_sampling());
    }

    #[test]
    fn test_double_start_rejected() {
        let engine = engine();
        let args = Arguments::for_event("wall", 0);
        engine.start(&args, true).unwrap();
        assert!(matches!(
            engine.start(&args, true),
            Err(ProfilerError::InvalidState(_))
        ));
        engine.stop().unwrap();
        assert!(engine.stop().is_err());
    }

    #[test]
    fn test_wall_samples_idle_threads_with_context() {
        let engine = engine();
        let storage = engine.context_storage().unwrap();
        storage.set(Tid::current(), 77, 7);

        engine.start(&Arguments::for_event("wall", 1_000_000), true).unwrap();
        thread::sleep(Duration::from_millis(100));
        engine.stop().unwrap();

        assert!(engine.total_samples() > 0);
        let collapsed = run(&engine, "collapsed");
        assert!(collapsed.contains("[root=7];[span=77]"), "{collapsed}");
        storage.clear(Tid::current());
    }

    #[test]
    fn test_filter_excludes_unlisted_threads() {
        let engine = engine();
        let args = Arguments::parse("start,wall=1ms,filter").unwrap();
        engine.start(&args, true).unwrap();
        thread::sleep(Duration::from_millis(50));
        engine.stop().unwrap();
        assert_eq!(engine.total_samples(), 0);

        engine.filter_thread(None, true);
        assert!(engine.thread_filter().contains(Tid::current()));
        engine.start(&args, false).unwrap();
        thread::sleep(Duration::from_millis(50));
        engine.stop().unwrap();
        assert!(engine.total_samples() > 0);
        engine.filter_thread(None, false);
    }

    #[test]
    fn test_status_list_version_check() {
        let engine = engine();
        assert_eq!(run(&engine, "status"), "Profiler is not active\n");
        assert!(run(&engine, "list").contains("  wall\n"));
        assert_eq!(run(&engine, "version"), env!("CARGO_PKG_VERSION"));
        assert!(run(&engine, "version=full").contains("context record 24 bytes"));
        assert_eq!(run(&engine, "check,event=wall"), "OK\n");

        let args = Arguments::parse("check,event=lock").unwrap();
        assert!(engine.run(&args, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_session_action_rejected_by_run() {
        let engine = engine();
        let args = Arguments::parse("start").unwrap();
        assert!(matches!(
            engine.run(&args, &mut Vec::new()),
            Err(ProfilerError::InvalidArgument(_))
        ));
    }
}
