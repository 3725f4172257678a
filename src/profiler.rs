//! Process-wide profiler instance
//!
//! [`Profiler::instance`] builds the profiler on first use and keeps it for
//! the rest of the process; there is no teardown. Embedders and tests that
//! bring their own engine use [`Profiler::with_engine`].

use crate::arguments::Counter;
use crate::command::{self, VERSION_COMMAND};
use crate::config::ProfilerConfig;
use crate::context::{Context, ContextRegion};
use crate::engine::{LocalEngine, NativeEngine};
use crate::error::Result;
use crate::lifecycle::ThreadLifecycle;
use crate::session::{SessionController, SessionState};
use crate::thread_filter::{FilterGate, FilterOutcome};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::info;

static INSTANCE: OnceLock<Profiler> = OnceLock::new();
static INIT: Mutex<()> = Mutex::new(());

pub struct Profiler {
    session: SessionController,
    gate: FilterGate,
    context: ContextRegion,
}

impl Profiler {
    /// The process-wide profiler, created on first call
    ///
    /// Configuration comes from [`ProfilerConfig::from_env`]. A failed
    /// initialization is reported and retried on the next call.
    pub fn instance() -> Result<&'static Profiler> {
        if let Some(profiler) = INSTANCE.get() {
            return Ok(profiler);
        }
        let _guard = INIT.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(profiler) = INSTANCE.get() {
            return Ok(profiler);
        }
        let config = ProfilerConfig::from_env()?;
        let profiler = Self::with_engine(Arc::new(LocalEngine::new(config)?));
        info!(context_enabled = profiler.context_enabled(), "Profiler initialized");
        Ok(INSTANCE.get_or_init(|| profiler))
    }

    /// Build a profiler around an existing engine
    ///
    /// The engine's pointer-width and record-stride probes are consulted
    /// once here to decide whether context writes are enabled.
    pub fn with_engine(engine: Arc<dyn NativeEngine>) -> Self {
        let context = ContextRegion::probe(
            engine.native_pointer_size(),
            engine.context_record_size(),
            engine.context_storage(),
        );
        Self {
            session: SessionController::new(Arc::clone(&engine)),
            gate: FilterGate::new(engine),
            context,
        }
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        self.session.engine()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    // Session surface

    /// Start profiling, discarding samples from earlier sessions
    pub fn start(&self, event: &str, interval: i64) -> Result<()> {
        self.session.start(event, interval)
    }

    /// Start profiling, keeping samples from earlier sessions
    pub fn resume(&self, event: &str, interval: i64) -> Result<()> {
        self.session.resume(event, interval)
    }

    pub fn stop(&self) -> Result<()> {
        self.session.stop()
    }

    /// Samples collected since the last fresh start
    pub fn get_samples(&self) -> u64 {
        self.engine().total_samples()
    }

    pub fn get_version(&self) -> Result<String> {
        self.execute(VERSION_COMMAND)
    }

    // Command surface

    pub fn execute(&self, command: &str) -> Result<String> {
        command::execute(&self.session, command)
    }

    pub fn dump_collapsed(&self, counter: Counter) -> Result<String> {
        self.execute(&command::collapsed_command(counter))
    }

    /// Per-trace listing; `max_traces == 0` lists all
    pub fn dump_traces(&self, max_traces: usize) -> Result<String> {
        self.execute(&command::traces_command(max_traces))
    }

    /// Flat histogram; `max_methods == 0` lists all
    pub fn dump_flat(&self, max_methods: usize) -> Result<String> {
        self.execute(&command::flat_command(max_methods))
    }

    // Thread filter surface

    /// Include `thread` (the calling thread when `None`) in filtered sampling
    pub fn add_thread(&self, thread: Option<&dyn ThreadLifecycle>) -> FilterOutcome {
        self.gate.set_filtered(thread, true)
    }

    /// Exclude `thread` (the calling thread when `None`) from filtered sampling
    pub fn remove_thread(&self, thread: Option<&dyn ThreadLifecycle>) -> FilterOutcome {
        self.gate.set_filtered(thread, false)
    }

    // Context surface

    /// Tag the calling thread's samples with a span and its root span
    ///
    /// A no-op when context propagation is unavailable.
    #[inline]
    pub fn set_context(&self, span_id: u64, root_span_id: u64) {
        self.context.set_context(span_id, root_span_id);
    }

    #[inline]
    pub fn clear_context(&self) {
        self.context.clear_context();
    }

    pub fn current_context(&self) -> Option<Context> {
        self.context.current_context()
    }

    pub fn context_enabled(&self) -> bool {
        self.context.is_enabled()
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("state", &self.session_state())
            .field("context", &self.context)
            .finish()
    }
}
