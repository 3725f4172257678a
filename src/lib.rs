//! ctxprof - in-process control layer for a native sampling profiler
//!
//! This library lets application threads tag their samples with a trace
//! context, and drives sampling sessions through a textual command channel.
//! The context path is a lock-free, tid-indexed storage region that a sampler
//! can read from any thread (or a signal handler) without blocking.
//!
//! ```no_run
//! use ctxprof::Profiler;
//!
//! let profiler = Profiler::instance()?;
//! profiler.start("cpu", 10_000_000)?;
//! profiler.set_context(42, 7);
//! // ... work attributed to span 42 of trace 7 ...
//! profiler.clear_context();
//! profiler.stop()?;
//! println!("{}", profiler.dump_flat(10)?);
//! # Ok::<(), ctxprof::ProfilerError>(())
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("ctxprof requires Linux (gettid and /proc/self/task)");

pub mod arguments;
pub mod cli;
pub mod command;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod profiler;
pub mod session;
pub mod thread_filter;
pub mod tid;

pub use arguments::Counter;
pub use config::ProfilerConfig;
pub use context::{Context, ContextRegion, ContextStorage};
pub use engine::{LocalEngine, NativeEngine};
pub use error::{ProfilerError, Result};
pub use lifecycle::{ManagedThread, ThreadLifecycle, ThreadState};
pub use profiler::Profiler;
pub use session::{SessionController, SessionState};
pub use thread_filter::{FilterGate, FilterOutcome, ThreadFilter};
pub use tid::Tid;
