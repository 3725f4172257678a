//! Boundary to the sampling engine
//!
//! The engine walks stacks, delivers signals and encodes profiles. This crate
//! only drives it: session transitions, command execution, thread filter
//! toggles, and the probes used once to size and map the context storage.
//! [`LocalEngine`] is an in-process engine that samples `/proc/self/task`.

mod dump;
mod local;
mod procfs;

pub use dump::{SampleCounts, SampleKey, SampleStore};
pub use local::LocalEngine;
pub use procfs::{list_tasks, TaskInfo};

use crate::arguments::Arguments;
use crate::context::{ContextStorage, CONTEXT_RECORD_SIZE};
use crate::error::Result;
use crate::tid::Tid;
use std::io::Write;
use std::sync::Arc;

/// Operations the control layer needs from a sampling engine
pub trait NativeEngine: Send + Sync {
    /// Begin sampling; `reset` discards samples from earlier sessions
    fn start(&self, args: &Arguments, reset: bool) -> Result<()>;

    /// Stop sampling, keeping collected samples
    fn stop(&self) -> Result<()>;

    /// Run a non-session command (dump, status, list, version, check)
    fn run(&self, args: &Arguments, out: &mut dyn Write) -> Result<()>;

    /// Samples collected since the last reset
    fn total_samples(&self) -> u64;

    /// Include or exclude a thread; `None` means the calling thread
    fn filter_thread(&self, tid: Option<Tid>, enable: bool);

    /// Pointer width of the engine, in bytes
    fn native_pointer_size(&self) -> usize {
        std::mem::size_of::<usize>()
    }

    /// Stride of one context record, in bytes
    fn context_record_size(&self) -> usize {
        CONTEXT_RECORD_SIZE
    }

    /// The engine-owned context storage region, if it has one
    fn context_storage(&self) -> Option<Arc<ContextStorage>>;
}
