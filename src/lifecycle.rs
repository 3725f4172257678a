//! Thread lifecycle capability
//!
//! The filter gate must not toggle a thread that has not started yet or has
//! already exited. It does not track lifecycles itself; it asks the owner of
//! the thread to run a closure while the thread is pinned in its current state.
//! [`ManagedThread`] is a std-based owner that publishes its state transitions
//! under the same mutex it hands to that closure.

use crate::error::{ProfilerError, Result};
use crate::tid::Tid;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

/// Lifecycle state of a thread as seen by the filter gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but not yet running
    New,
    /// Running or schedulable
    Runnable,
    /// Exited
    Terminated,
}

impl ThreadState {
    /// Only a schedulable thread has state worth filtering
    pub fn is_schedulable(self) -> bool {
        self == Self::Runnable
    }
}

/// Owner of a thread's lifecycle transitions
pub trait ThreadLifecycle: Send + Sync {
    /// Whether this handle denotes the calling thread
    fn is_current(&self) -> bool;

    /// Run `action` while the thread cannot enter or leave [`ThreadState::Runnable`]
    ///
    /// The tid is present whenever the state is `Runnable`.
    fn with_pinned_state(&self, action: &mut dyn FnMut(ThreadState, Option<Tid>));
}

#[derive(Debug)]
struct Slot {
    state: ThreadState,
    tid: Option<Tid>,
    id: Option<ThreadId>,
}

#[derive(Debug)]
struct Shared {
    name: String,
    slot: Mutex<Slot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A thread whose lifecycle transitions are observable and lockable
///
/// # Example
///
/// ```
/// use ctxprof::lifecycle::{ManagedThread, ThreadState};
///
/// let worker = ManagedThread::new("worker");
/// assert_eq!(worker.state(), ThreadState::New);
/// let handle = worker.start(|| 40 + 2).unwrap();
/// assert_eq!(handle.join().unwrap(), 42);
/// assert_eq!(worker.state(), ThreadState::Terminated);
/// ```
#[derive(Debug, Clone)]
pub struct ManagedThread {
    shared: Arc<Shared>,
}

impl ManagedThread {
    /// Create a handle for a thread that has not started yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                slot: Mutex::new(Slot {
                    state: ThreadState::New,
                    tid: None,
                    id: None,
                }),
            }),
        }
    }

    /// Handle for the calling thread, already runnable
    ///
    /// The handle never reports `Terminated`; the calling thread's exit is not
    /// observed.
    pub fn attach_current() -> Self {
        let current = thread::current();
        let name = current.name().unwrap_or("unnamed").to_string();
        let this = Self::new(name);
        {
            let mut slot = this.shared.lock();
            slot.state = ThreadState::Runnable;
            slot.tid = Some(Tid::current());
            slot.id = Some(current.id());
        }
        this
    }

    /// Spawn the thread and run `f` on it
    ///
    /// Fails with `InvalidState` when the thread was already started.
    pub fn start<F, T>(&self, f: F) -> Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.lock().state != ThreadState::New {
            return Err(ProfilerError::InvalidState(format!(
                "thread {} already started",
                self.shared.name
            )));
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || {
                let _running = RunningGuard::enter(shared);
                f()
            })?;
        Ok(handle)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ThreadState {
        self.shared.lock().state
    }

    /// Native tid, known once the thread is running
    pub fn tid(&self) -> Option<Tid> {
        self.shared.lock().tid
    }
}

impl ThreadLifecycle for ManagedThread {
    fn is_current(&self) -> bool {
        self.shared.lock().id == Some(thread::current().id())
    }

    fn with_pinned_state(&self, action: &mut dyn FnMut(ThreadState, Option<Tid>)) {
        let slot = self.shared.lock();
        action(slot.state, slot.tid);
    }
}

/// Marks the thread runnable on entry and terminated on exit, including unwind
struct RunningGuard {
    shared: Arc<Shared>,
}

impl RunningGuard {
    fn enter(shared: Arc<Shared>) -> Self {
        {
            let mut slot = shared.lock();
            slot.state = ThreadState::Runnable;
            slot.tid = Some(Tid::current());
            slot.id = Some(thread::current().id());
        }
        Self { shared }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        slot.state = ThreadState::Terminated;
    }
}
