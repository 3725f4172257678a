//! Thread identity resolution
//!
//! Maps the calling thread to the small integer used to index the context
//! storage region. The first call on a thread asks the kernel; every later
//! call reads the value cached in thread-local storage.

use std::cell::Cell;
use std::fmt;

thread_local! {
    /// Cached tid for this thread. `None` until the first lookup.
    static CURRENT_TID: Cell<Option<Tid>> = const { Cell::new(None) };
}

/// Thread id used as an array index into per-thread tables
///
/// Stable for the lifetime of a thread, unique among live threads, and may be
/// handed to a new thread once the previous owner has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(u32);

impl Tid {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Resolve the calling thread's tid, caching it after the first call
    #[inline]
    pub fn current() -> Self {
        CURRENT_TID.with(|cell| match cell.get() {
            Some(tid) => tid,
            None => {
                let tid = lookup();
                cell.set(Some(tid));
                tid
            }
        })
    }

    /// Whether the calling thread has already paid for the kernel lookup
    pub fn is_cached() -> bool {
        CURRENT_TID.with(|cell| cell.get().is_some())
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Tid {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

fn lookup() -> Tid {
    // gettid(2) cannot fail and never returns a negative id
    Tid(nix::unistd::gettid().as_raw() as u32)
}
