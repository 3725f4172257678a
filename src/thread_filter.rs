//! Per-thread sampling inclusion
//!
//! [`ThreadFilter`] is the engine-side membership table, a lock-free bitmap
//! indexed by tid that the sampler consults on every tick. [`FilterGate`] is the
//! caller-side entry point: it toggles the calling thread directly, and toggles
//! any other thread only while that thread's lifecycle is pinned and it is
//! schedulable.

use crate::engine::NativeEngine;
use crate::lifecycle::{ThreadLifecycle, ThreadState};
use crate::tid::Tid;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

const BITS_PER_WORD: usize = 64;

/// Bitmap of tids included in sampling when filtering is enabled
#[derive(Debug)]
pub struct ThreadFilter {
    words: Box<[AtomicU64]>,
    capacity: usize,
    enabled: AtomicBool,
    size: AtomicUsize,
}

impl ThreadFilter {
    /// Table addressing tids in `0..capacity`, initially empty and disabled
    pub fn new(capacity: usize) -> Self {
        let word_count = capacity.div_ceil(BITS_PER_WORD);
        Self {
            words: (0..word_count).map(|_| AtomicU64::new(0)).collect(),
            capacity,
            enabled: AtomicBool::new(false),
            size: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Memory held by the bitmap
    pub fn byte_len(&self) -> usize {
        self.words.len() * std::mem::size_of::<AtomicU64>()
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn slot(&self, tid: Tid) -> Option<(&AtomicU64, u64)> {
        let index = tid.index();
        if index >= self.capacity {
            return None;
        }
        let mask = 1u64 << (index % BITS_PER_WORD);
        Some((&self.words[index / BITS_PER_WORD], mask))
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.slot(tid)
            .is_some_and(|(word, mask)| word.load(Ordering::Acquire) & mask != 0)
    }

    /// Include `tid`; a tid outside the table is ignored
    pub fn add(&self, tid: Tid) {
        if let Some((word, mask)) = self.slot(tid) {
            if word.fetch_or(mask, Ordering::AcqRel) & mask == 0 {
                self.size.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn remove(&self, tid: Tid) {
        if let Some((word, mask)) = self.slot(tid) {
            if word.fetch_and(!mask, Ordering::AcqRel) & mask != 0 {
                self.size.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Whether a sample from `tid` should be kept
    pub fn accept(&self, tid: Tid) -> bool {
        !self.enabled() || self.contains(tid)
    }

    /// Number of included tids
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the gate did with a toggle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Toggle forwarded to the engine for this tid; `None` means the calling thread
    Applied(Option<Tid>),
    /// Thread was not schedulable; nothing was forwarded
    Dropped(ThreadState),
}

/// Caller-side thread filter toggling
#[derive(Clone)]
pub struct FilterGate {
    engine: Arc<dyn NativeEngine>,
}

impl FilterGate {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self { engine }
    }

    /// Include or exclude `thread` from sampling
    ///
    /// `None`, or a handle for the calling thread, toggles the calling thread
    /// without synchronization. Any other thread is toggled under its
    /// lifecycle lock, and only while it is runnable.
    pub fn set_filtered(&self, thread: Option<&dyn ThreadLifecycle>, enabled: bool) -> FilterOutcome {
        let thread = match thread {
            Some(thread) if !thread.is_current() => thread,
            _ => {
                self.engine.filter_thread(None, enabled);
                return FilterOutcome::Applied(None);
            }
        };

        let mut outcome = FilterOutcome::Dropped(ThreadState::New);
        thread.with_pinned_state(&mut |state, tid| {
            outcome = match (state.is_schedulable(), tid) {
                (true, Some(tid)) => {
                    self.engine.filter_thread(Some(tid), enabled);
                    FilterOutcome::Applied(Some(tid))
                }
                _ => FilterOutcome::Dropped(state),
            };
        });
        debug!(?outcome, enabled, "Thread filter toggle");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_accepts_all_when_disabled() {
        let filter = ThreadFilter::new(1024);
        assert!(!filter.enabled());
        assert!(filter.accept(Tid::new(5)));
        filter.set_enabled(true);
        assert!(!filter.accept(Tid::new(5)));
    }

    #[test]
    fn test_add_remove() {
        let filter = ThreadFilter::new(1024);
        filter.add(Tid::new(63));
        filter.add(Tid::new(64));
        filter.add(Tid::new(64));
        assert!(filter.contains(Tid::new(63)));
        assert!(filter.contains(Tid::new(64)));
        assert!(!filter.contains(Tid::new(65)));
        assert_eq!(filter.len(), 2);

        filter.remove(Tid::new(63));
        filter.remove(Tid::new(63));
        assert!(!filter.contains(Tid::new(63)));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let filter = ThreadFilter::new(100);
        filter.add(Tid::new(100));
        assert!(!filter.contains(Tid::new(100)));
        assert!(filter.is_empty());
    }

    #[test]
    fn test_byte_len_rounds_up() {
        assert_eq!(ThreadFilter::new(1).byte_len(), 8);
        assert_eq!(ThreadFilter::new(65).byte_len(), 16);
    }
}
