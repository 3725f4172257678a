//! Thread-indexed context storage
//!
//! A fixed-size block of memory with one [`ContextRecord`] per possible tid.
//! Application threads write their own record on every unit-of-work boundary;
//! the sampler reads records of other threads at arbitrary moments, possibly
//! from a signal handler. Neither side takes a lock or allocates.
//!
//! # Layout
//!
//! ```text
//! offset = tid * CONTEXT_RECORD_SIZE
//! ┌──────────────┬──────────────┬──────────────┐
//! │ valid   (u64)│ span_id (u64)│ root_id (u64)│   record for tid
//! └──────────────┴──────────────┴──────────────┘
//! ```
//!
//! # Write protocol
//!
//! 1. `valid = 0`
//! 2. `span_id = span`
//! 3. `root_span_id = root`
//! 4. `valid = 1`
//!
//! A reader that sees `valid == 1` before and after loading the payload, and
//! the same payload on a second load, has a pair produced by a single write.
//! The pair may already be stale by the time the sample is recorded; that is
//! accepted; correlation is best-effort.

use crate::error::{ProfilerError, Result};
use crate::tid::Tid;
use memmap2::{MmapMut, MmapOptions};
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Flag value for a record that is being written or was never written
pub const RECORD_INVALID: u64 = 0;
/// Flag value for a record whose payload is complete
pub const RECORD_VALID: u64 = 1;

/// One fixed-width slot in the storage region
#[repr(C)]
#[derive(Debug)]
pub struct ContextRecord {
    valid: AtomicU64,
    span_id: AtomicU64,
    root_span_id: AtomicU64,
}

/// Byte stride between consecutive records
pub const CONTEXT_RECORD_SIZE: usize = std::mem::size_of::<ContextRecord>();

/// Pointer width the storage protocol needs to address every record
pub const REQUIRED_POINTER_SIZE: usize = 8;

impl ContextRecord {
    #[inline]
    fn store(&self, span_id: u64, root_span_id: u64) {
        self.valid.store(RECORD_INVALID, Ordering::Relaxed);
        // Payload stores must not become visible before the flag drops
        fence(Ordering::Release);
        self.span_id.store(span_id, Ordering::Relaxed);
        // Orders the span store before the root store
        self.root_span_id.store(root_span_id, Ordering::Release);
        self.valid.store(RECORD_VALID, Ordering::Release);
    }

    #[inline]
    fn load(&self) -> Option<Context> {
        if self.valid.load(Ordering::Acquire) != RECORD_VALID {
            return None;
        }
        let span_id = self.span_id.load(Ordering::Relaxed);
        let root_span_id = self.root_span_id.load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        // Acquire so that, when this observes a newer writer's final flag, the
        // payload re-read below sees that writer's span and root
        if self.valid.load(Ordering::Acquire) != RECORD_VALID {
            return None;
        }
        // A complete rewrite can fit between the two flag loads
        if self.span_id.load(Ordering::Relaxed) != span_id
            || self.root_span_id.load(Ordering::Relaxed) != root_span_id
        {
            return None;
        }
        Some(Context {
            span_id,
            root_span_id,
        })
    }
}

/// Snapshot of a thread's context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Context {
    pub span_id: u64,
    pub root_span_id: u64,
}

impl Context {
    pub const EMPTY: Context = Context {
        span_id: 0,
        root_span_id: 0,
    };

    pub fn new(span_id: u64, root_span_id: u64) -> Self {
        Self {
            span_id,
            root_span_id,
        }
    }

    /// Span id 0 is the reserved "no context" marker
    pub fn is_empty(&self) -> bool {
        self.span_id == 0
    }
}

/// The storage region: `capacity` records in an anonymous mapping
///
/// Pages are zero-filled on first touch, so an untouched record reads as
/// invalid and only threads that actually set a context cost memory.
pub struct ContextStorage {
    base: *mut ContextRecord,
    capacity: usize,
    _map: MmapMut,
}

// SAFETY: all access to the mapped records goes through `AtomicU64`, and the
// mapping is never moved, resized or unmapped before the storage is dropped.
unsafe impl Send for ContextStorage {}
unsafe impl Sync for ContextStorage {}

impl ContextStorage {
    /// Map a region holding one record for every tid in `0..capacity`
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ProfilerError::InvalidArgument(
                "context storage capacity must be > 0".to_string(),
            ));
        }
        let bytes = capacity
            .checked_mul(CONTEXT_RECORD_SIZE)
            .filter(|&b| b <= isize::MAX as usize)
            .ok_or_else(|| {
                ProfilerError::Unsupported(format!(
                    "{capacity} context records do not fit in the address space"
                ))
            })?;

        let mut map = MmapOptions::new().len(bytes).map_anon()?;
        let base = map.as_mut_ptr().cast::<ContextRecord>();
        info!(capacity, bytes, "Mapped context storage");

        Ok(Self {
            base,
            capacity,
            _map: map,
        })
    }

    /// Number of addressable tids
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the region in bytes
    pub fn byte_len(&self) -> usize {
        self.capacity * CONTEXT_RECORD_SIZE
    }

    /// Raw start of the region, for a native reader that indexes it itself
    pub fn as_ptr(&self) -> *const u8 {
        self.base.cast::<u8>().cast_const()
    }

    #[inline]
    fn record(&self, tid: Tid) -> Option<&ContextRecord> {
        let index = tid.index();
        if index >= self.capacity {
            return None;
        }
        // SAFETY: index is in bounds, the mapping is page aligned and the
        // stride is a multiple of 8, so every record is aligned for AtomicU64.
        Some(unsafe { &*self.base.add(index) })
    }

    /// Publish `(span_id, root_span_id)` for `tid`
    ///
    /// Lock-free and allocation-free. A tid outside the region is ignored.
    #[inline]
    pub fn set(&self, tid: Tid, span_id: u64, root_span_id: u64) {
        if let Some(record) = self.record(tid) {
            record.store(span_id, root_span_id);
        }
    }

    /// Reset `tid` to the "no context" sentinel
    #[inline]
    pub fn clear(&self, tid: Tid) {
        self.set(tid, 0, 0);
    }

    /// Read the context of `tid`
    ///
    /// Returns `None` when the record is invalid, mid-write, or holds the zero
    /// sentinel. Safe to call from a signal handler.
    #[inline]
    pub fn read(&self, tid: Tid) -> Option<Context> {
        self.record(tid)?.load().filter(|ctx| !ctx.is_empty())
    }
}

impl std::fmt::Debug for ContextStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStorage")
            .field("capacity", &self.capacity)
            .field("bytes", &self.byte_len())
            .finish()
    }
}

/// Calling-thread view of the storage region, gated on platform capability
///
/// When the engine reports a pointer width or record stride this side cannot
/// address safely, every write becomes a no-op.
#[derive(Debug, Clone)]
pub struct ContextRegion {
    storage: Option<Arc<ContextStorage>>,
}

impl ContextRegion {
    /// Decide once, from the engine's probes, whether context writes are enabled
    pub fn probe(
        pointer_size: usize,
        record_size: usize,
        storage: Option<Arc<ContextStorage>>,
    ) -> Self {
        let storage = match storage {
            Some(_) if pointer_size < REQUIRED_POINTER_SIZE => {
                debug!(pointer_size, "Context propagation disabled: pointer width");
                None
            }
            Some(_) if record_size != CONTEXT_RECORD_SIZE => {
                debug!(
                    record_size,
                    expected = CONTEXT_RECORD_SIZE,
                    "Context propagation disabled: record stride mismatch"
                );
                None
            }
            other => other,
        };
        Self { storage }
    }

    /// A region where every write is dropped
    pub fn disabled() -> Self {
        Self { storage: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.storage.is_some()
    }

    pub fn storage(&self) -> Option<&Arc<ContextStorage>> {
        self.storage.as_ref()
    }

    /// Tag the calling thread with a context
    #[inline]
    pub fn set_context(&self, span_id: u64, root_span_id: u64) {
        if let Some(storage) = &self.storage {
            storage.set(Tid::current(), span_id, root_span_id);
        }
    }

    /// Remove the calling thread's context
    #[inline]
    pub fn clear_context(&self) {
        self.set_context(0, 0);
    }

    /// The calling thread's current context, if any
    pub fn current_context(&self) -> Option<Context> {
        self.storage.as_ref()?.read(Tid::current())
    }
}
