//! Heap size enforcement
//!
//! [`HeapSizeEnforcer`] is the single point of truth for committed-region
//! changes. Both control paths hand it an [`UncommitRequest`]; it executes
//! inside the collector's exclusive-execution window, re-validating every
//! selected region immediately before uncommitting it. The structural
//! invariants (never below the configured minimum, never uncommit a
//! non-empty region) are enforced here unconditionally, regardless of what
//! the upstream selection believed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::region::{Heap, RegionId};

/// Which control path produced a shrink request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkSource {
    /// SizingController, at the end of a collection cycle
    GcDriven,
    /// TimeBasedEvaluator, between collections
    TimeDriven,
}

impl std::fmt::Display for ShrinkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShrinkSource::GcDriven => write!(f, "gc-driven"),
            ShrinkSource::TimeDriven => write!(f, "time-driven"),
        }
    }
}

/// Transient shrink request, consumed exactly once by the enforcer
#[derive(Debug, Clone)]
pub struct UncommitRequest {
    /// Bytes to uncommit
    pub bytes: usize,
    /// Regions to uncommit
    pub region_count: usize,
    /// Originating control path
    pub source: ShrinkSource,
    /// Specific regions selected by the caller; empty means the enforcer
    /// picks eligible regions itself at execution time
    pub candidates: Vec<RegionId>,
}

/// Result of one executed shrink operation
#[derive(Debug, Clone, Copy, Default)]
pub struct ShrinkOutcome {
    /// Regions actually uncommitted
    pub regions: usize,
    /// Bytes actually uncommitted
    pub bytes: usize,
    /// Regions requested
    pub requested_regions: usize,
}

/// Enforcer counters
#[derive(Debug, Clone, Copy, Default)]
pub struct EnforcerStats {
    /// Requests accepted (fast or slow path)
    pub requests: u64,
    /// Requests dropped because one was already in flight
    pub coalesced_requests: u64,
    /// Shrink operations executed
    pub shrinks_completed: u64,
    /// Shrinks that uncommitted fewer regions than requested
    pub partial_shrinks: u64,
    /// Total regions uncommitted
    pub regions_uncommitted: u64,
    /// Total bytes uncommitted
    pub bytes_uncommitted: u64,
}

/// Operation deferred to the next exclusive-execution window
pub type WindowOp = Box<dyn FnOnce() + Send>;

/// Abstract exclusive-execution-window capability
///
/// Models the collector's global pause: while the window is active no
/// concurrent mutation of heap region state occurs. Components either find
/// themselves already inside the window (fast path) or schedule an operation
/// for the next one (slow path).
pub trait ExclusiveWindow: Send + Sync {
    /// Whether execution is currently inside the window
    fn is_active(&self) -> bool;

    /// Run `op` at the next window
    fn schedule(&self, op: WindowOp);
}

/// Concrete window driven by the embedder's pause mechanism
///
/// The collector calls [`enter`](SafepointQueue::enter) when it reaches its
/// pause; entering marks the window active and drains every scheduled
/// operation. Dropping the returned guard deactivates the window.
pub struct SafepointQueue {
    active: AtomicBool,
    pending: Mutex<Vec<WindowOp>>,
}

impl SafepointQueue {
    /// Create an inactive window with an empty operation queue
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Enter the exclusive-execution window
    ///
    /// Scheduled operations run in submission order before this returns.
    pub fn enter(&self) -> WindowGuard<'_> {
        self.active.store(true, Ordering::Release);
        loop {
            let ops: Vec<WindowOp> = std::mem::take(&mut *self.pending.lock());
            if ops.is_empty() {
                break;
            }
            for op in ops {
                op();
            }
        }
        WindowGuard { queue: self }
    }

    /// Number of operations waiting for the next window
    pub fn pending_ops(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for SafepointQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusiveWindow for SafepointQueue {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn schedule(&self, op: WindowOp) {
        self.pending.lock().push(op);
    }
}

/// Guard marking the exclusive-execution window active
pub struct WindowGuard<'a> {
    queue: &'a SafepointQueue,
}

impl Drop for WindowGuard<'_> {
    fn drop(&mut self) {
        self.queue.active.store(false, Ordering::Release);
    }
}

/// The only component permitted to change the committed region count
pub struct HeapSizeEnforcer {
    heap: Arc<Heap>,
    window: Arc<dyn ExclusiveWindow>,
    in_flight: AtomicBool,
    stats: Mutex<EnforcerStats>,
    last_outcome: Mutex<ShrinkOutcome>,
}

impl HeapSizeEnforcer {
    /// Create an enforcer bound to a heap and a window capability
    pub fn new(heap: Arc<Heap>, window: Arc<dyn ExclusiveWindow>) -> Self {
        Self {
            heap,
            window,
            in_flight: AtomicBool::new(false),
            stats: Mutex::new(EnforcerStats::default()),
            last_outcome: Mutex::new(ShrinkOutcome::default()),
        }
    }

    /// Request a heap shrink
    ///
    /// Fast path: already inside the exclusive window, the shrink executes
    /// inline. Slow path: the shrink is scheduled for the next window and
    /// this returns once scheduled, not once completed. At most one shrink
    /// is in flight; a request arriving while one is pending is dropped and
    /// counted, to be retried by the next evaluation or cycle.
    ///
    /// Returns whether the request was accepted.
    pub fn request_heap_shrink(self: &Arc<Self>, request: UncommitRequest) -> bool {
        if request.region_count == 0 || request.bytes == 0 {
            return false;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.stats.lock().coalesced_requests += 1;
            log::debug!(
                "shrink request dropped, one already in flight: source={} bytes={}",
                request.source,
                request.bytes
            );
            return false;
        }
        self.stats.lock().requests += 1;
        log::info!(
            "heap shrink requested: source={} bytes={} regions={}",
            request.source,
            request.bytes,
            request.region_count
        );

        if self.window.is_active() {
            self.execute(request);
        } else {
            let this = Arc::clone(self);
            self.window.schedule(Box::new(move || this.execute(request)));
        }
        true
    }

    /// Enforcer statistics snapshot
    pub fn stats(&self) -> EnforcerStats {
        *self.stats.lock()
    }

    /// Outcome of the most recently executed shrink
    pub fn last_outcome(&self) -> ShrinkOutcome {
        *self.last_outcome.lock()
    }

    /// Whether a shrink operation is currently pending or executing
    pub fn shrink_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    // Runs inside the exclusive window. Re-validates every selected region
    // and stops at the structural floor; a smaller actual shrink than
    // requested is reported, not escalated.
    fn execute(&self, request: UncommitRequest) {
        let min_regions = self.heap.min_committed_regions();
        let region_size = self.heap.region_size();

        let mut done = 0usize;
        {
            let mut table = self.heap.lock_table();
            let candidates = if request.candidates.is_empty() {
                table.collect_empty_committed(request.region_count)
            } else {
                request.candidates.clone()
            };
            for id in candidates {
                if done == request.region_count {
                    break;
                }
                if table.committed_regions() <= min_regions {
                    break;
                }
                if table.uncommit(id) {
                    done += 1;
                }
            }
        }

        let bytes = done * region_size;
        {
            let mut stats = self.stats.lock();
            stats.shrinks_completed += 1;
            stats.regions_uncommitted += done as u64;
            stats.bytes_uncommitted += bytes as u64;
            if done < request.region_count {
                stats.partial_shrinks += 1;
            }
        }
        *self.last_outcome.lock() = ShrinkOutcome {
            regions: done,
            bytes,
            requested_regions: request.region_count,
        };
        log::info!(
            "heap shrink completed: source={} bytes={} regions={} requested_regions={}",
            request.source,
            bytes,
            done,
            request.region_count
        );

        self.in_flight.store(false, Ordering::Release);
    }
}
