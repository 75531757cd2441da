//! Time-based idle-region evaluation
//!
//! An independent periodic task, fully asynchronous to collection cycles: it
//! scans region timestamps under the heap lock, selects idle uncommit
//! candidates, applies the conservative caps, and hands the selection to the
//! enforcer. The lock is released before enforcement is requested; the
//! enforcer re-validates at execution time, which is what makes the
//! release-then-reacquire window safe.
//!
//! The caps bound every single evaluation twice over: 25% of the inactive
//! set smooths oscillation by never evicting the whole idle set at once, and
//! 10% of the committed total keeps one evaluation from destabilizing a very
//! large heap no matter how much of it is idle. Both divisions truncate;
//! small candidate sets round down to no action rather than up to churn.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::config::ConfigHandle;
use crate::enforcer::{ExclusiveWindow, HeapSizeEnforcer, ShrinkSource, UncommitRequest};
use crate::error::SizingResult;
use crate::region::{Heap, RegionId};

/// How often the no-action heartbeat is actually emitted
const HEARTBEAT_EVERY: u64 = 10;

/// Outcome of one evaluation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// A stop-the-world collection was in progress; deferred to next tick
    SkippedGcInProgress,
    /// Fewer candidates than `min_regions_to_uncommit`; no action
    BelowThreshold {
        /// Idle candidates found
        inactive: usize,
        /// Committed regions scanned
        total: usize,
    },
    /// Caps or the structural floor reduced the shrink to nothing
    NothingToDo {
        /// Idle candidates found
        inactive: usize,
        /// Committed regions scanned
        total: usize,
    },
    /// A shrink request was handed to the enforcer
    Requested {
        /// Idle candidates found
        inactive: usize,
        /// Committed regions scanned
        total: usize,
        /// Regions in the request
        regions: usize,
        /// Bytes in the request
        bytes: usize,
    },
}

/// Evaluator counters
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluatorStats {
    /// Evaluation passes run
    pub evaluations: u64,
    /// Passes skipped because a collection was in progress
    pub skipped_gc_in_progress: u64,
    /// Passes that took no action
    pub no_action: u64,
    /// Shrink requests issued
    pub shrink_requests: u64,
    /// Regions requested for uncommit in total
    pub regions_requested: u64,
    /// Bytes requested for uncommit in total
    pub bytes_requested: u64,
}

/// Periodic idle-region scanner and uncommit driver
pub struct TimeBasedEvaluator {
    heap: Arc<Heap>,
    enforcer: Arc<HeapSizeEnforcer>,
    window: Arc<dyn ExclusiveWindow>,
    config: Arc<ConfigHandle>,
    stats: Mutex<EvaluatorStats>,
    quiet_passes: AtomicU64,
}

impl TimeBasedEvaluator {
    /// Create an evaluator
    pub fn new(
        heap: Arc<Heap>,
        enforcer: Arc<HeapSizeEnforcer>,
        window: Arc<dyn ExclusiveWindow>,
        config: Arc<ConfigHandle>,
    ) -> Self {
        Self {
            heap,
            enforcer,
            window,
            config,
            stats: Mutex::new(EvaluatorStats::default()),
            quiet_passes: AtomicU64::new(0),
        }
    }

    /// Run one evaluation pass
    pub fn evaluate_once(&self) -> EvaluationOutcome {
        let cfg = self.config.snapshot();
        let time_based = &cfg.time_based;

        self.stats.lock().evaluations += 1;

        // never block waiting for a pause to end; collector throughput wins
        // over uncommit responsiveness
        if self.window.is_active() {
            self.stats.lock().skipped_gc_in_progress += 1;
            log::debug!("time-based evaluation skipped: collection in progress");
            return EvaluationOutcome::SkippedGcInProgress;
        }

        log::debug!("time-based evaluation started");

        // scan-and-select under the heap lock
        let (candidates, total, committed_bytes, region_size) = {
            let table = self.heap.lock_table();
            let now = self.heap.tracker().now_ms();
            let tracker = self.heap.tracker();
            let candidates: Vec<RegionId> = table
                .iter()
                .filter(|r| tracker.should_uncommit(r, time_based.uncommit_delay, now))
                .map(|r| r.id())
                .collect();
            (
                candidates,
                table.committed_regions(),
                table.committed_bytes(),
                table.region_size(),
            )
        };
        let inactive = candidates.len();

        if inactive < time_based.min_regions_to_uncommit {
            return self.no_action(EvaluationOutcome::BelowThreshold { inactive, total });
        }

        log::debug!("uncommit candidates found: inactive={inactive} total={total}");

        // conservative caps, both truncating
        let by_inactive = inactive / 4;
        let by_total = total / 10;
        let capped = by_inactive.min(by_total);

        let headroom = committed_bytes.saturating_sub(self.heap.min_committed_bytes());
        let shrink_bytes = (capped * region_size).min(headroom);
        let regions = shrink_bytes / region_size;
        if regions == 0 {
            return self.no_action(EvaluationOutcome::NothingToDo { inactive, total });
        }

        let mut selected = candidates;
        selected.truncate(regions);
        let bytes = regions * region_size;

        // the heap lock is already released; the enforcer re-validates each
        // selected region inside the next exclusive window
        self.enforcer.request_heap_shrink(UncommitRequest {
            bytes,
            region_count: regions,
            source: ShrinkSource::TimeDriven,
            candidates: selected,
        });

        self.quiet_passes.store(0, Ordering::Relaxed);
        let mut stats = self.stats.lock();
        stats.shrink_requests += 1;
        stats.regions_requested += regions as u64;
        stats.bytes_requested += bytes as u64;

        EvaluationOutcome::Requested {
            inactive,
            total,
            regions,
            bytes,
        }
    }

    fn no_action(&self, outcome: EvaluationOutcome) -> EvaluationOutcome {
        self.stats.lock().no_action += 1;
        let quiet = self.quiet_passes.fetch_add(1, Ordering::Relaxed) + 1;
        if quiet % HEARTBEAT_EVERY == 0 {
            if let EvaluationOutcome::BelowThreshold { inactive, total }
            | EvaluationOutcome::NothingToDo { inactive, total } = &outcome
            {
                log::info!(
                    "time-based evaluation heartbeat: inactive={inactive} total={total}, no action in last {HEARTBEAT_EVERY} passes"
                );
            }
        }
        outcome
    }

    /// Evaluator statistics snapshot
    pub fn stats(&self) -> EvaluatorStats {
        *self.stats.lock()
    }

    /// Start the periodic background task
    ///
    /// Returns `None` when the subsystem stays off: master switch disabled,
    /// or configuration rejected (reported as a diagnostic, never fatal to
    /// the host). The returned handle stops the task cooperatively when
    /// dropped; cancellation is honored between scan and enforcement, never
    /// mid-mutation.
    pub fn spawn(self: Arc<Self>) -> Option<EvaluatorHandle> {
        let cfg = self.config.snapshot();
        if !cfg.time_based.enabled {
            log::debug!("time-based heap sizing disabled (master switch off)");
            return None;
        }
        if let Err(e) = self.validate_config() {
            log::warn!("time-based heap sizing disabled: {e}");
            return None;
        }
        log::info!(
            "time-based heap sizing enabled: interval={:?} uncommit_delay={:?} min_regions={}",
            cfg.time_based.evaluation_interval,
            cfg.time_based.uncommit_delay,
            cfg.time_based.min_regions_to_uncommit
        );

        let shared = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wakeup: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let evaluator = Arc::clone(&self);
        let thread = std::thread::Builder::new()
            .name("heap-sizer-evaluator".into())
            .spawn(move || evaluator.run_loop(&thread_shared))
            .ok()?;

        Some(EvaluatorHandle {
            thread: Some(thread),
            shared,
        })
    }

    fn validate_config(&self) -> SizingResult<()> {
        self.config.snapshot().time_based.validate()
    }

    fn run_loop(&self, signal: &StopSignal) {
        loop {
            // re-read the interval every tick so a reconfiguration takes
            // effect from the next evaluation
            let interval = self.config.snapshot().time_based.evaluation_interval;
            let mut stopped = signal.stopped.lock();
            if !*stopped {
                signal.wakeup.wait_for(&mut stopped, interval);
            }
            if *stopped {
                return;
            }
            drop(stopped);

            self.evaluate_once();
        }
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

/// Lifecycle handle for the background evaluator task
pub struct EvaluatorHandle {
    thread: Option<JoinHandle<()>>,
    shared: Arc<StopSignal>,
}

impl EvaluatorHandle {
    /// Stop the task and wait for it to exit
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        if let Some(thread) = self.thread.take() {
            *self.shared.stopped.lock() = true;
            self.shared.wakeup.notify_all();
            let _ = thread.join();
        }
    }
}

impl Drop for EvaluatorHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SizingConfig, TimeBasedConfig};
    use crate::enforcer::SafepointQueue;
    use crate::region::HeapLayout;
    use std::time::Duration;

    struct Fixture {
        heap: Arc<Heap>,
        window: Arc<SafepointQueue>,
        evaluator: TimeBasedEvaluator,
    }

    fn fixture(total_regions: usize, min_regions_to_uncommit: usize) -> Fixture {
        let region_size = 1024;
        let heap = Arc::new(
            Heap::new(HeapLayout {
                region_size,
                total_regions,
                initial_heap_size: 2 * region_size,
                min_heap_size: 2 * region_size,
            })
            .unwrap(),
        );
        let window = Arc::new(SafepointQueue::new());
        let enforcer = Arc::new(HeapSizeEnforcer::new(
            Arc::clone(&heap),
            Arc::clone(&window) as Arc<dyn ExclusiveWindow>,
        ));
        let config = Arc::new(ConfigHandle::new(SizingConfig {
            time_based: TimeBasedConfig {
                enabled: true,
                evaluation_interval: Duration::from_millis(10),
                uncommit_delay: Duration::from_millis(1),
                min_regions_to_uncommit,
            },
            ..SizingConfig::default()
        }));
        let evaluator = TimeBasedEvaluator::new(
            Arc::clone(&heap),
            enforcer,
            Arc::clone(&window) as Arc<dyn ExclusiveWindow>,
            config,
        );
        Fixture {
            heap,
            window,
            evaluator,
        }
    }

    /// Commit `total` regions, then leave `idle` of them empty and idle long
    /// past the uncommit delay; the rest stay active.
    fn populate(heap: &Heap, total: usize, idle: usize) {
        let mut ids = Vec::new();
        while heap.committed_regions() < total {
            ids.push(heap.activate_region().unwrap());
        }
        for id in ids.into_iter().take(idle) {
            heap.retire_region(id, 0).unwrap();
        }
        // let the retired regions age past the 1ms test delay
        std::thread::sleep(Duration::from_millis(10));
    }

    #[test]
    fn test_skips_while_collection_in_progress() {
        let fx = fixture(32, 1);
        populate(&fx.heap, 16, 8);
        let guard = fx.window.enter();
        assert_eq!(
            fx.evaluator.evaluate_once(),
            EvaluationOutcome::SkippedGcInProgress
        );
        drop(guard);
        assert_eq!(fx.evaluator.stats().skipped_gc_in_progress, 1);
    }

    #[test]
    fn test_below_threshold_is_no_action() {
        let fx = fixture(64, 10);
        // exactly min - 1 candidates: zero uncommit
        populate(&fx.heap, 40, 9);
        let outcome = fx.evaluator.evaluate_once();
        assert_eq!(
            outcome,
            EvaluationOutcome::BelowThreshold {
                inactive: 9,
                total: 40
            }
        );
        drop(fx.window.enter());
        assert_eq!(fx.heap.committed_regions(), 40);
    }

    #[test]
    fn test_at_threshold_applies_caps() {
        let fx = fixture(64, 10);
        // exactly min candidates: evaluation proceeds, caps decide
        populate(&fx.heap, 40, 10);
        let outcome = fx.evaluator.evaluate_once();
        // by_inactive = 10/4 = 2, by_total = 40/10 = 4 -> 2 regions
        assert_eq!(
            outcome,
            EvaluationOutcome::Requested {
                inactive: 10,
                total: 40,
                regions: 2,
                bytes: 2048
            }
        );
        drop(fx.window.enter());
        assert_eq!(fx.heap.committed_regions(), 38);
    }

    #[test]
    fn test_caps_are_deterministic() {
        let fx = fixture(2048, 10);
        populate(&fx.heap, 1750, 49);
        let outcome = fx.evaluator.evaluate_once();
        // by_inactive = 49/4 = 12, by_total = 1750/10 = 175 -> 12 regions
        assert_eq!(
            outcome,
            EvaluationOutcome::Requested {
                inactive: 49,
                total: 1750,
                regions: 12,
                bytes: 12 * 1024
            }
        );
    }

    #[test]
    fn test_idempotent_when_no_new_activity() {
        let fx = fixture(128, 10);
        // 12 idle candidates: first pass uncommits 12/4 = 3, leaving 9 < 10
        populate(&fx.heap, 100, 12);
        let first = fx.evaluator.evaluate_once();
        assert_eq!(
            first,
            EvaluationOutcome::Requested {
                inactive: 12,
                total: 100,
                regions: 3,
                bytes: 3 * 1024
            }
        );
        drop(fx.window.enter());
        assert_eq!(fx.heap.committed_regions(), 97);

        let second = fx.evaluator.evaluate_once();
        assert_eq!(
            second,
            EvaluationOutcome::BelowThreshold {
                inactive: 9,
                total: 97
            }
        );
        assert_eq!(fx.heap.committed_regions(), 97);
    }

    #[test]
    fn test_headroom_limits_shrink_to_floor() {
        let region_size = 1024;
        let heap = Arc::new(
            Heap::new(HeapLayout {
                region_size,
                total_regions: 64,
                initial_heap_size: 38 * region_size,
                min_heap_size: 38 * region_size,
            })
            .unwrap(),
        );
        let window = Arc::new(SafepointQueue::new());
        let enforcer = Arc::new(HeapSizeEnforcer::new(
            Arc::clone(&heap),
            Arc::clone(&window) as Arc<dyn ExclusiveWindow>,
        ));
        let config = Arc::new(ConfigHandle::new(SizingConfig {
            time_based: TimeBasedConfig {
                enabled: true,
                evaluation_interval: Duration::from_millis(10),
                uncommit_delay: Duration::from_millis(1),
                min_regions_to_uncommit: 10,
            },
            ..SizingConfig::default()
        }));
        let evaluator = TimeBasedEvaluator::new(
            Arc::clone(&heap),
            enforcer,
            Arc::clone(&window) as Arc<dyn ExclusiveWindow>,
            config,
        );

        populate(&heap, 40, 40);
        // caps would allow 40/10 = 4 regions, headroom only 2 above the floor
        let outcome = evaluator.evaluate_once();
        assert_eq!(
            outcome,
            EvaluationOutcome::Requested {
                inactive: 40,
                total: 40,
                regions: 2,
                bytes: 2048
            }
        );
        drop(window.enter());
        assert_eq!(heap.committed_regions(), 38);
        assert!(heap.committed_bytes() >= heap.min_committed_bytes());
    }

    #[test]
    fn test_spawn_respects_master_switch() {
        let fx = fixture(16, 10);
        let config = Arc::new(ConfigHandle::new(SizingConfig::default()));
        let enforcer = Arc::new(HeapSizeEnforcer::new(
            Arc::clone(&fx.heap),
            Arc::clone(&fx.window) as Arc<dyn ExclusiveWindow>,
        ));
        let evaluator = Arc::new(TimeBasedEvaluator::new(
            Arc::clone(&fx.heap),
            enforcer,
            Arc::clone(&fx.window) as Arc<dyn ExclusiveWindow>,
            config,
        ));
        // default config has the master switch off
        assert!(evaluator.spawn().is_none());
    }

    #[test]
    fn test_background_task_runs_and_stops() {
        let fx = fixture(64, 10);
        populate(&fx.heap, 40, 20);
        let evaluator = Arc::new(fx.evaluator);
        let handle = Arc::clone(&evaluator).spawn().expect("task should start");

        // wait for at least one tick
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while evaluator.stats().evaluations == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.stop();
        assert!(evaluator.stats().evaluations > 0);
    }
}
