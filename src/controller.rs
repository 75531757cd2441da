//! GC-cycle-driven sizing controller
//!
//! Runs synchronously at the end of every collection pause. Each cycle it
//! fuses the observed GC-CPU overhead, the soft ceiling, and the safety
//! floor into a target heap size, asks the enforcer to shrink when the
//! committed set exceeds the target (growth is satisfied passively by the
//! allocator), and publishes the new target to the marking-threshold
//! collaborator.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ConfigHandle;
use crate::enforcer::{HeapSizeEnforcer, ShrinkSource, UncommitRequest};
use crate::metrics::CycleMetrics;
use crate::region::Heap;

/// One-way notification consumed by the marking-start heuristic
///
/// How the collaborator decides *when* to start marking is its own concern;
/// the controller only pushes the updated occupancy target.
pub trait MarkingThreshold: Send + Sync {
    /// Receive the updated marking-start target in bytes
    fn update_marking_threshold(&self, target_bytes: usize);
}

/// Collaborator that ignores threshold updates
pub struct NoopMarkingThreshold;

impl MarkingThreshold for NoopMarkingThreshold {
    fn update_marking_threshold(&self, _target_bytes: usize) {}
}

/// The sizing decision computed for one cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct SizingDecision {
    /// Resize factor after damping and clamping
    pub factor: f64,
    /// Target heap size quantized to regions, in bytes
    pub target_bytes: usize,
    /// Target committed region count
    pub target_regions: usize,
    /// Regions requested for uncommit this cycle (0 when no shrink)
    pub shrink_regions: usize,
    /// Marking threshold published to the collaborator
    pub ihop_target: usize,
}

/// Controller counters
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerStats {
    /// Collection cycles processed
    pub cycles: u64,
    /// Cycles that requested a shrink
    pub shrink_requests: u64,
    /// Full-collection free-ratio resizes requested
    pub full_gc_resizes: u64,
    /// Most recent decision
    pub last_decision: SizingDecision,
}

/// Closed-loop controller mapping GC-CPU overhead to a target heap size
pub struct SizingController {
    heap: Arc<Heap>,
    enforcer: Arc<HeapSizeEnforcer>,
    config: Arc<ConfigHandle>,
    threshold: Arc<dyn MarkingThreshold>,
    stats: Mutex<ControllerStats>,
}

impl SizingController {
    /// Create a controller
    pub fn new(
        heap: Arc<Heap>,
        enforcer: Arc<HeapSizeEnforcer>,
        config: Arc<ConfigHandle>,
        threshold: Arc<dyn MarkingThreshold>,
    ) -> Self {
        Self {
            heap,
            enforcer,
            config,
            threshold,
            stats: Mutex::new(ControllerStats::default()),
        }
    }

    /// Run the sizing decision at the end of a collection cycle
    ///
    /// Executes inside the already-synchronous collection pause and never
    /// blocks beyond it.
    pub fn on_collection_end(&self, metrics: &CycleMetrics) -> SizingDecision {
        let cfg = self.config.snapshot();
        let control = &cfg.control;

        self.heap.set_live_bytes(metrics.live_bytes);

        let region_size = self.heap.region_size();
        let committed_regions = self.heap.committed_regions();
        let committed_bytes = committed_regions * region_size;

        // factor = (observed / target)^alpha, clamped so a quiet interval
        // (zero observed GC CPU) cannot collapse the heap in one cycle
        let target_ratio = control.target_ratio();
        let factor = match metrics.gc_cpu {
            Some(observed) if target_ratio > 0.0 => (observed.max(0.0) / target_ratio)
                .powf(control.damping_factor)
                .max(control.min_resize_factor),
            _ => 1.0,
        };

        let mut target = committed_bytes as f64 * factor;
        if let Some(soft_max) = control.soft_max_heap_size {
            target = target.min(soft_max as f64);
        }

        // safety floor: live data plus the allocation reserve, and never
        // below the structural minimum
        let reserve_regions = committed_regions * control.reserve_percent as usize / 100;
        let min_heap = metrics.live_bytes + reserve_regions * region_size;
        target = target
            .max(min_heap as f64)
            .max(self.heap.min_committed_bytes() as f64);

        let target_regions = (target as usize).div_ceil(region_size);
        let target_bytes = target_regions * region_size;

        let shrink_regions = committed_regions.saturating_sub(target_regions);
        if shrink_regions > 0 {
            self.enforcer.request_heap_shrink(UncommitRequest {
                bytes: shrink_regions * region_size,
                region_count: shrink_regions,
                source: ShrinkSource::GcDriven,
                candidates: Vec::new(),
            });
        }

        let mut ihop_target = target_bytes * control.start_occupancy_percent as usize / 100;
        if let Some(soft_max) = control.soft_max_heap_size {
            ihop_target = ihop_target.min(soft_max);
        }
        self.threshold.update_marking_threshold(ihop_target);

        let decision = SizingDecision {
            factor,
            target_bytes,
            target_regions,
            shrink_regions,
            ihop_target,
        };
        log::debug!(
            "sizing decision: gc_cpu={:?} factor={:.3} target={} committed={} shrink_regions={}",
            metrics.gc_cpu,
            factor,
            target_bytes,
            committed_bytes,
            shrink_regions
        );

        let mut stats = self.stats.lock();
        stats.cycles += 1;
        if shrink_regions > 0 {
            stats.shrink_requests += 1;
        }
        stats.last_decision = decision;

        decision
    }

    /// Apply the legacy free-ratio bounds after a full, non-incremental
    /// collection
    ///
    /// Independent of the per-cycle loop and of the time-based path: when
    /// the committed size leaves more free space than `max_free_ratio`
    /// allows, the heap is shrunk toward it. Expansion toward
    /// `min_free_ratio` is left to the allocator's passive growth.
    pub fn resize_after_full_collection(&self) -> usize {
        let cfg = self.config.snapshot();
        let control = &cfg.control;

        let region_size = self.heap.region_size();
        let committed_regions = self.heap.committed_regions();
        let committed_bytes = committed_regions * region_size;
        let live = self.heap.live_bytes();

        let max_free = control.max_free_ratio as f64 / 100.0;
        // capacity at which exactly max_free_ratio of the heap is free
        let maximum_desired = if max_free < 1.0 {
            live as f64 / (1.0 - max_free)
        } else {
            committed_bytes as f64
        };
        let floor = self.heap.min_committed_bytes() as f64;
        let desired = maximum_desired.max(floor);

        if (committed_bytes as f64) <= desired {
            return 0;
        }

        let target_regions = (desired as usize).div_ceil(region_size);
        let shrink_regions = committed_regions.saturating_sub(target_regions);
        if shrink_regions == 0 {
            return 0;
        }

        log::info!(
            "free-ratio resize after full collection: live={} committed={} shrink_regions={}",
            live,
            committed_bytes,
            shrink_regions
        );
        self.enforcer.request_heap_shrink(UncommitRequest {
            bytes: shrink_regions * region_size,
            region_count: shrink_regions,
            source: ShrinkSource::GcDriven,
            candidates: Vec::new(),
        });
        self.stats.lock().full_gc_resizes += 1;
        shrink_regions
    }

    /// Controller statistics snapshot
    pub fn stats(&self) -> ControllerStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlSignals, SizingConfig, TimeBasedConfig};
    use crate::enforcer::{ExclusiveWindow, SafepointQueue};
    use crate::region::HeapLayout;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MB: usize = 1024 * 1024;

    struct RecordingThreshold {
        last: AtomicUsize,
    }

    impl MarkingThreshold for RecordingThreshold {
        fn update_marking_threshold(&self, target_bytes: usize) {
            self.last.store(target_bytes, Ordering::Release);
        }
    }

    struct Fixture {
        heap: Arc<Heap>,
        window: Arc<SafepointQueue>,
        controller: SizingController,
        threshold: Arc<RecordingThreshold>,
    }

    fn fixture(committed_regions: usize, control: ControlSignals) -> Fixture {
        let region_size = 8 * MB;
        let heap = Arc::new(
            Heap::new(HeapLayout {
                region_size,
                total_regions: committed_regions * 2,
                initial_heap_size: 2 * region_size,
                min_heap_size: 2 * region_size,
            })
            .unwrap(),
        );
        let mut ids = Vec::new();
        while heap.committed_regions() < committed_regions {
            ids.push(heap.activate_region().unwrap());
        }
        for id in ids {
            heap.retire_region(id, 0).unwrap();
        }
        let window = Arc::new(SafepointQueue::new());
        let enforcer = Arc::new(HeapSizeEnforcer::new(
            Arc::clone(&heap),
            Arc::clone(&window) as Arc<dyn ExclusiveWindow>,
        ));
        let config = Arc::new(ConfigHandle::new(SizingConfig {
            control,
            time_based: TimeBasedConfig::default(),
        }));
        let threshold = Arc::new(RecordingThreshold {
            last: AtomicUsize::new(0),
        });
        let controller = SizingController::new(
            Arc::clone(&heap),
            enforcer,
            config,
            Arc::clone(&threshold) as Arc<dyn MarkingThreshold>,
        );
        Fixture {
            heap,
            window,
            controller,
            threshold,
        }
    }

    fn metrics(gc_cpu: f64, live_bytes: usize) -> CycleMetrics {
        CycleMetrics {
            gc_cpu: Some(gc_cpu),
            live_bytes,
            alloc_rate: 0.0,
        }
    }

    #[test]
    fn test_neutral_observation_keeps_committed_size() {
        // GCTimeRatio=24 -> target 0.04; observed 0.04 at alpha=1 -> factor 1
        let fx = fixture(
            64,
            ControlSignals {
                damping_factor: 1.0,
                reserve_percent: 0,
                ..ControlSignals::default()
            },
        );
        let _guard = fx.window.enter();
        let decision = fx.controller.on_collection_end(&metrics(0.04, 0));
        assert!((decision.factor - 1.0).abs() < 1e-9);
        assert_eq!(decision.target_regions, 64);
        assert_eq!(decision.shrink_regions, 0);
        assert_eq!(fx.heap.committed_regions(), 64);
    }

    #[test]
    fn test_soft_max_clamps_target() {
        // observed double the target at alpha=1 doubles the raw target;
        // 8 GiB committed -> raw 16 GiB, soft max 10 GiB wins
        let soft_max = 10 * 1024 * MB;
        let fx = fixture(
            1024, // 1024 x 8 MiB = 8 GiB
            ControlSignals {
                damping_factor: 1.0,
                reserve_percent: 0,
                soft_max_heap_size: Some(soft_max),
                ..ControlSignals::default()
            },
        );
        let _guard = fx.window.enter();
        let decision = fx.controller.on_collection_end(&metrics(0.08, 0));
        assert_eq!(decision.target_bytes, soft_max);
        // growth is passive: no shrink request for a larger target
        assert_eq!(decision.shrink_regions, 0);
        assert_eq!(fx.heap.committed_regions(), 1024);
    }

    #[test]
    fn test_high_overhead_never_shrinks() {
        let fx = fixture(64, ControlSignals::default());
        let _guard = fx.window.enter();
        let decision = fx.controller.on_collection_end(&metrics(0.5, 0));
        assert!(decision.factor > 1.0);
        assert_eq!(decision.shrink_regions, 0);
    }

    #[test]
    fn test_low_overhead_shrinks_heap() {
        let fx = fixture(
            64,
            ControlSignals {
                damping_factor: 1.0,
                reserve_percent: 0,
                min_resize_factor: 0.5,
                ..ControlSignals::default()
            },
        );
        let _guard = fx.window.enter();
        // observed half the target halves the heap
        let decision = fx.controller.on_collection_end(&metrics(0.02, 0));
        assert!((decision.factor - 0.5).abs() < 1e-9);
        assert_eq!(decision.target_regions, 32);
        assert_eq!(decision.shrink_regions, 32);
        assert_eq!(fx.heap.committed_regions(), 32);
    }

    #[test]
    fn test_zero_gc_cpu_is_clamped_by_min_factor() {
        let fx = fixture(
            64,
            ControlSignals {
                damping_factor: 1.0,
                reserve_percent: 0,
                min_resize_factor: 0.25,
                ..ControlSignals::default()
            },
        );
        let _guard = fx.window.enter();
        let decision = fx.controller.on_collection_end(&metrics(0.0, 0));
        assert!((decision.factor - 0.25).abs() < 1e-9);
        // the heap shrinks to a quarter, not to the floor
        assert_eq!(decision.target_regions, 16);
        assert_eq!(fx.heap.committed_regions(), 16);
    }

    #[test]
    fn test_first_cycle_without_observation_is_neutral() {
        let fx = fixture(64, ControlSignals::default());
        let _guard = fx.window.enter();
        let decision = fx.controller.on_collection_end(&CycleMetrics {
            gc_cpu: None,
            live_bytes: 0,
            alloc_rate: 0.0,
        });
        assert!((decision.factor - 1.0).abs() < 1e-9);
        assert_eq!(decision.shrink_regions, 0);
    }

    #[test]
    fn test_live_bytes_and_reserve_floor_the_target() {
        let fx = fixture(
            64,
            ControlSignals {
                damping_factor: 1.0,
                reserve_percent: 10,
                min_resize_factor: 0.01,
                ..ControlSignals::default()
            },
        );
        let _guard = fx.window.enter();
        // near-zero overhead wants a tiny heap; live bytes + reserve resist
        let live = 200 * MB; // 25 regions of live data
        let decision = fx.controller.on_collection_end(&metrics(0.0004, live));
        // floor: 200 MiB live + 6 reserve regions (10% of 64) * 8 MiB = 248 MiB
        assert_eq!(decision.target_regions, 31);
        assert_eq!(fx.heap.committed_regions(), 31);
    }

    #[test]
    fn test_ihop_target_published_each_cycle() {
        let fx = fixture(
            64,
            ControlSignals {
                damping_factor: 1.0,
                reserve_percent: 0,
                start_occupancy_percent: 45,
                ..ControlSignals::default()
            },
        );
        let _guard = fx.window.enter();
        let decision = fx.controller.on_collection_end(&metrics(0.04, 0));
        let expected = decision.target_bytes * 45 / 100;
        assert_eq!(decision.ihop_target, expected);
        assert_eq!(fx.threshold.last.load(Ordering::Acquire), expected);
    }

    #[test]
    fn test_free_ratio_resize_after_full_collection() {
        let fx = fixture(100, ControlSignals::default());
        fx.heap.set_live_bytes(60 * MB);
        let _guard = fx.window.enter();
        // 800 MiB committed, 60 MiB live, max 70% free
        // maximum desired = 60 / 0.3 = 200 MiB = 25 regions
        let shrunk = fx.controller.resize_after_full_collection();
        assert_eq!(shrunk, 75);
        assert_eq!(fx.heap.committed_regions(), 25);
    }

    #[test]
    fn test_free_ratio_noop_when_within_bounds() {
        let fx = fixture(10, ControlSignals::default());
        fx.heap.set_live_bytes(50 * MB);
        let _guard = fx.window.enter();
        // 80 MiB committed, 50 MiB live -> 37.5% free, within bounds
        assert_eq!(fx.controller.resize_after_full_collection(), 0);
        assert_eq!(fx.heap.committed_regions(), 10);
    }
}
