//! Per-cycle GC metrics
//!
//! Aggregates the raw timing and volume numbers of one collection cycle into
//! the inputs the sizing controller consumes: GC-CPU overhead, live bytes
//! from the most recent marking, and the allocation rate over the preceding
//! interval. Sampling never blocks and never divides by zero.

use std::time::Duration;

use parking_lot::Mutex;

/// Raw inputs for one collection cycle, supplied by the collector
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSample {
    /// CPU time spent in collector work over the preceding interval
    pub gc_time: Duration,
    /// CPU time spent in mutator execution over the preceding interval
    pub mutator_time: Duration,
    /// Live bytes measured by the most recent marking pass
    pub live_bytes: usize,
    /// Bytes allocated since the previous cycle
    pub allocated_bytes: usize,
}

/// Derived metrics for one collection cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleMetrics {
    /// GC-CPU overhead `gc / (gc + mutator)`; `None` when no interval exists
    /// yet (first cycle), which the controller treats as neutral
    pub gc_cpu: Option<f64>,
    /// Live bytes from the most recent marking pass
    pub live_bytes: usize,
    /// Allocation rate over the preceding interval, bytes per second
    pub alloc_rate: f64,
}

/// Aggregate sampler statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct SamplerStats {
    /// Cycles sampled so far
    pub cycles: u64,
    /// Most recent GC-CPU observation, 0 when none exists
    pub last_gc_cpu: f64,
    /// Most recent allocation rate in bytes per second
    pub last_alloc_rate: f64,
    /// Total GC time accumulated across all sampled cycles
    pub total_gc_time: Duration,
    /// Total mutator time accumulated across all sampled cycles
    pub total_mutator_time: Duration,
}

/// Computes [`CycleMetrics`] once per collection-cycle end
pub struct MetricsSampler {
    stats: Mutex<SamplerStats>,
}

impl MetricsSampler {
    /// Create an empty sampler
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(SamplerStats::default()),
        }
    }

    /// Fold one cycle's raw numbers into derived metrics
    ///
    /// A cycle whose total interval is zero (including the first cycle,
    /// where no prior interval exists) yields `gc_cpu: None` rather than a
    /// division by zero.
    pub fn on_cycle_end(&self, sample: &CycleSample) -> CycleMetrics {
        let interval = sample.gc_time + sample.mutator_time;
        let gc_cpu = if interval.is_zero() {
            None
        } else {
            Some(sample.gc_time.as_secs_f64() / interval.as_secs_f64())
        };
        let alloc_rate = if interval.is_zero() {
            0.0
        } else {
            sample.allocated_bytes as f64 / interval.as_secs_f64()
        };

        let mut stats = self.stats.lock();
        stats.cycles += 1;
        stats.last_gc_cpu = gc_cpu.unwrap_or(0.0);
        stats.last_alloc_rate = alloc_rate;
        stats.total_gc_time += sample.gc_time;
        stats.total_mutator_time += sample.mutator_time;

        CycleMetrics {
            gc_cpu,
            live_bytes: sample.live_bytes,
            alloc_rate,
        }
    }

    /// Sampler statistics snapshot
    pub fn stats(&self) -> SamplerStats {
        *self.stats.lock()
    }
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}
