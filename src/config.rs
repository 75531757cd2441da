//! Sizing configuration
//!
//! Two independent option groups: [`ControlSignals`] feeds the GC-cycle-driven
//! controller, [`TimeBasedConfig`] governs only the idle-reclamation path.
//! Both are read through a versioned snapshot handle so a concurrent
//! reconfiguration can never produce a torn read within a single sizing
//! decision.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::{SizingError, SizingResult};

/// Inputs to the GC-cycle-driven sizing controller
#[derive(Debug, Clone)]
pub struct ControlSignals {
    /// Soft ceiling on heap size in bytes; `None` means unset
    pub soft_max_heap_size: Option<usize>,
    /// Target GC-CPU ratio expressed as time units of mutator execution per
    /// unit of GC work (24 targets 1/25 = 4% GC CPU)
    pub gc_time_ratio: f64,
    /// Fraction of committed regions kept free as allocation headroom
    pub reserve_percent: u8,
    /// Damping exponent applied to the resize factor, in (0, 1]
    pub damping_factor: f64,
    /// Lower clamp for the resize factor; prevents a zero GC-CPU observation
    /// from collapsing the heap in one cycle
    pub min_resize_factor: f64,
    /// Occupancy percentage applied to the target when publishing the
    /// marking-start threshold
    pub start_occupancy_percent: u8,
    /// Minimum heap free ratio, consulted only after a full collection
    pub min_free_ratio: u8,
    /// Maximum heap free ratio, consulted only after a full collection
    pub max_free_ratio: u8,
}

impl Default for ControlSignals {
    fn default() -> Self {
        Self {
            soft_max_heap_size: None,
            gc_time_ratio: 24.0,
            reserve_percent: 10,
            damping_factor: 0.7,
            min_resize_factor: 0.25,
            start_occupancy_percent: 45,
            min_free_ratio: 40,
            max_free_ratio: 70,
        }
    }
}

impl ControlSignals {
    /// Target GC-CPU fraction derived from `gc_time_ratio`
    pub fn target_ratio(&self) -> f64 {
        1.0 / (self.gc_time_ratio.max(0.0) + 1.0)
    }

    /// Validate the control signals
    pub fn validate(&self) -> SizingResult<()> {
        if !self.gc_time_ratio.is_finite() || self.gc_time_ratio < 0.0 {
            return Err(SizingError::invalid_config(
                "gc_time_ratio must be a non-negative finite number",
            ));
        }
        if !(self.damping_factor > 0.0 && self.damping_factor <= 1.0) {
            return Err(SizingError::invalid_config(
                "damping_factor must be in (0, 1]",
            ));
        }
        if !(self.min_resize_factor > 0.0 && self.min_resize_factor <= 1.0) {
            return Err(SizingError::invalid_config(
                "min_resize_factor must be in (0, 1]",
            ));
        }
        if self.reserve_percent >= 100 {
            return Err(SizingError::invalid_config(
                "reserve_percent must be below 100",
            ));
        }
        if self.start_occupancy_percent > 100 {
            return Err(SizingError::invalid_config(
                "start_occupancy_percent must not exceed 100",
            ));
        }
        if self.min_free_ratio >= 100 || self.max_free_ratio >= 100 {
            return Err(SizingError::invalid_config(
                "free ratios must be below 100",
            ));
        }
        if self.min_free_ratio > self.max_free_ratio {
            return Err(SizingError::invalid_config(
                "min_free_ratio must not exceed max_free_ratio",
            ));
        }
        Ok(())
    }
}

/// Options for the time-based idle-region evaluator
#[derive(Debug, Clone)]
pub struct TimeBasedConfig {
    /// Master switch for the evaluator task
    pub enabled: bool,
    /// Period between evaluations
    pub evaluation_interval: Duration,
    /// Idle time a region must accumulate before it becomes an uncommit
    /// candidate
    pub uncommit_delay: Duration,
    /// Minimum number of candidates required before any action is taken
    pub min_regions_to_uncommit: usize,
}

impl Default for TimeBasedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            evaluation_interval: Duration::from_secs(60),
            uncommit_delay: Duration::from_secs(300),
            min_regions_to_uncommit: 10,
        }
    }
}

impl TimeBasedConfig {
    /// Validate the time-based options
    pub fn validate(&self) -> SizingResult<()> {
        if self.evaluation_interval.is_zero() {
            return Err(SizingError::invalid_config(
                "evaluation_interval must be nonzero",
            ));
        }
        if self.uncommit_delay.is_zero() {
            return Err(SizingError::invalid_config(
                "uncommit_delay must be nonzero",
            ));
        }
        if self.min_regions_to_uncommit == 0 {
            return Err(SizingError::invalid_config(
                "min_regions_to_uncommit must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Complete sizing configuration
#[derive(Debug, Clone, Default)]
pub struct SizingConfig {
    /// Controller inputs
    pub control: ControlSignals,
    /// Idle-reclamation options
    pub time_based: TimeBasedConfig,
}

impl SizingConfig {
    /// Validate both option groups
    pub fn validate(&self) -> SizingResult<()> {
        self.control.validate()?;
        self.time_based.validate()
    }
}

/// Shared, versioned configuration handle
///
/// Both control loops read the configuration exactly once per cycle through
/// [`snapshot`](ConfigHandle::snapshot). Administrative reconfiguration goes
/// through [`update`](ConfigHandle::update), which validates the new values
/// before publishing them; an invalid update leaves the previous
/// configuration in place. Changes take effect from the next
/// evaluation/cycle, never retroactively.
pub struct ConfigHandle {
    current: RwLock<Arc<SizingConfig>>,
    version: AtomicU64,
}

impl ConfigHandle {
    /// Create a handle from an initial configuration
    ///
    /// An invalid initial configuration disables the custom values: the
    /// handle falls back to defaults and reports a diagnostic. This is never
    /// a reason to abort the host process.
    pub fn new(config: SizingConfig) -> Self {
        let effective = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                log::warn!("sizing configuration rejected, falling back to defaults: {e}");
                SizingConfig::default()
            }
        };
        Self {
            current: RwLock::new(Arc::new(effective)),
            version: AtomicU64::new(0),
        }
    }

    /// Current configuration snapshot
    pub fn snapshot(&self) -> Arc<SizingConfig> {
        Arc::clone(&self.current.read())
    }

    /// Configuration version, incremented on every successful update
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Apply a reconfiguration
    ///
    /// The mutation runs on a copy of the current configuration; the copy is
    /// published only if it validates. Returns the new version.
    pub fn update<F>(&self, mutate: F) -> SizingResult<u64>
    where
        F: FnOnce(&mut SizingConfig),
    {
        let mut next = (**self.current.read()).clone();
        mutate(&mut next);
        next.validate()?;
        *self.current.write() = Arc::new(next);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(version)
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(SizingConfig::default())
    }
}
