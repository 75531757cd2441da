//! # Heap Sizer
//!
//! Closed-loop heap sizing for a region-based, garbage-collected heap.
//!
//! Two independent control paths converge on a single enforcement point:
//!
//! ```text
//! collection cycle end                       periodic timer
//!        ↓                                        ↓
//! MetricsSampler                         TimeBasedEvaluator
//!        ↓                                        ↓ (reads region
//! SizingController ──→ MarkingThreshold           |  timestamps under
//!        ↓                                        |  the heap lock)
//!        └────────→ HeapSizeEnforcer ←────────────┘
//!                          ↓
//!                  commit/uncommit regions
//! ```
//!
//! The GC-cycle-driven [`SizingController`] converts the observed GC-CPU
//! overhead into a target heap size each cycle, clamped by the soft ceiling
//! and floored by live data plus the allocation reserve. The independent
//! [`TimeBasedEvaluator`] reclaims regions that have sat idle and empty past
//! a configured delay, capped conservatively per pass. Only the
//! [`HeapSizeEnforcer`] ever changes the committed region count, inside the
//! collector's exclusive-execution window, re-validating every region it
//! touches.
//!
//! ## Usage
//!
//! ```ignore
//! use heap_sizer::{
//!     ConfigHandle, Heap, HeapLayout, HeapSizeEnforcer, MetricsSampler,
//!     NoopMarkingThreshold, SafepointQueue, SizingConfig, SizingController,
//!     TimeBasedEvaluator,
//! };
//! use std::sync::Arc;
//!
//! let heap = Arc::new(Heap::new(HeapLayout::default())?);
//! let window = Arc::new(SafepointQueue::new());
//! let enforcer = Arc::new(HeapSizeEnforcer::new(heap.clone(), window.clone()));
//! let config = Arc::new(ConfigHandle::new(SizingConfig::default()));
//!
//! let controller = SizingController::new(
//!     heap.clone(),
//!     enforcer.clone(),
//!     config.clone(),
//!     Arc::new(NoopMarkingThreshold),
//! );
//! let sampler = MetricsSampler::new();
//!
//! let evaluator = Arc::new(TimeBasedEvaluator::new(
//!     heap.clone(),
//!     enforcer.clone(),
//!     window.clone(),
//!     config.clone(),
//! ));
//! let background = evaluator.spawn();
//!
//! // at each collection pause:
//! let guard = window.enter();
//! let metrics = sampler.on_cycle_end(&sample);
//! controller.on_collection_end(&metrics);
//! drop(guard);
//! ```

#![warn(missing_docs)]
#![warn(unused_extern_crates)]
#![warn(unused_imports)]

pub mod activity;
pub mod config;
pub mod controller;
pub mod enforcer;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod region;

// Re-export common types
pub use error::{SizingError, SizingResult};

// Re-export configuration types
pub use config::{ConfigHandle, ControlSignals, SizingConfig, TimeBasedConfig};

// Re-export heap model types
pub use region::{Heap, HeapLayout, Region, RegionId, RegionState, RegionTable};

// Re-export control-path types
pub use activity::RegionActivityTracker;
pub use controller::{
    ControllerStats, MarkingThreshold, NoopMarkingThreshold, SizingController, SizingDecision,
};
pub use evaluator::{EvaluationOutcome, EvaluatorHandle, EvaluatorStats, TimeBasedEvaluator};
pub use metrics::{CycleMetrics, CycleSample, MetricsSampler, SamplerStats};

// Re-export enforcement types
pub use enforcer::{
    EnforcerStats, ExclusiveWindow, HeapSizeEnforcer, SafepointQueue, ShrinkOutcome, ShrinkSource,
    UncommitRequest, WindowGuard, WindowOp,
};
