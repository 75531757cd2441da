//! Region activity tracking
//!
//! Per-region last-access timestamps with a single-writer contract: the only
//! legitimate mutation points are region retirement from active allocation
//! use and clearing for reuse. Updates are O(1) per region lifecycle event,
//! never per allocation. The tracker holds no lock of its own; callers
//! serialize through the heap lock.

use std::time::{Duration, Instant};

use crate::region::Region;

/// Tracks when each region was last touched by a lifecycle event
///
/// Timestamps are u64 milliseconds measured from the tracker's epoch, so
/// tests can drive idle time explicitly instead of mocking a clock.
pub struct RegionActivityTracker {
    epoch: Instant,
}

impl RegionActivityTracker {
    /// Create a tracker; its epoch is the moment of creation
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the tracker epoch
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record lifecycle activity on a region at the current time
    pub fn record_activity(&self, region: &mut Region) {
        region.set_last_access_ms(self.now_ms());
    }

    /// Record lifecycle activity at an explicit timestamp
    pub fn record_activity_at(&self, region: &mut Region, at_ms: u64) {
        region.set_last_access_ms(at_ms);
    }

    /// Whether `region` is an uncommit candidate: committed, inactive, empty,
    /// and idle for longer than `delay` as of `now_ms`
    pub fn should_uncommit(&self, region: &Region, delay: Duration, now_ms: u64) -> bool {
        region.is_committed()
            && !region.is_active()
            && region.is_empty()
            && now_ms.saturating_sub(region.last_access_ms()) > delay.as_millis() as u64
    }
}

impl Default for RegionActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
