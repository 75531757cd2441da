//! Region table and heap model
//!
//! A [`Region`] is the fixed-size unit of heap management: it is committed or
//! uncommitted, empty or carrying live bytes, and either serving as an active
//! allocation region or sitting idle. The [`Heap`] owns the region table
//! behind the single heap lock, together with the structural minimum that the
//! enforcer defends unconditionally.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::activity::RegionActivityTracker;
use crate::error::{SizingError, SizingResult};

/// Identifier of a region within the region table
pub type RegionId = usize;

/// Region lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// Backing memory not mapped
    Uncommitted,
    /// Committed and currently serving allocation
    Active,
    /// Committed, not serving allocation
    Idle,
}

/// Fixed-size unit of heap memory
#[derive(Debug, Clone)]
pub struct Region {
    id: RegionId,
    committed: bool,
    active: bool,
    live_bytes: usize,
    last_access_ms: u64,
}

impl Region {
    fn new(id: RegionId) -> Self {
        Self {
            id,
            committed: false,
            active: false,
            live_bytes: 0,
            last_access_ms: 0,
        }
    }

    /// Region identifier
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Whether backing memory is mapped
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Whether the region currently serves allocation
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the region holds no live bytes
    pub fn is_empty(&self) -> bool {
        self.live_bytes == 0
    }

    /// Live bytes recorded at the last retirement/marking
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Lifecycle state
    pub fn state(&self) -> RegionState {
        if !self.committed {
            RegionState::Uncommitted
        } else if self.active {
            RegionState::Active
        } else {
            RegionState::Idle
        }
    }

    /// Timestamp of the last lifecycle activity, in tracker milliseconds
    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms
    }

    pub(crate) fn set_last_access_ms(&mut self, at_ms: u64) {
        self.last_access_ms = at_ms;
    }
}

/// The region table: all regions of the heap plus the committed count
///
/// Only ever accessed under the heap lock.
pub struct RegionTable {
    regions: Vec<Region>,
    region_size: usize,
    committed: usize,
}

impl RegionTable {
    fn new(total_regions: usize, region_size: usize) -> Self {
        Self {
            regions: (0..total_regions).map(Region::new).collect(),
            region_size,
            committed: 0,
        }
    }

    /// Number of regions in the table, committed or not
    pub fn total_regions(&self) -> usize {
        self.regions.len()
    }

    /// Number of committed regions
    pub fn committed_regions(&self) -> usize {
        self.committed
    }

    /// Committed bytes
    pub fn committed_bytes(&self) -> usize {
        self.committed * self.region_size
    }

    /// Region size in bytes
    pub fn region_size(&self) -> usize {
        self.region_size
    }

    /// Look up a region
    pub fn region(&self, id: RegionId) -> SizingResult<&Region> {
        self.regions.get(id).ok_or(SizingError::UnknownRegion(id))
    }

    /// Iterate over all regions
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    fn region_mut(&mut self, id: RegionId) -> SizingResult<&mut Region> {
        self.regions
            .get_mut(id)
            .ok_or(SizingError::UnknownRegion(id))
    }

    /// Commit an uncommitted region. Returns an error if none is left.
    pub(crate) fn commit_one(&mut self) -> SizingResult<RegionId> {
        let id = self
            .regions
            .iter()
            .position(|r| !r.committed)
            .ok_or(SizingError::NoRegionAvailable)?;
        self.regions[id].committed = true;
        self.regions[id].live_bytes = 0;
        self.committed += 1;
        Ok(id)
    }

    /// Uncommit `id` if it is still eligible: committed, not active, empty.
    ///
    /// Returns `false` when the region is no longer eligible; this is the
    /// re-validation that makes select-then-enforce safe.
    pub(crate) fn uncommit(&mut self, id: RegionId) -> bool {
        let Ok(region) = self.region_mut(id) else {
            return false;
        };
        if !region.committed || region.active || !region.is_empty() {
            return false;
        }
        region.committed = false;
        self.committed -= 1;
        true
    }

    pub(crate) fn find_idle_empty(&self) -> Option<RegionId> {
        self.regions
            .iter()
            .find(|r| r.committed && !r.active && r.is_empty())
            .map(|r| r.id)
    }

    /// Collect up to `limit` regions that could be uncommitted right now
    /// (committed, inactive, empty), irrespective of idle time.
    pub(crate) fn collect_empty_committed(&self, limit: usize) -> Vec<RegionId> {
        self.regions
            .iter()
            .filter(|r| r.committed && !r.active && r.is_empty())
            .map(|r| r.id)
            .take(limit)
            .collect()
    }
}

/// Static heap layout
#[derive(Debug, Clone)]
pub struct HeapLayout {
    /// Size of every region in bytes
    pub region_size: usize,
    /// Total number of regions the address space is divided into
    pub total_regions: usize,
    /// Configured initial heap size in bytes
    pub initial_heap_size: usize,
    /// Configured minimum heap size in bytes
    pub min_heap_size: usize,
}

impl Default for HeapLayout {
    fn default() -> Self {
        Self {
            region_size: 8 * 1024 * 1024,
            total_regions: 256,
            initial_heap_size: 64 * 1024 * 1024,
            min_heap_size: 32 * 1024 * 1024,
        }
    }
}

/// Region-based heap state shared by both control paths
///
/// Holds the region table behind the heap lock, the activity tracker, and the
/// live-byte volume from the most recent marking pass. Committed-region
/// changes go through the enforcer; allocation-side transitions
/// ([`activate_region`](Heap::activate_region),
/// [`retire_region`](Heap::retire_region),
/// [`clear_region`](Heap::clear_region)) are driven by the embedder.
pub struct Heap {
    table: Mutex<RegionTable>,
    tracker: RegionActivityTracker,
    region_size: usize,
    initial_heap_size: usize,
    min_heap_size: usize,
    live_bytes: AtomicUsize,
}

impl Heap {
    /// Create a heap and commit the initial region set
    pub fn new(layout: HeapLayout) -> SizingResult<Self> {
        if layout.region_size == 0 {
            return Err(SizingError::invalid_layout("region_size must be nonzero"));
        }
        if layout.total_regions == 0 {
            return Err(SizingError::invalid_layout("total_regions must be nonzero"));
        }
        let floor = layout.initial_heap_size.max(layout.min_heap_size);
        if floor > layout.total_regions * layout.region_size {
            return Err(SizingError::invalid_layout(
                "initial/min heap size exceeds the addressable region span",
            ));
        }

        let heap = Self {
            table: Mutex::new(RegionTable::new(layout.total_regions, layout.region_size)),
            tracker: RegionActivityTracker::new(),
            region_size: layout.region_size,
            initial_heap_size: layout.initial_heap_size,
            min_heap_size: layout.min_heap_size,
            live_bytes: AtomicUsize::new(0),
        };

        let initial_regions = floor.div_ceil(layout.region_size).max(1);
        {
            let mut table = heap.table.lock();
            let now = heap.tracker.now_ms();
            for _ in 0..initial_regions {
                let id = table.commit_one()?;
                table.region_mut(id)?.set_last_access_ms(now);
            }
        }
        Ok(heap)
    }

    /// Region size in bytes
    pub fn region_size(&self) -> usize {
        self.region_size
    }

    /// The structural floor in bytes: `max(initial_heap_size, min_heap_size)`
    pub fn min_committed_bytes(&self) -> usize {
        self.initial_heap_size.max(self.min_heap_size)
    }

    /// The structural floor in regions
    pub fn min_committed_regions(&self) -> usize {
        self.min_committed_bytes().div_ceil(self.region_size)
    }

    /// Number of committed regions
    pub fn committed_regions(&self) -> usize {
        self.table.lock().committed_regions()
    }

    /// Committed bytes
    pub fn committed_bytes(&self) -> usize {
        self.table.lock().committed_bytes()
    }

    /// Live bytes from the most recent marking pass
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Record the live-byte volume produced by a marking pass
    pub fn set_live_bytes(&self, bytes: usize) {
        self.live_bytes.store(bytes, Ordering::Release);
    }

    /// The activity tracker owning the region timestamp clock
    pub fn tracker(&self) -> &RegionActivityTracker {
        &self.tracker
    }

    /// Acquire the heap lock
    pub(crate) fn lock_table(&self) -> MutexGuard<'_, RegionTable> {
        self.table.lock()
    }

    /// Take a region for allocation use
    ///
    /// Reuses an idle committed region when one exists (which cancels any
    /// uncommit eligibility), otherwise commits a fresh region on demand.
    pub fn activate_region(&self) -> SizingResult<RegionId> {
        let mut table = self.table.lock();
        let id = match table.find_idle_empty() {
            Some(id) => id,
            None => table.commit_one()?,
        };
        let region = table.region_mut(id)?;
        region.active = true;
        region.live_bytes = 0;
        self.tracker.record_activity(region);
        Ok(id)
    }

    /// Retire a region from active allocation use
    ///
    /// Records the live-byte volume left behind and timestamps the region.
    pub fn retire_region(&self, id: RegionId, live_bytes: usize) -> SizingResult<()> {
        let mut table = self.table.lock();
        let region = table.region_mut(id)?;
        if !region.active {
            return Err(SizingError::invalid_transition(id, "not active"));
        }
        region.active = false;
        region.live_bytes = live_bytes;
        self.tracker.record_activity(region);
        Ok(())
    }

    /// Clear a region for reuse after evacuation
    pub fn clear_region(&self, id: RegionId) -> SizingResult<()> {
        let mut table = self.table.lock();
        let region = table.region_mut(id)?;
        if !region.committed {
            return Err(SizingError::invalid_transition(id, "not committed"));
        }
        region.live_bytes = 0;
        self.tracker.record_activity(region);
        Ok(())
    }

    /// Snapshot a region's public state, mainly for diagnostics and tests
    pub fn region_state(&self, id: RegionId) -> SizingResult<RegionState> {
        Ok(self.table.lock().region(id)?.state())
    }
}
