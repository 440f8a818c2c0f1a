/*!
 * Suballocators
 *
 * Placement engines that manage the address space of one fixed-size block.
 *
 * ## Algorithms
 *
 * - **General**: ordered region list plus a size index
 *   - Best fit, lowest offset or first fit, optionally from the top of a region
 *   - Two-sided coalescing on free
 *
 * - **Linear**: cursors instead of a region list
 *   - Stack, double stack or ring buffer, fixed at creation
 *   - O(1) clear for frame-scoped usage
 *
 * The algorithm is a tagged variant chosen once per block, so dispatch is a
 * `match` rather than a vtable.
 */

mod general;
mod linear;

pub use general::GeneralSuballocator;
pub use linear::LinearSuballocator;

use super::slots::{AllocHandle, SlotTable};
use super::stats::DetailedStatistics;
use super::types::{Algorithm, Region, Strategy, VirtualAllocation};
use crate::core::{AllocResult, DeviceSize};

/// Metadata kept per live suballocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationEntry {
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub user_data: u64,
}

/// Validated placement request
#[derive(Debug, Clone, Copy)]
pub struct PlacementRequest {
    pub size: DeviceSize,
    pub alignment: DeviceSize,
    pub strategy: Option<Strategy>,
    pub upper_address: bool,
    pub user_data: u64,
}

/// Suballocation algorithm state of one block
#[derive(Debug, Clone)]
pub enum Suballocator {
    General(GeneralSuballocator),
    Linear(LinearSuballocator),
}

impl Suballocator {
    pub fn new(size: DeviceSize, algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::General => Suballocator::General(GeneralSuballocator::new(size)),
            Algorithm::Linear(mode) => Suballocator::Linear(LinearSuballocator::new(size, mode)),
        }
    }

    pub fn allocate(&mut self, req: &PlacementRequest) -> AllocResult<VirtualAllocation> {
        match self {
            Suballocator::General(s) => s.allocate(req),
            Suballocator::Linear(s) => s.allocate(req),
        }
    }

    pub fn free(&mut self, handle: AllocHandle) -> AllocResult<AllocationEntry> {
        match self {
            Suballocator::General(s) => s.free(handle),
            Suballocator::Linear(s) => s.free(handle),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Suballocator::General(s) => s.clear(),
            Suballocator::Linear(s) => s.clear(),
        }
    }

    pub fn used_bytes(&self) -> DeviceSize {
        match self {
            Suballocator::General(s) => s.used_bytes(),
            Suballocator::Linear(s) => s.used_bytes(),
        }
    }

    pub fn allocations(&self) -> &SlotTable<AllocationEntry> {
        match self {
            Suballocator::General(s) => s.allocations(),
            Suballocator::Linear(s) => s.allocations(),
        }
    }

    pub fn allocations_mut(&mut self) -> &mut SlotTable<AllocationEntry> {
        match self {
            Suballocator::General(s) => s.allocations_mut(),
            Suballocator::Linear(s) => s.allocations_mut(),
        }
    }

    pub fn regions(&self) -> Vec<Region> {
        match self {
            Suballocator::General(s) => s.regions(),
            Suballocator::Linear(s) => s.regions(),
        }
    }

    pub fn add_statistics(&self, stats: &mut DetailedStatistics) {
        match self {
            Suballocator::General(s) => s.add_statistics(stats),
            Suballocator::Linear(s) => s.add_statistics(stats),
        }
    }

    pub fn validate(&self) -> AllocResult<()> {
        match self {
            Suballocator::General(s) => s.validate(),
            Suballocator::Linear(s) => s.validate(),
        }
    }
}
