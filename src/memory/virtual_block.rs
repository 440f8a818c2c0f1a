/*!
 * Virtual Block
 * Public allocation surface for a single fixed-size block
 */

use super::slots::AllocHandle;
use super::stats::DetailedStatistics;
use super::suballocator::{PlacementRequest, Suballocator};
use super::types::{
    Algorithm, AllocationFlags, BlockInfo, Region, Strategy, VirtualAllocation,
    VirtualAllocationDesc, VirtualAllocationInfo, VirtualBlockDesc,
};
use crate::core::{check_alignment, AllocError, AllocResult, DeviceSize};
use log::debug;

/// One block of address space with an immutable size
///
/// A virtual block has no device memory behind it; it only tracks which
/// byte ranges are taken. Block vectors pair one with a device heap.
///
/// # Example
///
/// ```
/// use gpu_suballoc::memory::{VirtualAllocationDesc, VirtualBlock, VirtualBlockDesc};
///
/// let mut block = VirtualBlock::new(VirtualBlockDesc::new(1024)).unwrap();
/// let alloc = block.allocate(&VirtualAllocationDesc::new(64, 16)).unwrap();
/// assert_eq!(alloc.offset % 16, 0);
/// block.free(alloc.handle).unwrap();
/// assert!(block.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct VirtualBlock {
    size: DeviceSize,
    algorithm: Algorithm,
    suballocator: Suballocator,
}

impl VirtualBlock {
    pub fn new(desc: VirtualBlockDesc) -> AllocResult<Self> {
        if desc.size == 0 {
            return Err(AllocError::InvalidSize(0));
        }
        debug!("Created {} virtual block of {} bytes", desc.algorithm, desc.size);
        Ok(Self {
            size: desc.size,
            algorithm: desc.algorithm,
            suballocator: Suballocator::new(desc.size, desc.algorithm),
        })
    }

    pub fn size(&self) -> DeviceSize {
        self.size
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Validate a request against block-independent rules
    pub(crate) fn placement_request(
        size: DeviceSize,
        alignment: DeviceSize,
        flags: AllocationFlags,
        user_data: u64,
    ) -> AllocResult<PlacementRequest> {
        if size == 0 {
            return Err(AllocError::InvalidSize(0));
        }
        check_alignment(alignment)?;
        Ok(PlacementRequest {
            size,
            alignment,
            strategy: Strategy::from_flags(flags)?,
            upper_address: flags.contains(AllocationFlags::UPPER_ADDRESS),
            user_data,
        })
    }

    pub fn allocate(&mut self, desc: &VirtualAllocationDesc) -> AllocResult<VirtualAllocation> {
        let req = Self::placement_request(desc.size, desc.alignment, desc.flags, desc.user_data)?;
        self.place(&req)
    }

    /// Place an already validated request
    pub(crate) fn place(&mut self, req: &PlacementRequest) -> AllocResult<VirtualAllocation> {
        if req.size > self.size {
            return Err(AllocError::out_of_memory(req.size, req.alignment));
        }
        self.suballocator.allocate(req)
    }

    pub fn free(&mut self, handle: AllocHandle) -> AllocResult<()> {
        self.suballocator.free(handle).map(|_| ())
    }

    /// Discard every allocation; all outstanding handles become invalid
    pub fn clear(&mut self) {
        debug!(
            "Clearing {} virtual block ({} allocations)",
            self.algorithm,
            self.allocation_count()
        );
        self.suballocator.clear();
    }

    pub fn info(&self) -> BlockInfo {
        let used_bytes = self.suballocator.used_bytes();
        BlockInfo {
            used_bytes,
            free_bytes: self.size - used_bytes,
            allocation_count: self.allocation_count(),
        }
    }

    pub fn used_bytes(&self) -> DeviceSize {
        self.suballocator.used_bytes()
    }

    pub fn free_bytes(&self) -> DeviceSize {
        self.size - self.suballocator.used_bytes()
    }

    pub fn allocation_count(&self) -> usize {
        self.suballocator.allocations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.suballocator.allocations().is_empty()
    }

    pub fn contains(&self, handle: AllocHandle) -> bool {
        self.suballocator.allocations().contains(handle)
    }

    pub fn allocation_info(&self, handle: AllocHandle) -> AllocResult<VirtualAllocationInfo> {
        self.suballocator
            .allocations()
            .get(handle)
            .map(|e| VirtualAllocationInfo {
                offset: e.offset,
                size: e.size,
                user_data: e.user_data,
            })
            .ok_or_else(|| AllocError::InvalidHandle(handle.to_string()))
    }

    pub fn set_user_data(&mut self, handle: AllocHandle, user_data: u64) -> AllocResult<()> {
        let entry = self
            .suballocator
            .allocations_mut()
            .get_mut(handle)
            .ok_or_else(|| AllocError::InvalidHandle(handle.to_string()))?;
        entry.user_data = user_data;
        Ok(())
    }

    /// Ordered snapshot of the regions tiling the block
    pub fn regions(&self) -> Vec<Region> {
        self.suballocator.regions()
    }

    pub fn add_statistics(&self, stats: &mut DetailedStatistics) {
        stats.add_block(self.size);
        self.suballocator.add_statistics(stats);
    }

    pub fn statistics(&self) -> DetailedStatistics {
        let mut stats = DetailedStatistics::default();
        self.add_statistics(&mut stats);
        stats
    }

    /// Re-check every structural invariant of the block
    pub fn validate(&self) -> AllocResult<()> {
        self.suballocator.validate()
    }
}
