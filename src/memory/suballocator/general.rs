/*!
 * General Suballocator
 * Ordered region list with a size index for best-fit lookup
 */

use super::{AllocationEntry, PlacementRequest};
use crate::core::{align_down, align_up, AllocError, AllocResult, DeviceSize};
use crate::memory::slots::{AllocHandle, SlotTable};
use crate::memory::stats::DetailedStatistics;
use crate::memory::types::{Region, RegionKind, Strategy, VirtualAllocation};
use log::{trace, warn};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occupant {
    Free,
    Used(AllocHandle),
}

#[derive(Debug, Clone, Copy)]
struct Suballoc {
    size: DeviceSize,
    occupant: Occupant,
}

/// Free-list suballocator
///
/// - `regions` tiles `[0, size)` and is keyed by offset, so neighbours are an
///   O(log n) range query away
/// - `free_by_size` indexes free regions as `(size, offset)` for best fit
#[derive(Debug, Clone)]
pub struct GeneralSuballocator {
    size: DeviceSize,
    regions: BTreeMap<DeviceSize, Suballoc>,
    free_by_size: BTreeSet<(DeviceSize, DeviceSize)>,
    allocations: SlotTable<AllocationEntry>,
    free_bytes: DeviceSize,
}

impl GeneralSuballocator {
    pub fn new(size: DeviceSize) -> Self {
        let mut this = Self {
            size,
            regions: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            allocations: SlotTable::new(),
            free_bytes: size,
        };
        this.insert_free(0, size);
        this
    }

    fn insert_free(&mut self, offset: DeviceSize, size: DeviceSize) {
        self.regions.insert(
            offset,
            Suballoc {
                size,
                occupant: Occupant::Free,
            },
        );
        self.free_by_size.insert((size, offset));
    }

    fn remove_free(&mut self, offset: DeviceSize, size: DeviceSize) {
        self.regions.remove(&offset);
        self.free_by_size.remove(&(size, offset));
    }

    /// Placement of the request inside a free region, if it fits
    fn fit(req: &PlacementRequest, offset: DeviceSize, size: DeviceSize) -> Option<DeviceSize> {
        let end = offset + size;
        if req.upper_address {
            if end < req.size {
                return None;
            }
            let placed = align_down(end - req.size, req.alignment);
            (placed >= offset).then_some(placed)
        } else {
            let placed = align_up(offset, req.alignment);
            (placed + req.size <= end).then_some(placed)
        }
    }

    /// Pick `(region_offset, placement)` according to the request strategy
    fn find(&self, req: &PlacementRequest) -> Option<(DeviceSize, DeviceSize)> {
        let free_regions = || {
            self.regions
                .iter()
                .filter(|(_, s)| s.occupant == Occupant::Free)
                .map(|(&offset, s)| (offset, s.size))
        };

        let pick = |(offset, size): (DeviceSize, DeviceSize)| {
            Self::fit(req, offset, size).map(|placed| (offset, placed))
        };

        match (req.strategy, req.upper_address) {
            (Some(Strategy::MinOffset), _) => free_regions().find_map(pick),
            (None, true) => free_regions().rev().find_map(pick),
            (Some(Strategy::MinMemory), _) | (None, false) => self
                .free_by_size
                .range((req.size, 0)..)
                .find_map(|&(size, offset)| pick((offset, size))),
            (Some(Strategy::MinTime), _) => self
                .free_by_size
                .iter()
                .rev()
                .take_while(|&&(size, _)| size >= req.size)
                .find_map(|&(size, offset)| pick((offset, size))),
        }
    }

    pub fn allocate(&mut self, req: &PlacementRequest) -> AllocResult<VirtualAllocation> {
        if req.size > self.free_bytes {
            return Err(AllocError::out_of_memory(req.size, req.alignment));
        }

        let (region_offset, placed) = self
            .find(req)
            .ok_or_else(|| AllocError::out_of_memory(req.size, req.alignment))?;

        let region_size = self.regions[&region_offset].size;
        let region_end = region_offset + region_size;
        self.remove_free(region_offset, region_size);

        if placed > region_offset {
            self.insert_free(region_offset, placed - region_offset);
        }
        let alloc_end = placed + req.size;
        if alloc_end < region_end {
            self.insert_free(alloc_end, region_end - alloc_end);
        }

        let handle = self.allocations.insert(AllocationEntry {
            offset: placed,
            size: req.size,
            user_data: req.user_data,
        });
        self.regions.insert(
            placed,
            Suballoc {
                size: req.size,
                occupant: Occupant::Used(handle),
            },
        );
        self.free_bytes -= req.size;

        trace!(
            "Placed {} bytes at offset {} (region [{}, {}), strategy {:?}, upper {})",
            req.size,
            placed,
            region_offset,
            region_end,
            req.strategy,
            req.upper_address
        );

        Ok(VirtualAllocation {
            handle,
            offset: placed,
            size: req.size,
        })
    }

    pub fn free(&mut self, handle: AllocHandle) -> AllocResult<AllocationEntry> {
        let entry = self.allocations.remove(handle).ok_or_else(|| {
            warn!("Rejected free of unknown suballocation {}", handle);
            AllocError::InvalidHandle(handle.to_string())
        })?;

        self.regions.remove(&entry.offset);
        let mut offset = entry.offset;
        let mut size = entry.size;

        // Merge with the left neighbour
        let left = self
            .regions
            .range(..offset)
            .next_back()
            .map(|(&o, s)| (o, *s));
        if let Some((left_offset, left)) = left {
            if left.occupant == Occupant::Free && left_offset + left.size == offset {
                self.remove_free(left_offset, left.size);
                offset = left_offset;
                size += left.size;
            }
        }

        // Merge with the right neighbour
        let right_offset = offset + size;
        if let Some(right) = self.regions.get(&right_offset).copied() {
            if right.occupant == Occupant::Free {
                self.remove_free(right_offset, right.size);
                size += right.size;
            }
        }

        self.insert_free(offset, size);
        self.free_bytes += entry.size;
        Ok(entry)
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.free_by_size.clear();
        self.allocations.clear();
        self.free_bytes = self.size;
        self.insert_free(0, self.size);
    }

    pub fn used_bytes(&self) -> DeviceSize {
        self.size - self.free_bytes
    }

    pub fn allocations(&self) -> &SlotTable<AllocationEntry> {
        &self.allocations
    }

    pub fn allocations_mut(&mut self) -> &mut SlotTable<AllocationEntry> {
        &mut self.allocations
    }

    pub fn regions(&self) -> Vec<Region> {
        self.regions
            .iter()
            .map(|(&offset, s)| Region {
                offset,
                size: s.size,
                kind: match s.occupant {
                    Occupant::Free => RegionKind::Free,
                    Occupant::Used(handle) => RegionKind::Allocated {
                        user_data: self
                            .allocations
                            .get(handle)
                            .map(|e| e.user_data)
                            .unwrap_or_default(),
                    },
                },
            })
            .collect()
    }

    pub fn add_statistics(&self, stats: &mut DetailedStatistics) {
        for s in self.regions.values() {
            match s.occupant {
                Occupant::Free => stats.add_unused_range(s.size),
                Occupant::Used(_) => stats.add_allocation(s.size),
            }
        }
    }

    pub fn validate(&self) -> AllocResult<()> {
        let corrupt = |msg: String| Err(AllocError::Corruption(msg));

        let mut expected = 0;
        let mut prev_free = false;
        let mut free_sum = 0;
        let mut free_count = 0;
        let mut used_count = 0;

        for (&offset, s) in &self.regions {
            if offset != expected {
                return corrupt(format!("gap or overlap at offset {} (expected {})", offset, expected));
            }
            if s.size == 0 {
                return corrupt(format!("empty region at offset {}", offset));
            }
            match s.occupant {
                Occupant::Free => {
                    if prev_free {
                        return corrupt(format!("uncoalesced free regions at offset {}", offset));
                    }
                    if !self.free_by_size.contains(&(s.size, offset)) {
                        return corrupt(format!("free region at {} missing from size index", offset));
                    }
                    free_sum += s.size;
                    free_count += 1;
                    prev_free = true;
                }
                Occupant::Used(handle) => {
                    match self.allocations.get(handle) {
                        Some(e) if e.offset == offset && e.size == s.size => {}
                        _ => return corrupt(format!("allocation at {} has stale metadata", offset)),
                    }
                    used_count += 1;
                    prev_free = false;
                }
            }
            expected = offset + s.size;
        }

        if expected != self.size {
            return corrupt(format!("regions end at {} but block is {} bytes", expected, self.size));
        }
        if free_sum != self.free_bytes || free_count != self.free_by_size.len() {
            return corrupt("free byte accounting mismatch".to_string());
        }
        if used_count != self.allocations.len() {
            return corrupt("allocation count mismatch".to_string());
        }
        Ok(())
    }
}
