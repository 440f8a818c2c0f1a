/*!
 * Linear Suballocator
 * Stack, double stack and ring buffer placement driven by cursors
 */

use super::{AllocationEntry, PlacementRequest};
use crate::core::{align_down, align_up, AllocError, AllocResult, DeviceSize};
use crate::memory::slots::{AllocHandle, SlotTable};
use crate::memory::stats::DetailedStatistics;
use crate::memory::types::{LinearMode, Region, RegionKind, VirtualAllocation};
use log::{trace, warn};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct StackEntry {
    offset: DeviceSize,
    size: DeviceSize,
    handle: AllocHandle,
}

impl StackEntry {
    fn end(&self) -> DeviceSize {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy)]
struct RingEntry {
    offset: DeviceSize,
    size: DeviceSize,
    live: bool,
}

/// Cursor-based suballocator
///
/// Stack modes keep `front` ascending from offset 0 and `back` descending
/// from the end of the block. Ring mode keeps entries in allocation order;
/// the front entry is the oldest live allocation (`firstOccupied`).
#[derive(Debug, Clone)]
pub struct LinearSuballocator {
    size: DeviceSize,
    mode: LinearMode,
    front: Vec<StackEntry>,
    back: Vec<StackEntry>,
    ring: VecDeque<RingEntry>,
    allocations: SlotTable<AllocationEntry>,
    used_bytes: DeviceSize,
}

impl LinearSuballocator {
    pub fn new(size: DeviceSize, mode: LinearMode) -> Self {
        Self {
            size,
            mode,
            front: Vec::new(),
            back: Vec::new(),
            ring: VecDeque::new(),
            allocations: SlotTable::new(),
            used_bytes: 0,
        }
    }

    fn front_top(&self) -> DeviceSize {
        self.front.last().map_or(0, StackEntry::end)
    }

    fn back_bottom(&self) -> DeviceSize {
        self.back.last().map_or(self.size, |e| e.offset)
    }

    fn place_stack(&self, req: &PlacementRequest) -> Option<DeviceSize> {
        let top = self.front_top();
        let bottom = self.back_bottom();
        if req.upper_address {
            if bottom < req.size {
                return None;
            }
            let placed = align_down(bottom - req.size, req.alignment);
            (placed >= top).then_some(placed)
        } else {
            let placed = align_up(top, req.alignment);
            (placed + req.size <= bottom).then_some(placed)
        }
    }

    fn place_ring(&self, req: &PlacementRequest) -> Option<DeviceSize> {
        let (first, last) = match (self.ring.front(), self.ring.back()) {
            (Some(first), Some(last)) => (first, last),
            _ => return (req.size <= self.size).then_some(0),
        };

        let tail = align_up(last.offset + last.size, req.alignment);
        let wrapped = last.offset < first.offset;
        if wrapped {
            return (tail + req.size <= first.offset).then_some(tail);
        }
        if tail + req.size <= self.size {
            return Some(tail);
        }
        // Wrap to the start, never past the oldest live allocation
        (req.size <= first.offset).then_some(0)
    }

    pub fn allocate(&mut self, req: &PlacementRequest) -> AllocResult<VirtualAllocation> {
        if req.upper_address && self.mode != LinearMode::DoubleStack {
            return Err(AllocError::InvalidFlags(format!(
                "UPPER_ADDRESS requires a double stack block, this block is {:?}",
                self.mode
            )));
        }

        let placed = match self.mode {
            LinearMode::Stack | LinearMode::DoubleStack => self.place_stack(req),
            LinearMode::Ring => self.place_ring(req),
        }
        .ok_or_else(|| AllocError::out_of_memory(req.size, req.alignment))?;

        let handle = self.allocations.insert(AllocationEntry {
            offset: placed,
            size: req.size,
            user_data: req.user_data,
        });
        let entry = StackEntry {
            offset: placed,
            size: req.size,
            handle,
        };
        match self.mode {
            LinearMode::Ring => self.ring.push_back(RingEntry {
                offset: placed,
                size: req.size,
                live: true,
            }),
            _ if req.upper_address => self.back.push(entry),
            _ => self.front.push(entry),
        }
        self.used_bytes += req.size;

        trace!(
            "Linear {:?} placed {} bytes at offset {}",
            self.mode,
            req.size,
            placed
        );

        Ok(VirtualAllocation {
            handle,
            offset: placed,
            size: req.size,
        })
    }

    /// Index of the ring entry at `offset`
    ///
    /// The ring holds at most two ascending runs: the entries at or above the
    /// oldest allocation, then the wrapped entries below it.
    fn ring_position(&self, offset: DeviceSize) -> Option<usize> {
        let first_offset = self.ring.front()?.offset;
        let split = self.ring.partition_point(|e| e.offset >= first_offset);
        let (start, end) = if offset >= first_offset {
            (0, split)
        } else {
            (split, self.ring.len())
        };
        let (mut lo, mut hi) = (start, end);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.ring[mid].offset < offset {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < end && self.ring[lo].offset == offset).then_some(lo)
    }

    pub fn free(&mut self, handle: AllocHandle) -> AllocResult<AllocationEntry> {
        let entry = *self.allocations.get(handle).ok_or_else(|| {
            warn!("Rejected free of unknown linear suballocation {}", handle);
            AllocError::InvalidHandle(handle.to_string())
        })?;

        match self.mode {
            LinearMode::Ring => {
                let index = self.ring_position(entry.offset).ok_or_else(|| {
                    AllocError::Corruption(format!("ring lost entry at offset {}", entry.offset))
                })?;
                self.ring[index].live = false;
                while self.ring.front().is_some_and(|e| !e.live) {
                    self.ring.pop_front();
                }
                while self.ring.back().is_some_and(|e| !e.live) {
                    self.ring.pop_back();
                }
            }
            _ => {
                if self.front.last().is_some_and(|e| e.handle == handle) {
                    self.front.pop();
                } else if self.back.last().is_some_and(|e| e.handle == handle) {
                    self.back.pop();
                } else {
                    warn!(
                        "Rejected out-of-order free at offset {} in {:?} block",
                        entry.offset, self.mode
                    );
                    return Err(AllocError::InvalidFreeOrder {
                        offset: entry.offset,
                    });
                }
            }
        }

        self.allocations.remove(handle);
        self.used_bytes -= entry.size;
        Ok(entry)
    }

    /// Drop every allocation at once
    pub fn clear(&mut self) {
        self.front.clear();
        self.back.clear();
        self.ring.clear();
        self.allocations.clear();
        self.used_bytes = 0;
    }

    pub fn used_bytes(&self) -> DeviceSize {
        self.used_bytes
    }

    pub fn allocations(&self) -> &SlotTable<AllocationEntry> {
        &self.allocations
    }

    pub fn allocations_mut(&mut self) -> &mut SlotTable<AllocationEntry> {
        &mut self.allocations
    }

    fn live_entries(&self) -> Vec<AllocationEntry> {
        let mut live: Vec<AllocationEntry> = self.allocations.iter().map(|(_, e)| *e).collect();
        live.sort_by_key(|e| e.offset);
        live
    }

    pub fn regions(&self) -> Vec<Region> {
        let mut regions = Vec::new();
        let mut cursor = 0;
        for e in self.live_entries() {
            if e.offset > cursor {
                regions.push(Region {
                    offset: cursor,
                    size: e.offset - cursor,
                    kind: RegionKind::Free,
                });
            }
            regions.push(Region {
                offset: e.offset,
                size: e.size,
                kind: RegionKind::Allocated {
                    user_data: e.user_data,
                },
            });
            cursor = e.offset + e.size;
        }
        if cursor < self.size {
            regions.push(Region {
                offset: cursor,
                size: self.size - cursor,
                kind: RegionKind::Free,
            });
        }
        regions
    }

    pub fn add_statistics(&self, stats: &mut DetailedStatistics) {
        for region in self.regions() {
            if region.is_free() {
                stats.add_unused_range(region.size);
            } else {
                stats.add_allocation(region.size);
            }
        }
    }

    pub fn validate(&self) -> AllocResult<()> {
        let corrupt = |msg: String| Err(AllocError::Corruption(msg));

        let mut cursor = 0;
        let mut used = 0;
        for e in self.live_entries() {
            if e.offset < cursor {
                return corrupt(format!("overlapping allocations at offset {}", e.offset));
            }
            cursor = e.offset + e.size;
            used += e.size;
        }
        if cursor > self.size {
            return corrupt(format!("allocation ends at {} past block size {}", cursor, self.size));
        }
        if used != self.used_bytes {
            return corrupt("used byte accounting mismatch".to_string());
        }

        match self.mode {
            LinearMode::Ring => {
                let live = self.ring.iter().filter(|e| e.live).count();
                if live != self.allocations.len() {
                    return corrupt("ring entry count mismatch".to_string());
                }
                if self.ring.front().is_some_and(|e| !e.live) || self.ring.back().is_some_and(|e| !e.live) {
                    return corrupt("ring ends hold freed entries".to_string());
                }
            }
            _ => {
                if self.front.len() + self.back.len() != self.allocations.len() {
                    return corrupt("stack entry count mismatch".to_string());
                }
                if self.front.windows(2).any(|w| w[0].end() > w[1].offset)
                    || self.back.windows(2).any(|w| w[1].end() > w[0].offset)
                {
                    return corrupt("stack order violated".to_string());
                }
                if self.front_top() > self.back_bottom() {
                    return corrupt("front and back stacks crossed".to_string());
                }
            }
        }
        Ok(())
    }
}
