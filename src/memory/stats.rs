/*!
 * Memory Statistics
 * Per-block, per-pool and allocator-wide occupancy figures
 */

use crate::core::{DeviceSize, HeapType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cheap aggregate counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub block_count: usize,
    pub allocation_count: usize,
    pub block_bytes: DeviceSize,
    pub allocation_bytes: DeviceSize,
}

impl Statistics {
    pub fn merge(&mut self, other: &Statistics) {
        self.block_count += other.block_count;
        self.allocation_count += other.allocation_count;
        self.block_bytes += other.block_bytes;
        self.allocation_bytes += other.allocation_bytes;
    }

    pub fn unused_bytes(&self) -> DeviceSize {
        self.block_bytes - self.allocation_bytes
    }
}

/// Aggregate counters plus size extremes
///
/// Minimums are `DeviceSize::MAX` and maximums are 0 while nothing was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedStatistics {
    pub stats: Statistics,
    pub unused_range_count: usize,
    pub allocation_size_min: DeviceSize,
    pub allocation_size_max: DeviceSize,
    pub unused_range_size_min: DeviceSize,
    pub unused_range_size_max: DeviceSize,
}

impl Default for DetailedStatistics {
    fn default() -> Self {
        Self {
            stats: Statistics::default(),
            unused_range_count: 0,
            allocation_size_min: DeviceSize::MAX,
            allocation_size_max: 0,
            unused_range_size_min: DeviceSize::MAX,
            unused_range_size_max: 0,
        }
    }
}

impl DetailedStatistics {
    pub fn add_block(&mut self, size: DeviceSize) {
        self.stats.block_count += 1;
        self.stats.block_bytes += size;
    }

    pub fn add_allocation(&mut self, size: DeviceSize) {
        self.stats.allocation_count += 1;
        self.stats.allocation_bytes += size;
        self.allocation_size_min = self.allocation_size_min.min(size);
        self.allocation_size_max = self.allocation_size_max.max(size);
    }

    pub fn add_unused_range(&mut self, size: DeviceSize) {
        self.unused_range_count += 1;
        self.unused_range_size_min = self.unused_range_size_min.min(size);
        self.unused_range_size_max = self.unused_range_size_max.max(size);
    }

    pub fn merge(&mut self, other: &DetailedStatistics) {
        self.stats.merge(&other.stats);
        self.unused_range_count += other.unused_range_count;
        self.allocation_size_min = self.allocation_size_min.min(other.allocation_size_min);
        self.allocation_size_max = self.allocation_size_max.max(other.allocation_size_max);
        self.unused_range_size_min = self.unused_range_size_min.min(other.unused_range_size_min);
        self.unused_range_size_max = self.unused_range_size_max.max(other.unused_range_size_max);
    }
}

/// Allocator-wide statistics, split by heap type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TotalStatistics {
    pub heap_types: HashMap<HeapType, DetailedStatistics>,
    pub total: DetailedStatistics,
}

impl TotalStatistics {
    pub fn add(&mut self, heap_type: HeapType, stats: &DetailedStatistics) {
        self.heap_types.entry(heap_type).or_default().merge(stats);
        self.total.merge(stats);
    }
}
