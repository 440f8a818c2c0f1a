/*!
 * Custom Pools
 * Explicitly configured block vectors owned by the allocator
 */

use crate::core::limits::UNLIMITED_BLOCK_COUNT;
use crate::core::{DeviceSize, HeapFlags, HeapType, PoolId};
use crate::memory::{Algorithm, BlockVector, DetailedStatistics, Statistics};
use bitflags::bitflags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

bitflags! {
    /// Pool behaviour switches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PoolFlags: u32 {
        /// Every allocation gets its own dedicated block
        const ALWAYS_COMMITTED = 1 << 0;
    }
}

/// Parameters of a custom pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDesc {
    pub heap_type: HeapType,
    pub heap_flags: HeapFlags,
    pub min_block_count: usize,
    pub max_block_count: usize,
    /// Fixed size of every block, 0 for the allocator's growing default
    pub block_size: DeviceSize,
    pub algorithm: Algorithm,
    pub min_allocation_alignment: DeviceSize,
    pub budget: Option<DeviceSize>,
    pub flags: PoolFlags,
    pub name: Option<String>,
}

impl PoolDesc {
    pub fn new(heap_type: HeapType, heap_flags: HeapFlags) -> Self {
        Self {
            heap_type,
            heap_flags,
            min_block_count: 0,
            max_block_count: UNLIMITED_BLOCK_COUNT,
            block_size: 0,
            algorithm: Algorithm::General,
            min_allocation_alignment: 1,
            budget: None,
            flags: PoolFlags::empty(),
            name: None,
        }
    }

    pub fn with_block_size(mut self, block_size: DeviceSize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_block_count(mut self, min: usize, max: usize) -> Self {
        self.min_block_count = min;
        self.max_block_count = max;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_flags(mut self, flags: PoolFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_budget(mut self, budget: DeviceSize) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A custom pool and the block vector it owns
#[derive(Debug)]
pub struct Pool {
    id: PoolId,
    desc: PoolDesc,
    vector: Arc<BlockVector>,
    name: Mutex<Option<String>>,
}

impl Pool {
    pub(crate) fn new(id: PoolId, desc: PoolDesc, vector: Arc<BlockVector>) -> Self {
        let name = Mutex::new(desc.name.clone());
        Self {
            id,
            desc,
            vector,
            name,
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn desc(&self) -> &PoolDesc {
        &self.desc
    }

    pub(crate) fn vector(&self) -> &Arc<BlockVector> {
        &self.vector
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: Option<String>) {
        *self.name.lock() = name;
    }

    pub fn allocation_count(&self) -> usize {
        self.vector.allocation_count()
    }

    pub fn block_count(&self) -> usize {
        self.vector.block_count()
    }

    pub fn statistics(&self) -> Statistics {
        self.vector.statistics()
    }

    pub fn calculate_statistics(&self) -> DetailedStatistics {
        let mut stats = DetailedStatistics::default();
        self.vector.add_detailed_statistics(&mut stats);
        stats
    }
}
