/*!
 * Allocation Records
 * Caller-facing allocation snapshots and the state tracked per allocation
 */

use crate::core::{
    AllocationId, DeviceSize, HeapFlags, HeapHandle, HeapType, NativeResource, PoolId,
    ResourceDesc, ResourceKind,
};
use crate::memory::{AllocationFlags, BlockAllocation, BlockVector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle of an allocation
///
/// `Created` -> `Bound` -> `Freed`. Aliasing resources start out `Bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    /// Memory reserved, no resource bound yet
    Created,
    /// A resource lives in the memory
    Bound,
    Freed,
}

/// Where an allocation is served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationDesc {
    /// Heap type of the default pool; ignored when `pool` is set
    pub heap_type: HeapType,
    pub flags: AllocationFlags,
    pub pool: Option<PoolId>,
    pub user_data: u64,
}

impl AllocationDesc {
    pub fn new(heap_type: HeapType) -> Self {
        Self {
            heap_type,
            flags: AllocationFlags::empty(),
            pool: None,
            user_data: 0,
        }
    }

    pub fn in_pool(pool: PoolId) -> Self {
        Self {
            pool: Some(pool),
            ..Self::new(HeapType::Default)
        }
    }

    pub fn with_flags(mut self, flags: AllocationFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }
}

/// Snapshot of an allocation handed to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub heap: HeapHandle,
    /// Offset of the allocation inside `heap`
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub committed: bool,
    pub resource: Option<NativeResource>,
    pub state: AllocationState,
    pub alias_of: Option<AllocationId>,
}

#[derive(Debug)]
pub(crate) enum Backing {
    Block {
        vector: Arc<BlockVector>,
        block: BlockAllocation,
    },
    Alias {
        parent: AllocationId,
    },
}

#[derive(Debug)]
pub(crate) struct AllocationRecord {
    pub backing: Backing,
    pub heap_type: HeapType,
    pub heap_flags: HeapFlags,
    pub heap: HeapHandle,
    pub offset: DeviceSize,
    pub size: DeviceSize,
    /// Alignment the memory was reserved with
    pub alignment: DeviceSize,
    pub committed: bool,
    pub kind: ResourceKind,
    pub pool: Option<PoolId>,
    pub state: AllocationState,
    pub resource: Option<NativeResource>,
    /// Description of the bound resource, used to re-create it after a move
    pub resource_desc: Option<ResourceDesc>,
    pub alias_count: usize,
}

impl AllocationRecord {
    pub fn alias_of(&self) -> Option<AllocationId> {
        match self.backing {
            Backing::Alias { parent } => Some(parent),
            Backing::Block { .. } => None,
        }
    }

    pub fn snapshot(&self, id: AllocationId) -> Allocation {
        Allocation {
            id,
            heap: self.heap,
            offset: self.offset,
            size: self.size,
            committed: self.committed,
            resource: self.resource,
            state: self.state,
            alias_of: self.alias_of(),
        }
    }
}
