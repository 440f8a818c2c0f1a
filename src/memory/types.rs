/*!
 * Memory Types
 * Request, placement and region types shared by the suballocators
 */

use super::slots::AllocHandle;
use crate::core::{AllocError, AllocResult, DeviceSize};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Per-request placement flags
    ///
    /// The strategy bits are mutually exclusive. The commit bits are only
    /// meaningful for block vectors and are ignored by a single block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AllocationFlags: u32 {
        /// Best fit: smallest free region that satisfies the request
        const MIN_MEMORY = 1 << 0;
        /// Lowest-address free region that satisfies the request
        const MIN_OFFSET = 1 << 1;
        /// First fitting region in scan order, no further search
        const MIN_TIME = 1 << 2;
        /// Place at the top of the chosen region, growing downwards
        const UPPER_ADDRESS = 1 << 3;
        /// Always give the request its own dedicated block
        const FORCE_COMMITTED = 1 << 4;
        /// Never give the request a dedicated block
        const NEVER_COMMITTED = 1 << 5;
        /// Only use existing blocks, never create a new one
        const NEVER_ALLOCATE = 1 << 6;
    }
}

/// Region selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    MinMemory,
    MinOffset,
    MinTime,
}

impl Strategy {
    /// Extract the explicitly requested strategy, rejecting combinations
    pub fn from_flags(flags: AllocationFlags) -> AllocResult<Option<Strategy>> {
        let bits = flags
            & (AllocationFlags::MIN_MEMORY | AllocationFlags::MIN_OFFSET | AllocationFlags::MIN_TIME);
        match bits.bits().count_ones() {
            0 => Ok(None),
            1 if bits == AllocationFlags::MIN_MEMORY => Ok(Some(Strategy::MinMemory)),
            1 if bits == AllocationFlags::MIN_OFFSET => Ok(Some(Strategy::MinOffset)),
            1 => Ok(Some(Strategy::MinTime)),
            _ => Err(AllocError::InvalidFlags(format!(
                "at most one strategy may be requested, got {:?}",
                bits
            ))),
        }
    }
}

/// Operating mode of a linear block, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearMode {
    /// Single upward stack, strict LIFO frees
    Stack,
    /// Upward and downward stacks sharing one block
    DoubleStack,
    /// Circular buffer that wraps to offset 0
    Ring,
}

/// Suballocation algorithm of a block, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    General,
    Linear(LinearMode),
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::General
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::General => write!(f, "general"),
            Algorithm::Linear(LinearMode::Stack) => write!(f, "linear-stack"),
            Algorithm::Linear(LinearMode::DoubleStack) => write!(f, "linear-double-stack"),
            Algorithm::Linear(LinearMode::Ring) => write!(f, "linear-ring"),
        }
    }
}

/// Parameters of a virtual block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualBlockDesc {
    pub size: DeviceSize,
    pub algorithm: Algorithm,
}

impl VirtualBlockDesc {
    pub fn new(size: DeviceSize) -> Self {
        Self {
            size,
            algorithm: Algorithm::General,
        }
    }

    pub fn linear(size: DeviceSize, mode: LinearMode) -> Self {
        Self {
            size,
            algorithm: Algorithm::Linear(mode),
        }
    }
}

/// Suballocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAllocationDesc {
    pub size: DeviceSize,
    pub alignment: DeviceSize,
    pub flags: AllocationFlags,
    pub user_data: u64,
}

impl VirtualAllocationDesc {
    pub fn new(size: DeviceSize, alignment: DeviceSize) -> Self {
        Self {
            size,
            alignment,
            flags: AllocationFlags::empty(),
            user_data: 0,
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

/// Successful suballocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualAllocation {
    pub handle: AllocHandle,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// Metadata of a live suballocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualAllocationInfo {
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub user_data: u64,
}

/// Occupancy state of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    Free,
    Allocated { user_data: u64 },
}

/// One entry of a block's ordered region list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub kind: RegionKind,
}

impl Region {
    pub fn end(&self) -> DeviceSize {
        self.offset + self.size
    }

    pub fn is_free(&self) -> bool {
        matches!(self.kind, RegionKind::Free)
    }
}

/// Occupancy summary of a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockInfo {
    pub used_bytes: DeviceSize,
    pub free_bytes: DeviceSize,
    pub allocation_count: usize,
}
