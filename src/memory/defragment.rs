/*!
 * Defragmentation
 * Pass-based compaction of placed allocations
 *
 * A pass proposes moves of live allocations out of sparsely used blocks
 * into free space of fuller blocks. Destinations are reserved when the pass
 * is planned; the caller copies the data and then commits or ignores each
 * move. Blocks left empty are released when the pass ends.
 */

use super::block_vector::BlockAllocation;
use crate::core::DeviceSize;
use serde::{Deserialize, Serialize};

/// How hard a pass looks for destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefragmentationAlgorithm {
    /// Only move allocations into fuller blocks
    #[default]
    Fast,
    /// Also slide allocations to lower offsets inside their own block
    Full,
}

/// Limits of a defragmentation run; zero means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefragmentationDesc {
    pub algorithm: DefragmentationAlgorithm,
    pub max_bytes_per_pass: DeviceSize,
    pub max_allocations_per_pass: usize,
}

impl DefragmentationDesc {
    pub fn new(algorithm: DefragmentationAlgorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    pub fn with_max_bytes_per_pass(mut self, bytes: DeviceSize) -> Self {
        self.max_bytes_per_pass = bytes;
        self
    }

    pub fn with_max_allocations_per_pass(mut self, count: usize) -> Self {
        self.max_allocations_per_pass = count;
        self
    }
}

/// What the caller did with a proposed move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOperation {
    /// Data was copied; the allocation now lives at the destination
    #[default]
    Copy,
    /// Leave the allocation where it is and skip it in later passes
    Ignore,
    /// The caller no longer needs the allocation; free it
    Destroy,
}

/// Running totals of a defragmentation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DefragmentationStats {
    pub bytes_moved: DeviceSize,
    pub bytes_freed: DeviceSize,
    pub allocations_moved: usize,
    pub heaps_freed: usize,
}

/// Live allocation that may be moved, as seen by a block vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCandidate {
    pub block: BlockAllocation,
    pub alignment: DeviceSize,
}

/// Destination reserved for `candidates[candidate]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedMove {
    pub candidate: usize,
    pub dst: BlockAllocation,
}

/// Remaining allowance of one pass, shared by every vector it visits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassBudget {
    bytes_left: DeviceSize,
    moves_left: usize,
    exhausted: bool,
}

impl PassBudget {
    pub fn new(desc: &DefragmentationDesc) -> Self {
        Self {
            bytes_left: match desc.max_bytes_per_pass {
                0 => DeviceSize::MAX,
                bytes => bytes,
            },
            moves_left: match desc.max_allocations_per_pass {
                0 => usize::MAX,
                count => count,
            },
            exhausted: false,
        }
    }

    /// Charge a move of `size` bytes; false (and exhausted) if it does not fit
    pub fn take(&mut self, size: DeviceSize) -> bool {
        if self.moves_left == 0 || size > self.bytes_left {
            self.exhausted = true;
            return false;
        }
        self.moves_left -= 1;
        self.bytes_left -= size;
        true
    }

    /// A possible move was turned down for lack of allowance
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
