/*!
 * Memory Module
 * Address-space suballocation and device block management
 */

pub mod block_vector;
pub mod defragment;
pub mod slots;
pub mod stats;
pub mod suballocator;
pub mod traits;
pub mod types;
pub mod virtual_block;

// Re-export for convenience
pub use block_vector::{BlockAllocation, BlockHandle, BlockVector, BlockVectorConfig};
pub use defragment::{
    DefragmentationAlgorithm, DefragmentationDesc, DefragmentationStats, MoveCandidate,
    MoveOperation, PassBudget, PlannedMove,
};
pub use slots::{AllocHandle, SlotTable};
pub use stats::{DetailedStatistics, Statistics, TotalStatistics};
pub use traits::*;
pub use types::*;
pub use virtual_block::VirtualBlock;
