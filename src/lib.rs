/*!
 * GPU Suballocator Library
 * Suballocation of large device heaps into resource-sized ranges
 *
 * Layers, leaves first:
 * - `memory::suballocator`: placement inside one block (general or linear)
 * - `memory::VirtualBlock`: public surface of a single block
 * - `memory::BlockVector`: growable set of heaps for one configuration
 * - `allocator::Allocator`: default and custom pools, committed placement, aliasing,
 *   defragmentation
 */

pub mod allocator;
pub mod backend;
pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use allocator::{
    Allocation, AllocationDesc, AllocationState, Allocator, AllocatorBuilder, AllocatorConfig,
    DefragmentationContext, DefragmentationMove, DefragmentationPass, Pool, PoolDesc, PoolFlags,
};
pub use backend::SimulatedDevice;
pub use crate::core::{
    AllocError, AllocResult, AllocationId, DeviceError, DeviceSize, HeapDesc, HeapFlags,
    HeapHandle, HeapType, NativeResource, PoolId, ResourceCategory, ResourceDesc, ResourceKind,
};
pub use memory::{
    Algorithm, AllocHandle, AllocationFlags, BlockVector, BlockVectorConfig,
    DefragmentationAlgorithm, DefragmentationDesc, DefragmentationStats, DetailedStatistics,
    HeapBackend, LinearMode, MoveOperation, ResourceBinder, Statistics, TotalStatistics,
    VirtualAllocation, VirtualAllocationDesc, VirtualBlock, VirtualBlockDesc,
};
pub use monitoring::init_tracing;
