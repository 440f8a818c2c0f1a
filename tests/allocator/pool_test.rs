/*!
 * Pool Tests
 * Custom pools, committed allocations and aliasing resources
 */

use gpu_suballoc::core::limits::MEGABYTE;
use gpu_suballoc::{
    AllocError, Algorithm, AllocationDesc, AllocationFlags, AllocationState, Allocator, HeapFlags,
    HeapType, LinearMode, PoolDesc, ResourceDesc, SimulatedDevice,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn setup() -> (Arc<SimulatedDevice>, Allocator) {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device.clone()).unwrap();
    (device, allocator)
}

#[test]
fn test_min_blocks_created_eagerly_and_released_on_destroy() {
    let (device, allocator) = setup();
    let pool = allocator
        .create_pool(
            PoolDesc::new(HeapType::Upload, HeapFlags::ALLOW_ONLY_BUFFERS)
                .with_block_size(2 * MEGABYTE)
                .with_block_count(3, 3),
        )
        .unwrap();
    assert_eq!(device.live_heaps(), 3);
    assert_eq!(device.allocated_bytes(), 6 * MEGABYTE);
    assert_eq!(pool.block_count(), 3);

    let id = pool.id();
    drop(pool);
    allocator.destroy_pool(id).unwrap();
    assert_eq!(device.live_heaps(), 0);
    assert!(allocator.pool(id).is_none());
}

#[test]
fn test_pool_statistics() {
    let (_device, allocator) = setup();
    let pool = allocator
        .create_pool(
            PoolDesc::new(HeapType::Default, HeapFlags::ALLOW_ONLY_BUFFERS).with_block_size(MEGABYTE),
        )
        .unwrap();
    let desc = AllocationDesc::in_pool(pool.id());
    allocator.create_resource(&desc, &ResourceDesc::buffer(128 * 1024)).unwrap();
    allocator.create_resource(&desc, &ResourceDesc::buffer(64 * 1024)).unwrap();

    let stats = pool.statistics();
    assert_eq!(stats.block_count, 1);
    assert_eq!(stats.allocation_count, 2);
    assert_eq!(stats.block_bytes, MEGABYTE);
    assert_eq!(stats.allocation_bytes, 192 * 1024);

    let detailed = pool.calculate_statistics();
    assert_eq!(detailed.allocation_size_min, 64 * 1024);
    assert_eq!(detailed.allocation_size_max, 128 * 1024);
    assert_eq!(detailed.unused_range_count, 1);
}

#[test]
fn test_linear_pool_serves_stack_order() {
    let (_device, allocator) = setup();
    let pool = allocator
        .create_pool(
            PoolDesc::new(HeapType::Upload, HeapFlags::ALLOW_ONLY_BUFFERS)
                .with_block_size(MEGABYTE)
                .with_block_count(1, 1)
                .with_algorithm(Algorithm::Linear(LinearMode::Stack)),
        )
        .unwrap();
    let desc = AllocationDesc::in_pool(pool.id());

    let a = allocator.create_resource(&desc, &ResourceDesc::buffer(64 * 1024)).unwrap();
    let b = allocator.create_resource(&desc, &ResourceDesc::buffer(64 * 1024)).unwrap();
    assert_eq!(a.offset, 0);
    assert_eq!(b.offset, 64 * 1024);

    assert!(matches!(
        allocator.free(a.id),
        Err(AllocError::InvalidFreeOrder { .. })
    ));
    allocator.free(b.id).unwrap();
    allocator.free(a.id).unwrap();
    assert_eq!(pool.allocation_count(), 0);
}

#[test]
fn test_committed_allocations_get_dedicated_heaps() {
    let (device, allocator) = setup();
    let desc = AllocationDesc::new(HeapType::Default);

    let forced = allocator
        .create_resource(
            &desc.with_flags(AllocationFlags::FORCE_COMMITTED),
            &ResourceDesc::buffer(4096),
        )
        .unwrap();
    assert!(forced.committed);
    assert_eq!(forced.offset, 0);

    let large = allocator
        .create_resource(&desc, &ResourceDesc::buffer(40 * MEGABYTE))
        .unwrap();
    assert!(large.committed);
    assert_eq!(device.heap_desc(large.heap).unwrap().size, 40 * MEGABYTE);
    assert_eq!(device.live_heaps(), 2);

    allocator.free(forced.id).unwrap();
    allocator.free(large.id).unwrap();
    assert_eq!(device.live_heaps(), 0);
}

#[test]
fn test_conflicting_commit_flags() {
    let (device, allocator) = setup();
    let flags = AllocationFlags::FORCE_COMMITTED | AllocationFlags::NEVER_COMMITTED;
    let err = allocator
        .create_resource(
            &AllocationDesc::new(HeapType::Default).with_flags(flags),
            &ResourceDesc::buffer(4096),
        )
        .unwrap_err();
    assert!(matches!(err, AllocError::InvalidFlags(_)));
    assert_eq!(device.live_heaps(), 0);
}

#[test]
fn test_alias_shares_parent_memory() {
    let (device, allocator) = setup();
    let desc = AllocationDesc::new(HeapType::Default);
    let parent = allocator
        .create_resource(&desc, &ResourceDesc::buffer(MEGABYTE))
        .unwrap();

    let alias = allocator
        .create_aliasing_resource(parent.id, 256 * 1024, &ResourceDesc::buffer(256 * 1024))
        .unwrap();
    assert_eq!(alias.heap, parent.heap);
    assert_eq!(alias.offset, parent.offset + 256 * 1024);
    assert_eq!(alias.state, AllocationState::Bound);
    assert_ne!(alias.resource, parent.resource);
    assert_eq!(device.bound_resources(), 2);

    // Aliases never take space in the block
    let stats = allocator.calculate_statistics();
    assert_eq!(stats.total.stats.allocation_count, 1);
    assert_eq!(stats.total.stats.allocation_bytes, MEGABYTE);
}

#[test]
fn test_alias_validation_order() {
    let (_device, allocator) = setup();
    let parent = allocator
        .create_resource(&AllocationDesc::new(HeapType::Default), &ResourceDesc::buffer(MEGABYTE))
        .unwrap();

    assert_eq!(
        allocator.create_aliasing_resource(parent.id, MEGABYTE, &ResourceDesc::texture(4096, false)),
        Err(AllocError::AliasOutOfBounds {
            offset: MEGABYTE,
            size: 4096,
            parent_size: MEGABYTE,
        })
    );
    assert!(matches!(
        allocator.create_aliasing_resource(parent.id, 0, &ResourceDesc::texture(4096, false)),
        Err(AllocError::AliasingConflict(_))
    ));
    assert_eq!(
        allocator.create_aliasing_resource(parent.id, 4096, &ResourceDesc::buffer(4096)),
        Err(AllocError::InvalidAlignment(64 * 1024))
    );
    assert_eq!(
        allocator.create_aliasing_resource(
            parent.id,
            4096,
            &ResourceDesc::buffer(4096).with_alignment(4096)
        )
        .map(|a| a.offset),
        Ok(parent.offset + 4096)
    );
}

#[test]
fn test_alias_of_alias_rejected() {
    let (_device, allocator) = setup();
    let parent = allocator
        .create_resource(&AllocationDesc::new(HeapType::Default), &ResourceDesc::buffer(MEGABYTE))
        .unwrap();
    let alias = allocator
        .create_aliasing_resource(parent.id, 0, &ResourceDesc::buffer(4096))
        .unwrap();

    assert!(matches!(
        allocator.create_aliasing_resource(alias.id, 0, &ResourceDesc::buffer(4096)),
        Err(AllocError::AliasingConflict(_))
    ));
}

#[test]
fn test_alias_freed_before_parent() {
    let (device, allocator) = setup();
    let parent = allocator
        .create_resource(&AllocationDesc::new(HeapType::Default), &ResourceDesc::buffer(MEGABYTE))
        .unwrap();
    let a = allocator
        .create_aliasing_resource(parent.id, 0, &ResourceDesc::buffer(4096))
        .unwrap();
    let b = allocator
        .create_aliasing_resource(parent.id, 0, &ResourceDesc::buffer(8192))
        .unwrap();

    assert_eq!(
        allocator.free(parent.id),
        Err(AllocError::AliasesOutstanding { count: 2 })
    );
    allocator.free(a.id).unwrap();
    allocator.free(b.id).unwrap();
    allocator.free(parent.id).unwrap();

    assert_eq!(allocator.allocation_state(a.id), Ok(AllocationState::Freed));
    assert_eq!(allocator.live_allocation_count(), 0);
    // The empty default block is kept
    assert_eq!(device.live_heaps(), 1);
}
