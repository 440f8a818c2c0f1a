/*!
 * Defragmentation Tests
 * Passes over custom and default pools, per-pass limits and move operations
 */

use gpu_suballoc::{
    Allocation, AllocationDesc, AllocError, AllocationState, Allocator, DefragmentationAlgorithm,
    DefragmentationContext, DefragmentationDesc, DefragmentationStats, HeapFlags, HeapType,
    MoveOperation, Pool, PoolDesc, ResourceDesc, SimulatedDevice,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;

const BUF: u64 = 64 * 1024;

fn upload_pool(allocator: &Allocator) -> Arc<Pool> {
    allocator
        .create_pool(
            PoolDesc::new(HeapType::Upload, HeapFlags::ALLOW_ONLY_BUFFERS).with_block_size(8 * BUF),
        )
        .unwrap()
}

/// Two full blocks with every second buffer freed
fn half_filled(allocator: &Allocator, pool: &Pool) -> Vec<Allocation> {
    let desc = AllocationDesc::in_pool(pool.id());
    let all: Vec<_> = (0..16)
        .map(|_| allocator.create_resource(&desc, &ResourceDesc::buffer(BUF)).unwrap())
        .collect();
    assert_eq!(pool.block_count(), 2);

    let mut kept = Vec::new();
    for (i, alloc) in all.into_iter().enumerate() {
        if i % 2 == 1 {
            allocator.free(alloc.id).unwrap();
        } else {
            kept.push(alloc);
        }
    }
    kept
}

/// Run passes to completion, copying every move; returns the pass count
fn run(context: &mut DefragmentationContext<'_>) -> usize {
    let mut passes = 0;
    while let Some(pass) = context.begin_pass().unwrap() {
        passes += 1;
        if context.end_pass(pass).unwrap() {
            break;
        }
    }
    passes
}

#[test]
fn test_empty_pool_has_nothing_to_do() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device).unwrap();
    let pool = upload_pool(&allocator);

    let mut context = allocator
        .begin_pool_defragmentation(pool.id(), DefragmentationDesc::default())
        .unwrap();
    assert!(context.begin_pass().unwrap().is_none());
    assert!(context.is_complete());
    assert_eq!(context.stats(), DefragmentationStats::default());
}

#[test]
fn test_sparse_block_is_emptied_and_released() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device.clone()).unwrap();
    let pool = upload_pool(&allocator);
    let kept = half_filled(&allocator, &pool);
    let bound_before = device.bound_resources();

    let mut context = allocator
        .begin_pool_defragmentation(pool.id(), DefragmentationDesc::default())
        .unwrap();
    let pass = context.begin_pass().unwrap().unwrap();
    assert_eq!(pass.moves.len(), 4);
    let expected: HashMap<_, _> = pass
        .moves
        .iter()
        .map(|m| (m.allocation, (m.dst_heap, m.dst_offset, m.dst_resource)))
        .collect();
    assert!(pass.moves.iter().all(|m| m.dst_resource.is_some()));
    assert!(context.end_pass(pass).unwrap());

    assert_eq!(
        context.stats(),
        DefragmentationStats {
            bytes_moved: 4 * BUF,
            bytes_freed: 8 * BUF,
            allocations_moved: 4,
            heaps_freed: 1,
        }
    );
    assert!(context.begin_pass().unwrap().is_none());
    drop(context);

    assert_eq!(pool.block_count(), 1);
    assert_eq!(device.live_heaps(), 1);
    assert_eq!(device.bound_resources(), bound_before + 4);
    for alloc in &kept {
        let now = allocator.allocation(alloc.id).unwrap();
        assert_eq!(now.state, AllocationState::Bound);
        if let Some(&(heap, offset, resource)) = expected.get(&alloc.id) {
            assert_eq!((now.heap, now.offset, now.resource), (heap, offset, resource));
        } else {
            assert_eq!((now.heap, now.offset), (alloc.heap, alloc.offset));
        }
    }
    allocator.validate().unwrap();
}

#[test]
fn test_per_pass_limits_spread_the_work() {
    let limits = [
        DefragmentationDesc::default().with_max_allocations_per_pass(1),
        DefragmentationDesc::default().with_max_bytes_per_pass(BUF),
    ];
    for desc in limits {
        let device = Arc::new(SimulatedDevice::new());
        let allocator = Allocator::new(device.clone()).unwrap();
        let pool = upload_pool(&allocator);
        half_filled(&allocator, &pool);

        let mut context = allocator.begin_pool_defragmentation(pool.id(), desc).unwrap();
        let mut passes = 0;
        while let Some(pass) = context.begin_pass().unwrap() {
            assert_eq!(pass.moves.len(), 1);
            passes += 1;
            let complete = context.end_pass(pass).unwrap();
            assert_eq!(complete, passes == 4);
        }
        assert_eq!(passes, 4);
        assert_eq!(context.stats().allocations_moved, 4);
        assert_eq!(context.stats().bytes_moved, 4 * BUF);
        assert_eq!(context.stats().heaps_freed, 1);
        drop(context);
        assert_eq!(device.live_heaps(), 1);
        allocator.validate().unwrap();
    }
}

#[test]
fn test_ignored_moves_stay_in_place() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device.clone()).unwrap();
    let pool = upload_pool(&allocator);
    half_filled(&allocator, &pool);

    let mut context = allocator
        .begin_pool_defragmentation(pool.id(), DefragmentationDesc::default())
        .unwrap();
    let mut pinned = Vec::new();
    while let Some(mut pass) = context.begin_pass().unwrap() {
        let first = &mut pass.moves[0];
        first.operation = MoveOperation::Ignore;
        pinned.push(allocator.allocation(first.allocation).unwrap());
        if context.end_pass(pass).unwrap() {
            break;
        }
    }

    assert_eq!(pinned.len(), 1);
    let stats = context.stats();
    assert_eq!(stats.allocations_moved, 3);
    assert_eq!(stats.heaps_freed, 0);
    drop(context);

    for before in pinned {
        assert_eq!(allocator.allocation(before.id).unwrap(), before);
    }
    assert_eq!(pool.block_count(), 2);
    assert_eq!(pool.allocation_count(), 8);
    allocator.validate().unwrap();
}

#[test]
fn test_destroy_operation_frees_the_allocation() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device.clone()).unwrap();
    let pool = upload_pool(&allocator);
    half_filled(&allocator, &pool);

    let mut context = allocator
        .begin_pool_defragmentation(pool.id(), DefragmentationDesc::default())
        .unwrap();
    let mut pass = context.begin_pass().unwrap().unwrap();
    let destroyed: Vec<_> = pass.moves.iter().map(|m| m.allocation).collect();
    for m in &mut pass.moves {
        m.operation = MoveOperation::Destroy;
    }
    assert!(context.end_pass(pass).unwrap());
    assert_eq!(context.stats().allocations_moved, 0);
    assert_eq!(context.stats().heaps_freed, 1);
    drop(context);

    for id in destroyed {
        assert_eq!(allocator.allocation_state(id), Ok(AllocationState::Freed));
    }
    assert_eq!(allocator.live_allocation_count(), 4);
    assert_eq!(device.live_heaps(), 1);
    allocator.validate().unwrap();
}

#[test]
fn test_allocation_freed_during_pass_is_skipped() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device.clone()).unwrap();
    let pool = upload_pool(&allocator);
    half_filled(&allocator, &pool);

    let mut context = allocator
        .begin_pool_defragmentation(pool.id(), DefragmentationDesc::default())
        .unwrap();
    let pass = context.begin_pass().unwrap().unwrap();
    allocator.free(pass.moves[0].allocation).unwrap();
    assert!(context.end_pass(pass).unwrap());
    assert_eq!(context.stats().allocations_moved, 3);
    drop(context);

    assert_eq!(pool.allocation_count(), 7);
    assert_eq!(pool.block_count(), 1);
    allocator.validate().unwrap();
}

#[test]
fn test_aliased_allocations_never_move() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device).unwrap();
    let pool = upload_pool(&allocator);
    let kept = half_filled(&allocator, &pool);
    for alloc in &kept {
        allocator
            .create_aliasing_resource(alloc.id, 0, &ResourceDesc::buffer(BUF / 2))
            .unwrap();
    }

    let mut context = allocator
        .begin_pool_defragmentation(pool.id(), DefragmentationDesc::default())
        .unwrap();
    assert_eq!(run(&mut context), 0);
    assert_eq!(context.stats(), DefragmentationStats::default());
    assert_eq!(pool.block_count(), 2);
}

#[test]
fn test_full_algorithm_compacts_default_pool() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device).unwrap();
    let desc = AllocationDesc::new(HeapType::Upload);
    let resource = ResourceDesc::buffer(BUF);
    let allocs: Vec<_> = (0..3)
        .map(|_| allocator.allocate_memory(&desc, &resource).unwrap())
        .collect();
    allocator.free(allocs[1].id).unwrap();

    let mut fast = allocator.begin_defragmentation(DefragmentationDesc::default());
    assert_eq!(run(&mut fast), 0);
    drop(fast);

    let mut full =
        allocator.begin_defragmentation(DefragmentationDesc::new(DefragmentationAlgorithm::Full));
    let pass = full.begin_pass().unwrap().unwrap();
    assert_eq!(pass.moves.len(), 1);
    assert_eq!(pass.moves[0].allocation, allocs[2].id);
    assert_eq!(pass.moves[0].dst_offset, allocs[1].offset);
    assert!(pass.moves[0].dst_resource.is_none());
    assert!(full.end_pass(pass).unwrap());
    drop(full);

    let moved = allocator.allocation(allocs[2].id).unwrap();
    assert_eq!(moved.offset, allocs[1].offset);
    assert_eq!(moved.state, AllocationState::Created);
    allocator.bind_resource(moved.id, &resource).unwrap();
    allocator.validate().unwrap();
}

#[test]
fn test_pass_protocol_misuse() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Allocator::new(device).unwrap();
    let pool = upload_pool(&allocator);
    half_filled(&allocator, &pool);

    assert!(matches!(
        allocator.begin_pool_defragmentation(gpu_suballoc::PoolId(999), DefragmentationDesc::default()),
        Err(AllocError::InvalidHandle(_))
    ));

    let mut context = allocator
        .begin_pool_defragmentation(pool.id(), DefragmentationDesc::default())
        .unwrap();
    assert!(matches!(
        context.end_pass(Default::default()),
        Err(AllocError::InvalidState(_))
    ));
    let pass = context.begin_pass().unwrap().unwrap();
    assert!(matches!(context.begin_pass(), Err(AllocError::InvalidState(_))));
    assert!(context.end_pass(pass).unwrap());
}
