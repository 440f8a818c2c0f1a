/*!
 * Concurrency Tests
 * Shared allocator used from many tasks at once
 */

use gpu_suballoc::core::limits::MEGABYTE;
use gpu_suballoc::{
    AllocationDesc, Allocator, HeapFlags, HeapType, PoolDesc, ResourceDesc, SimulatedDevice,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;

const TASKS: usize = 32;
const BUFFER: u64 = 64 * 1024;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pool_allocations_are_disjoint() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Arc::new(Allocator::new(device.clone()).unwrap());
    let pool = allocator
        .create_pool(
            PoolDesc::new(HeapType::Default, HeapFlags::ALLOW_ONLY_BUFFERS)
                .with_block_size(MEGABYTE)
                .with_block_count(0, 8),
        )
        .unwrap();
    let desc = AllocationDesc::in_pool(pool.id());

    let handles: Vec<_> = (0..TASKS)
        .map(|i| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move {
                allocator.create_resource(&desc.with_user_data(i as u64), &ResourceDesc::buffer(BUFFER))
            })
        })
        .collect();

    let mut allocs = Vec::with_capacity(TASKS);
    for handle in handles {
        allocs.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(allocs.len(), TASKS);
    assert_eq!(pool.allocation_count(), TASKS);
    assert!(pool.block_count() <= 8);

    let mut by_heap: HashMap<_, Vec<(u64, u64)>> = HashMap::new();
    for alloc in &allocs {
        by_heap
            .entry(alloc.heap)
            .or_default()
            .push((alloc.offset, alloc.offset + alloc.size));
    }
    for ranges in by_heap.values_mut() {
        ranges.sort_unstable();
        assert!(ranges.windows(2).all(|w| w[0].1 <= w[1].0));
    }
    allocator.validate().unwrap();

    let frees: Vec<_> = allocs
        .into_iter()
        .map(|alloc| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move { allocator.free(alloc.id) })
        })
        .collect();
    for handle in frees {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(allocator.live_allocation_count(), 0);
    assert_eq!(pool.allocation_count(), 0);
    assert!(device.live_heaps() <= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_default_pool_creation() {
    let device = Arc::new(SimulatedDevice::new());
    let allocator = Arc::new(Allocator::new(device.clone()).unwrap());

    let handles: Vec<_> = (0..TASKS)
        .map(|i| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move {
                let resource = if i % 2 == 0 {
                    ResourceDesc::buffer(BUFFER)
                } else {
                    ResourceDesc::texture(BUFFER, false)
                };
                allocator.create_resource(&AllocationDesc::new(HeapType::Default), &resource)
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // One default pool per resource category, each fits in its first block
    assert_eq!(device.live_heaps(), 2);
    let stats = allocator.calculate_statistics();
    assert_eq!(stats.total.stats.allocation_count, TASKS);
    assert_eq!(stats.total.stats.block_count, 2);
}
