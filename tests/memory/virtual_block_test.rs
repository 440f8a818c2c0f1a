/*!
 * Virtual Block Tests
 * Placement strategies, counters and handle validity of a single block
 */

use gpu_suballoc::{
    AllocError, AllocationFlags, VirtualAllocationDesc, VirtualBlock, VirtualBlockDesc,
};
use pretty_assertions::assert_eq;

/// Block of 400 bytes with `[100,150)` used and the rest free
fn block_with_hole() -> VirtualBlock {
    let mut block = VirtualBlock::new(VirtualBlockDesc::new(400)).unwrap();
    let first = block.allocate(&VirtualAllocationDesc::new(100, 1)).unwrap();
    block.allocate(&VirtualAllocationDesc::new(50, 1)).unwrap();
    block.free(first.handle).unwrap();
    block
}

#[test]
fn test_min_offset_takes_lowest_region() {
    let mut block = block_with_hole();
    let alloc = block
        .allocate(&VirtualAllocationDesc::new(40, 1).with_flags(AllocationFlags::MIN_OFFSET))
        .unwrap();
    assert_eq!(alloc.offset, 0);
}

#[test]
fn test_min_memory_takes_tightest_region() {
    let mut block = block_with_hole();
    let alloc = block
        .allocate(&VirtualAllocationDesc::new(40, 1).with_flags(AllocationFlags::MIN_MEMORY))
        .unwrap();
    // leftover 60 in [0,100) beats leftover 210 in [150,400)
    assert_eq!(alloc.offset, 0);
}

#[test]
fn test_upper_address_places_at_top() {
    let mut block = block_with_hole();
    let alloc = block
        .allocate(&VirtualAllocationDesc::new(40, 1).with_flags(AllocationFlags::UPPER_ADDRESS))
        .unwrap();
    assert_eq!(alloc.offset, 360);

    let aligned = block
        .allocate(
            &VirtualAllocationDesc::new(30, 16).with_flags(AllocationFlags::UPPER_ADDRESS),
        )
        .unwrap();
    assert_eq!(aligned.offset, 320);
    block.validate().unwrap();
}

#[test]
fn test_conflicting_strategies_rejected() {
    let mut block = block_with_hole();
    let flags = AllocationFlags::MIN_MEMORY | AllocationFlags::MIN_TIME;
    assert!(matches!(
        block.allocate(&VirtualAllocationDesc::new(8, 1).with_flags(flags)),
        Err(AllocError::InvalidFlags(_))
    ));
}

#[test]
fn test_allocate_free_restores_counters() {
    let mut block = VirtualBlock::new(VirtualBlockDesc::new(1024)).unwrap();
    let keep = block.allocate(&VirtualAllocationDesc::new(100, 1)).unwrap();
    let before = block.info();

    let alloc = block.allocate(&VirtualAllocationDesc::new(64, 16)).unwrap();
    assert_eq!(alloc.offset % 16, 0);
    assert!(alloc.offset + alloc.size <= block.size());

    block.free(alloc.handle).unwrap();
    assert_eq!(block.info(), before);
    assert_eq!(block.info().used_bytes, 100);
    assert_eq!(block.info().free_bytes, 924);
    assert!(block.allocation_info(keep.handle).is_ok());
}

#[test]
fn test_stale_handles_after_clear() {
    let mut block = VirtualBlock::new(VirtualBlockDesc::new(512)).unwrap();
    let old = block.allocate(&VirtualAllocationDesc::new(128, 8)).unwrap();
    block.clear();

    assert!(block.is_empty());
    assert!(matches!(block.free(old.handle), Err(AllocError::InvalidHandle(_))));

    // the slot is reused but the old handle stays dead
    let new = block.allocate(&VirtualAllocationDesc::new(128, 8)).unwrap();
    assert_eq!(new.offset, 0);
    assert_ne!(new.handle, old.handle);
    assert!(!block.contains(old.handle));
    block.free(new.handle).unwrap();
}

#[test]
fn test_handle_from_other_block_rejected() {
    let mut a = VirtualBlock::new(VirtualBlockDesc::new(256)).unwrap();
    let mut b = VirtualBlock::new(VirtualBlockDesc::new(256)).unwrap();
    let from_a = a.allocate(&VirtualAllocationDesc::new(16, 1)).unwrap();
    b.allocate(&VirtualAllocationDesc::new(16, 1)).unwrap();
    b.allocate(&VirtualAllocationDesc::new(16, 1)).unwrap();

    a.free(from_a.handle).unwrap();
    assert!(a.free(from_a.handle).is_err());
}

#[test]
fn test_exact_fill_and_out_of_memory() {
    let mut block = VirtualBlock::new(VirtualBlockDesc::new(256)).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| block.allocate(&VirtualAllocationDesc::new(64, 64)).unwrap())
        .collect();
    assert_eq!(block.info().free_bytes, 0);

    let err = block.allocate(&VirtualAllocationDesc::new(1, 1)).unwrap_err();
    assert!(err.is_out_of_memory());

    for alloc in handles {
        block.free(alloc.handle).unwrap();
    }
    assert_eq!(block.regions().len(), 1);
}
