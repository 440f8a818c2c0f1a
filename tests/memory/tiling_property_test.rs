/*!
 * Region Tiling Properties
 * Random allocate/free sequences keep every block consistent
 */

use gpu_suballoc::memory::{Region, RegionKind};
use gpu_suballoc::{
    AllocHandle, Algorithm, AllocationFlags, LinearMode, VirtualAllocationDesc, VirtualBlock,
    VirtualBlockDesc,
};
use proptest::prelude::*;

const BLOCK_SIZE: u64 = 4096;

#[derive(Debug, Clone)]
enum Op {
    Alloc {
        size: u64,
        align_shift: u32,
        strategy: u8,
        upper: bool,
    },
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u64..400, 0u32..7, 0u8..4, any::<bool>()).prop_map(|(size, align_shift, strategy, upper)| {
            Op::Alloc { size, align_shift, strategy, upper }
        }),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

fn flags(strategy: u8, upper: bool) -> AllocationFlags {
    let mut flags = match strategy {
        1 => AllocationFlags::MIN_MEMORY,
        2 => AllocationFlags::MIN_OFFSET,
        3 => AllocationFlags::MIN_TIME,
        _ => AllocationFlags::empty(),
    };
    if upper {
        flags |= AllocationFlags::UPPER_ADDRESS;
    }
    flags
}

/// Regions must cover `[0, size)` exactly with no two free neighbours
fn check_tiling(regions: &[Region], size: u64) -> Result<(), TestCaseError> {
    let mut cursor = 0;
    let mut prev_free = false;
    for region in regions {
        prop_assert_eq!(region.offset, cursor, "gap or overlap at {}", cursor);
        prop_assert!(region.size > 0);
        let free = matches!(region.kind, RegionKind::Free);
        prop_assert!(!(free && prev_free), "adjacent free regions at {}", region.offset);
        prev_free = free;
        cursor = region.end();
    }
    prop_assert_eq!(cursor, size);
    Ok(())
}

/// Apply `ops`; frees that a linear block rejects keep the handle live
fn run(block: &mut VirtualBlock, ops: Vec<Op>, strict_free: bool) -> Result<(), TestCaseError> {
    let mut live: Vec<(AllocHandle, u64, u64)> = Vec::new();

    for op in ops {
        match op {
            Op::Alloc {
                size,
                align_shift,
                strategy,
                upper,
            } => {
                let alignment = 1u64 << align_shift;
                let upper = upper && block.algorithm() != Algorithm::Linear(LinearMode::Ring);
                let desc = VirtualAllocationDesc::new(size, alignment).with_flags(flags(strategy, upper));
                match block.allocate(&desc) {
                    Ok(alloc) => {
                        prop_assert_eq!(alloc.offset % alignment, 0);
                        prop_assert!(alloc.offset + alloc.size <= block.size());
                        live.push((alloc.handle, alloc.offset, alloc.size));
                    }
                    Err(e) => prop_assert!(e.is_out_of_memory(), "unexpected error {}", e),
                }
            }
            Op::Free(index) => {
                if live.is_empty() {
                    continue;
                }
                let index = index % live.len();
                match block.free(live[index].0) {
                    Ok(()) => {
                        live.swap_remove(index);
                    }
                    Err(e) => prop_assert!(!strict_free, "free failed: {}", e),
                }
            }
        }

        prop_assert!(block.validate().is_ok());
        check_tiling(&block.regions(), block.size())?;

        let mut ranges: Vec<_> = live.iter().map(|&(_, offset, size)| (offset, offset + size)).collect();
        ranges.sort_unstable();
        prop_assert!(ranges.windows(2).all(|w| w[0].1 <= w[1].0), "live allocations overlap");
        let used: u64 = live.iter().map(|&(_, _, size)| size).sum();
        prop_assert_eq!(block.info().used_bytes, used);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_general_block_stays_tiled(ops in prop::collection::vec(op(), 1..200)) {
        let mut block = VirtualBlock::new(VirtualBlockDesc::new(BLOCK_SIZE)).unwrap();
        run(&mut block, ops, true)?;
    }

    #[test]
    fn prop_ring_block_stays_tiled(ops in prop::collection::vec(op(), 1..200)) {
        let mut block = VirtualBlock::new(VirtualBlockDesc::linear(BLOCK_SIZE, LinearMode::Ring)).unwrap();
        run(&mut block, ops, true)?;
    }

    #[test]
    fn prop_double_stack_block_stays_tiled(ops in prop::collection::vec(op(), 1..200)) {
        let mut block = VirtualBlock::new(VirtualBlockDesc::linear(BLOCK_SIZE, LinearMode::DoubleStack)).unwrap();
        run(&mut block, ops, false)?;
    }

    #[test]
    fn prop_free_everything_restores_single_region(sizes in prop::collection::vec(1u64..256, 1..32)) {
        let mut block = VirtualBlock::new(VirtualBlockDesc::new(BLOCK_SIZE)).unwrap();
        let handles: Vec<_> = sizes
            .iter()
            .filter_map(|&size| block.allocate(&VirtualAllocationDesc::new(size, 8)).ok())
            .map(|alloc| alloc.handle)
            .collect();
        for handle in handles.into_iter().rev() {
            prop_assert!(block.free(handle).is_ok());
        }
        let regions = block.regions();
        prop_assert_eq!(regions.len(), 1);
        prop_assert_eq!(regions[0].size, BLOCK_SIZE);
    }
}
