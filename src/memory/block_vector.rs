/*!
 * Block Vector
 * Growable set of device heaps for one memory configuration
 *
 * Placed allocations share blocks of the preferred size; committed
 * allocations get a dedicated block of exactly their size. Both kinds live
 * in the same vector and count toward the same block cap.
 *
 * Heap creation is the slow path and runs with the vector lock released.
 * The lock is retaken afterwards and the vector state re-checked, so a heap
 * that turned out to be unnecessary is destroyed instead of leaked.
 *
 * Defragmentation planning also lives here: it reserves destinations in
 * fuller blocks and leaves committing the moves to the caller.
 */

use super::defragment::{DefragmentationAlgorithm, MoveCandidate, PassBudget, PlannedMove};
use super::slots::{AllocHandle, SlotTable};
use super::stats::{DetailedStatistics, Statistics};
use super::suballocator::PlacementRequest;
use super::traits::HeapBackend;
use super::types::{
    Algorithm, AllocationFlags, LinearMode, Strategy, VirtualAllocationDesc, VirtualBlockDesc,
};
use super::virtual_block::VirtualBlock;
use crate::core::limits::{
    DEFAULT_BLOCK_SIZE, DEFAULT_PLACEMENT_ALIGNMENT_THRESHOLD, DEFAULT_PLACEMENT_THRESHOLD,
    NEW_BLOCK_SIZE_SHIFT_MAX, UNLIMITED_BLOCK_COUNT,
};
use crate::core::{
    check_alignment, AllocError, AllocResult, DeviceError, DeviceSize, HeapDesc, HeapFlags,
    HeapHandle, HeapType,
};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handle to one block inside a vector
pub type BlockHandle = AllocHandle;

/// Configuration of a block vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVectorConfig {
    pub heap_type: HeapType,
    pub heap_flags: HeapFlags,
    pub preferred_block_size: DeviceSize,
    /// Every placed block has exactly `preferred_block_size` bytes
    pub explicit_block_size: bool,
    pub min_block_count: usize,
    pub max_block_count: usize,
    pub algorithm: Algorithm,
    pub min_allocation_alignment: DeviceSize,
    /// Cap on the sum of block sizes
    pub budget: Option<DeviceSize>,
    pub placement_threshold: DeviceSize,
    pub placement_alignment_threshold: DeviceSize,
    pub always_committed: bool,
}

impl BlockVectorConfig {
    pub fn new(heap_type: HeapType, heap_flags: HeapFlags) -> Self {
        Self {
            heap_type,
            heap_flags,
            preferred_block_size: DEFAULT_BLOCK_SIZE,
            explicit_block_size: false,
            min_block_count: 0,
            max_block_count: UNLIMITED_BLOCK_COUNT,
            algorithm: Algorithm::General,
            min_allocation_alignment: 1,
            budget: None,
            placement_threshold: DEFAULT_PLACEMENT_THRESHOLD,
            placement_alignment_threshold: DEFAULT_PLACEMENT_ALIGNMENT_THRESHOLD,
            always_committed: false,
        }
    }

    pub fn validate(&self) -> AllocResult<()> {
        if self.preferred_block_size == 0 {
            return Err(AllocError::InvalidSize(0));
        }
        if self.min_block_count > self.max_block_count {
            return Err(AllocError::PoolLimitExceeded {
                requested: self.min_block_count,
                limit: self.max_block_count,
            });
        }
        check_alignment(self.min_allocation_alignment)?;
        if let Some(budget) = self.budget {
            let min_bytes = self.preferred_block_size.saturating_mul(self.min_block_count as u64);
            if min_bytes > budget {
                return Err(AllocError::out_of_memory(min_bytes, 1));
            }
        }
        Ok(())
    }
}

/// Result of a successful block vector allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockAllocation {
    pub block: BlockHandle,
    pub suballocation: AllocHandle,
    pub heap: HeapHandle,
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub committed: bool,
}

#[derive(Debug)]
struct Block {
    heap: HeapHandle,
    memory: VirtualBlock,
    committed: bool,
}

#[derive(Debug, Default)]
struct BlockList {
    blocks: SlotTable<Block>,
    /// Placed blocks, kept roughly sorted by ascending free space
    placed: Vec<BlockHandle>,
    total_bytes: DeviceSize,
    /// Set once the owner is gone; no allocation is admitted afterwards
    retired: bool,
}

impl BlockList {
    /// Callers admit the block first, so the byte total cannot overflow
    fn insert(&mut self, block: Block) -> BlockHandle {
        let committed = block.committed;
        self.total_bytes = self.total_bytes.saturating_add(block.memory.size());
        let handle = self.blocks.insert(block);
        if !committed {
            self.placed.push(handle);
        }
        handle
    }

    fn remove(&mut self, handle: BlockHandle) -> Option<Block> {
        let block = self.blocks.remove(handle)?;
        self.total_bytes -= block.memory.size();
        self.placed.retain(|&h| h != handle);
        Some(block)
    }

    fn free_bytes(&self, handle: BlockHandle) -> DeviceSize {
        self.blocks
            .get(handle)
            .map(|b| b.memory.free_bytes())
            .unwrap_or_default()
    }

    fn place_in(
        &mut self,
        handle: BlockHandle,
        req: &PlacementRequest,
    ) -> AllocResult<BlockAllocation> {
        let block = self
            .blocks
            .get_mut(handle)
            .ok_or_else(|| AllocError::InvalidHandle(handle.to_string()))?;
        let placed = block.memory.place(req)?;
        Ok(BlockAllocation {
            block: handle,
            suballocation: placed.handle,
            heap: block.heap,
            offset: placed.offset,
            size: placed.size,
            committed: block.committed,
        })
    }

    /// Try existing placed blocks, most occupied first
    ///
    /// Linear vectors only ever use their newest block.
    fn try_place(
        &mut self,
        req: &PlacementRequest,
        linear: bool,
    ) -> AllocResult<Option<BlockAllocation>> {
        let len = self.placed.len();
        let first = if linear { len.saturating_sub(1) } else { 0 };
        for index in first..len {
            let handle = self.placed[index];
            if self.free_bytes(handle) < req.size {
                continue;
            }
            match self.place_in(handle, req) {
                Ok(alloc) => return Ok(Some(alloc)),
                Err(e) if e.is_out_of_memory() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Lowest-offset placement in the first of `handles` with room
    fn try_place_among(
        &mut self,
        handles: &[BlockHandle],
        req: &PlacementRequest,
    ) -> AllocResult<Option<BlockAllocation>> {
        for &handle in handles {
            if self.free_bytes(handle) < req.size {
                continue;
            }
            match self.place_in(handle, req) {
                Ok(alloc) => return Ok(Some(alloc)),
                Err(e) if e.is_out_of_memory() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn free_in(&mut self, alloc: &BlockAllocation) -> AllocResult<()> {
        self.blocks
            .get_mut(alloc.block)
            .ok_or_else(|| AllocError::InvalidHandle(alloc.block.to_string()))?
            .memory
            .free(alloc.suballocation)
    }

    /// One bubble step towards ascending free space
    fn sort_step(&mut self) {
        for i in 1..self.placed.len() {
            if self.free_bytes(self.placed[i - 1]) > self.free_bytes(self.placed[i]) {
                self.placed.swap(i - 1, i);
                return;
            }
        }
    }

    fn max_placed_size(&self) -> DeviceSize {
        self.placed
            .iter()
            .filter_map(|&h| self.blocks.get(h))
            .map(|b| b.memory.size())
            .max()
            .unwrap_or(0)
    }

    fn has_empty_placed_block(&self, except: BlockHandle) -> bool {
        self.placed
            .iter()
            .filter(|&&h| h != except)
            .filter_map(|&h| self.blocks.get(h))
            .any(|b| b.memory.is_empty())
    }

    fn allocation_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|(_, b)| b.memory.allocation_count())
            .sum()
    }
}

/// Ordered collection of device heaps serving one memory configuration
pub struct BlockVector {
    config: BlockVectorConfig,
    backend: Arc<dyn HeapBackend>,
    list: RwLock<BlockList>,
}

impl BlockVector {
    pub fn new(config: BlockVectorConfig, backend: Arc<dyn HeapBackend>) -> AllocResult<Self> {
        config.validate()?;
        debug!(
            "Block vector for {} heaps: preferred block {} bytes (explicit: {}), blocks {}..{}",
            config.heap_type,
            config.preferred_block_size,
            config.explicit_block_size,
            config.min_block_count,
            config.max_block_count
        );
        Ok(Self {
            config,
            backend,
            list: RwLock::new(BlockList::default()),
        })
    }

    pub fn config(&self) -> &BlockVectorConfig {
        &self.config
    }

    fn is_linear(&self) -> bool {
        matches!(self.config.algorithm, Algorithm::Linear(_))
    }

    /// Stop admitting allocations, but only if none are live
    ///
    /// Runs under the write lock, so an allocation racing with the caller
    /// either lands first and keeps the vector alive, or sees the flag.
    pub fn retire(&self) -> bool {
        let mut list = self.list.write();
        if list.allocation_count() > 0 {
            return false;
        }
        list.retired = true;
        debug!("Retired {} heap block vector", self.config.heap_type);
        true
    }

    pub fn is_retired(&self) -> bool {
        self.list.read().retired
    }

    fn check_live(&self, list: &BlockList) -> AllocResult<()> {
        if list.retired {
            return Err(AllocError::InvalidHandle(format!(
                "retired {} heap block vector",
                self.config.heap_type
            )));
        }
        Ok(())
    }

    /// Create blocks of the preferred size until the minimum count is reached
    pub fn create_min_blocks(&self) -> AllocResult<()> {
        loop {
            if self.list.read().placed.len() >= self.config.min_block_count {
                return Ok(());
            }
            let size = self.config.preferred_block_size;
            let (heap, _) = self.create_heap(&[size])?;
            let memory = self.new_block_memory(heap, size, self.config.algorithm)?;

            let mut list = self.list.write();
            if list.placed.len() >= self.config.min_block_count {
                drop(list);
                self.backend.destroy_heap(heap);
                return Ok(());
            }
            list.insert(Block {
                heap,
                memory,
                committed: false,
            });
        }
    }

    /// Decide whether a request gets a dedicated block
    pub fn should_commit(
        &self,
        size: DeviceSize,
        alignment: DeviceSize,
        flags: AllocationFlags,
    ) -> AllocResult<bool> {
        let force = flags.contains(AllocationFlags::FORCE_COMMITTED);
        let never = flags.contains(AllocationFlags::NEVER_COMMITTED);
        if force && never {
            return Err(AllocError::InvalidFlags(
                "FORCE_COMMITTED and NEVER_COMMITTED are mutually exclusive".to_string(),
            ));
        }
        if force && self.config.explicit_block_size {
            return Err(AllocError::InvalidFlags(
                "FORCE_COMMITTED is not allowed in a pool with an explicit block size".to_string(),
            ));
        }
        if never {
            return Ok(false);
        }
        Ok(force
            || self.config.always_committed
            || size > self.config.placement_threshold
            || size > self.config.preferred_block_size
            || alignment > self.config.placement_alignment_threshold)
    }

    /// Allocate `desc.size` bytes, placed or committed as the flags and
    /// thresholds decide
    pub fn allocate(&self, desc: &VirtualAllocationDesc) -> AllocResult<BlockAllocation> {
        check_alignment(desc.alignment)?;
        let alignment = desc.alignment.max(self.config.min_allocation_alignment);
        let req = VirtualBlock::placement_request(desc.size, alignment, desc.flags, desc.user_data)?;

        if req.upper_address
            && matches!(
                self.config.algorithm,
                Algorithm::Linear(LinearMode::Stack) | Algorithm::Linear(LinearMode::Ring)
            )
        {
            return Err(AllocError::InvalidFlags(format!(
                "UPPER_ADDRESS is not supported by {} blocks",
                self.config.algorithm
            )));
        }

        if self.should_commit(req.size, req.alignment, desc.flags)? {
            self.allocate_committed(&req)
        } else {
            self.allocate_placed(&req, desc.flags)
        }
    }

    fn allocate_placed(
        &self,
        req: &PlacementRequest,
        flags: AllocationFlags,
    ) -> AllocResult<BlockAllocation> {
        if req.size > self.config.preferred_block_size {
            return Err(AllocError::out_of_memory(req.size, req.alignment));
        }
        let linear = self.is_linear();

        let sizes = {
            let mut list = self.list.write();
            self.check_live(&list)?;
            if let Some(alloc) = list.try_place(req, linear)? {
                if !linear {
                    list.sort_step();
                }
                return Ok(alloc);
            }
            if flags.contains(AllocationFlags::NEVER_ALLOCATE) {
                debug!("No room for {} bytes and NEVER_ALLOCATE is set", req.size);
                return Err(AllocError::out_of_memory(req.size, req.alignment));
            }
            self.plan_block_sizes(&list, req)?
        };

        let (heap, block_size) = self.create_heap(&sizes)?;
        let memory = self.new_block_memory(heap, block_size, self.config.algorithm)?;

        let mut list = self.list.write();
        if let Err(e) = self.check_live(&list) {
            drop(list);
            self.backend.destroy_heap(heap);
            return Err(e);
        }
        match list.try_place(req, linear) {
            Ok(Some(alloc)) => {
                drop(list);
                debug!("Another thread made room first, destroying redundant {}", heap);
                self.backend.destroy_heap(heap);
                return Ok(alloc);
            }
            Ok(None) => {}
            Err(e) => {
                drop(list);
                self.backend.destroy_heap(heap);
                return Err(e);
            }
        }
        if let Err(e) = self.admit_block(&list, block_size, req) {
            drop(list);
            self.backend.destroy_heap(heap);
            return Err(e);
        }

        let handle = list.insert(Block {
            heap,
            memory,
            committed: false,
        });
        let result = list.place_in(handle, req);
        if result.is_err() {
            list.remove(handle);
            drop(list);
            self.backend.destroy_heap(heap);
            return result;
        }
        if !linear {
            list.sort_step();
        }
        let block_count = list.blocks.len();
        drop(list);

        info!(
            "Created {} byte block {} for {} heaps ({} blocks)",
            block_size, heap, self.config.heap_type, block_count
        );
        result
    }

    fn allocate_committed(&self, req: &PlacementRequest) -> AllocResult<BlockAllocation> {
        self.admit_committed(&self.list.read(), req)?;

        let (heap, _) = self.create_heap(&[req.size])?;
        let memory = self.new_block_memory(heap, req.size, Algorithm::General)?;

        let mut list = self.list.write();
        if let Err(e) = self.admit_committed(&list, req) {
            drop(list);
            self.backend.destroy_heap(heap);
            return Err(e);
        }
        let handle = list.insert(Block {
            heap,
            memory,
            committed: true,
        });
        let result = list.place_in(handle, req);
        if result.is_err() {
            list.remove(handle);
            drop(list);
            self.backend.destroy_heap(heap);
            return result;
        }
        drop(list);

        info!(
            "Created committed block {} of {} bytes for {} heaps",
            heap, req.size, self.config.heap_type
        );
        result
    }

    /// Candidate sizes for a new placed block, largest first
    fn plan_block_sizes(
        &self,
        list: &BlockList,
        req: &PlacementRequest,
    ) -> AllocResult<Vec<DeviceSize>> {
        if list.blocks.len() >= self.config.max_block_count {
            debug!(
                "Block cap {} reached, cannot place {} bytes",
                self.config.max_block_count, req.size
            );
            return Err(AllocError::out_of_memory(req.size, req.alignment));
        }

        let mut block_size = self.config.preferred_block_size;
        let mut shift = 0;
        let mut sizes = Vec::new();

        if !self.config.explicit_block_size {
            let max_existing = list.max_placed_size();
            while shift < NEW_BLOCK_SIZE_SHIFT_MAX {
                let smaller = block_size / 2;
                if smaller > max_existing && smaller >= req.size.saturating_mul(2) {
                    block_size = smaller;
                    shift += 1;
                } else {
                    break;
                }
            }
        }
        sizes.push(block_size);

        // Fallbacks for a device that refuses the first size
        if !self.config.explicit_block_size {
            while shift < NEW_BLOCK_SIZE_SHIFT_MAX {
                let smaller = block_size / 2;
                if smaller < req.size {
                    break;
                }
                block_size = smaller;
                shift += 1;
                sizes.push(block_size);
            }
        }

        if let Some(budget) = self.config.budget {
            let remaining = budget.saturating_sub(list.total_bytes);
            sizes.retain(|&size| size <= remaining);
        }
        if sizes.is_empty() {
            debug!("Budget exhausted for {} heaps", self.config.heap_type);
            return Err(AllocError::out_of_memory(req.size, req.alignment));
        }
        Ok(sizes)
    }

    /// Byte total after adding a block of `size`, if it fits the budget
    fn total_with(&self, list: &BlockList, size: DeviceSize) -> Option<DeviceSize> {
        let total = list.total_bytes.checked_add(size)?;
        match self.config.budget {
            Some(budget) if total > budget => None,
            _ => Some(total),
        }
    }

    /// Re-check limits after the lock was released for heap creation
    fn admit_block(
        &self,
        list: &BlockList,
        block_size: DeviceSize,
        req: &PlacementRequest,
    ) -> AllocResult<()> {
        if list.blocks.len() >= self.config.max_block_count
            || self.total_with(list, block_size).is_none()
        {
            return Err(AllocError::out_of_memory(req.size, req.alignment));
        }
        Ok(())
    }

    fn admit_committed(&self, list: &BlockList, req: &PlacementRequest) -> AllocResult<()> {
        self.check_live(list)?;
        if list.blocks.len() >= self.config.max_block_count {
            return Err(AllocError::PoolLimitExceeded {
                requested: list.blocks.len().saturating_add(1),
                limit: self.config.max_block_count,
            });
        }
        if self.total_with(list, req.size).is_none() {
            debug!(
                "{} byte committed block does not fit {} heaps holding {} bytes",
                req.size, self.config.heap_type, list.total_bytes
            );
            return Err(AllocError::out_of_memory(req.size, req.alignment));
        }
        Ok(())
    }

    /// Try each candidate size until the device accepts one
    fn create_heap(&self, sizes: &[DeviceSize]) -> AllocResult<(HeapHandle, DeviceSize)> {
        let mut last_error: Option<DeviceError> = None;
        for &size in sizes {
            let desc = HeapDesc {
                size,
                heap_type: self.config.heap_type,
                flags: self.config.heap_flags,
            };
            match self.backend.create_heap(&desc) {
                Ok(heap) => return Ok((heap, size)),
                Err(e) => {
                    warn!("Device refused {} byte {} heap: {}", size, self.config.heap_type, e);
                    last_error = Some(e);
                }
            }
        }
        let err = last_error.unwrap_or_else(|| DeviceError::out_of_memory(0));
        error!("Heap creation failed for every candidate size: {}", err);
        Err(err.into())
    }

    fn new_block_memory(
        &self,
        heap: HeapHandle,
        size: DeviceSize,
        algorithm: Algorithm,
    ) -> AllocResult<VirtualBlock> {
        VirtualBlock::new(VirtualBlockDesc { size, algorithm }).map_err(|e| {
            self.backend.destroy_heap(heap);
            e
        })
    }

    /// Release an allocation
    ///
    /// A committed block is destroyed at once. An emptied placed block is
    /// destroyed only if another empty block already exists and the vector
    /// stays at or above its minimum block count.
    pub fn free(&self, alloc: &BlockAllocation) -> AllocResult<()> {
        self.release(alloc).map(|_| ())
    }

    /// `free`, returning the size of the block it destroyed, if any
    pub fn release(&self, alloc: &BlockAllocation) -> AllocResult<Option<DeviceSize>> {
        let released = {
            let mut list = self.list.write();
            let block = list
                .blocks
                .get_mut(alloc.block)
                .ok_or_else(|| AllocError::InvalidHandle(alloc.block.to_string()))?;
            block.memory.free(alloc.suballocation)?;
            let committed = block.committed;
            let emptied = block.memory.is_empty();

            let released = if committed {
                list.remove(alloc.block)
            } else if emptied
                && list.placed.len() > self.config.min_block_count
                && list.has_empty_placed_block(alloc.block)
            {
                list.remove(alloc.block)
            } else {
                None
            };
            if !self.is_linear() {
                list.sort_step();
            }
            released
        };

        Ok(released.map(|block| self.destroy_block(block)))
    }

    fn destroy_block(&self, block: Block) -> DeviceSize {
        let size = block.memory.size();
        info!(
            "Destroying {} block {} ({} bytes) of {} heaps",
            if block.committed { "committed" } else { "empty" },
            block.heap,
            size,
            self.config.heap_type
        );
        self.backend.destroy_heap(block.heap);
        size
    }

    /// Reserve destinations for one defragmentation pass
    ///
    /// Source blocks are visited least occupied first and each candidate is
    /// placed at the lowest offset of a fuller block. `Full` additionally
    /// slides a candidate down inside its own block. Candidates in committed
    /// blocks are skipped and linear vectors plan nothing. Every returned
    /// destination is a live suballocation until freed or committed.
    pub fn plan_defragmentation(
        &self,
        candidates: &[MoveCandidate],
        algorithm: DefragmentationAlgorithm,
        budget: &mut PassBudget,
    ) -> AllocResult<Vec<PlannedMove>> {
        let mut moves = Vec::new();
        if self.is_linear() || candidates.is_empty() {
            return Ok(moves);
        }

        let mut list = self.list.write();
        let mut order = list.placed.clone();
        order.sort_by_key(|&h| list.free_bytes(h));

        for src_index in (0..order.len()).rev() {
            let src = order[src_index];
            let mut in_block: Vec<usize> = (0..candidates.len())
                .filter(|&i| candidates[i].block.block == src && !candidates[i].block.committed)
                .collect();
            in_block.sort_by(|&a, &b| candidates[b].block.size.cmp(&candidates[a].block.size));

            for index in in_block {
                let candidate = &candidates[index];
                let req = match self.move_request(&list, candidate) {
                    Ok(req) => req,
                    // Freed since the candidate list was taken
                    Err(AllocError::InvalidHandle(_)) => continue,
                    Err(e) => return Err(e),
                };
                let mut dst = list.try_place_among(&order[..src_index], &req)?;
                if dst.is_none() && algorithm == DefragmentationAlgorithm::Full {
                    dst = match list.try_place_among(&[src], &req)? {
                        Some(lower) if lower.offset < candidate.block.offset => Some(lower),
                        Some(higher) => {
                            list.free_in(&higher)?;
                            None
                        }
                        None => None,
                    };
                }
                let Some(dst) = dst else { continue };
                if !budget.take(candidate.block.size) {
                    list.free_in(&dst)?;
                    debug!("Pass allowance spent after {} moves", moves.len());
                    return Ok(moves);
                }
                moves.push(PlannedMove {
                    candidate: index,
                    dst,
                });
            }
        }
        if !moves.is_empty() {
            debug!(
                "Planned {} moves in {} heaps ({} blocks)",
                moves.len(),
                self.config.heap_type,
                order.len()
            );
        }
        Ok(moves)
    }

    fn move_request(
        &self,
        list: &BlockList,
        candidate: &MoveCandidate,
    ) -> AllocResult<PlacementRequest> {
        let src = candidate.block;
        let user_data = list
            .blocks
            .get(src.block)
            .ok_or_else(|| AllocError::InvalidHandle(src.block.to_string()))?
            .memory
            .allocation_info(src.suballocation)?
            .user_data;
        let alignment = candidate.alignment.max(self.config.min_allocation_alignment);
        check_alignment(alignment)?;
        Ok(PlacementRequest {
            size: src.size,
            alignment,
            strategy: Some(Strategy::MinOffset),
            upper_address: false,
            user_data,
        })
    }

    /// Destroy empty placed blocks down to the minimum block count
    ///
    /// Returns the number of blocks destroyed and their total size.
    pub fn release_empty_blocks(&self) -> (usize, DeviceSize) {
        let released: Vec<Block> = {
            let mut list = self.list.write();
            let empty: Vec<BlockHandle> = list
                .placed
                .iter()
                .copied()
                .filter(|&h| list.blocks.get(h).map_or(false, |b| b.memory.is_empty()))
                .collect();
            let excess = list.placed.len().saturating_sub(self.config.min_block_count);
            empty
                .into_iter()
                .take(excess)
                .filter_map(|h| list.remove(h))
                .collect()
        };
        let count = released.len();
        let bytes = released.into_iter().map(|b| self.destroy_block(b)).sum();
        (count, bytes)
    }

    pub fn block_count(&self) -> usize {
        self.list.read().blocks.len()
    }

    pub fn allocation_count(&self) -> usize {
        self.list.read().allocation_count()
    }

    pub fn is_empty(&self) -> bool {
        self.allocation_count() == 0
    }

    pub fn total_bytes(&self) -> DeviceSize {
        self.list.read().total_bytes
    }

    pub fn statistics(&self) -> Statistics {
        let list = self.list.read();
        let mut stats = Statistics::default();
        for (_, block) in list.blocks.iter() {
            stats.block_count += 1;
            stats.block_bytes += block.memory.size();
            stats.allocation_count += block.memory.allocation_count();
            stats.allocation_bytes += block.memory.used_bytes();
        }
        stats
    }

    pub fn add_detailed_statistics(&self, stats: &mut DetailedStatistics) {
        let list = self.list.read();
        for (_, block) in list.blocks.iter() {
            block.memory.add_statistics(stats);
        }
    }

    /// Validate every block plus the vector's own bookkeeping
    pub fn validate(&self) -> AllocResult<()> {
        let list = self.list.read();
        let mut total = 0;
        for (_, block) in list.blocks.iter() {
            block.memory.validate()?;
            total += block.memory.size();
        }
        if total != list.total_bytes {
            return Err(AllocError::Corruption(format!(
                "block bytes {} differ from tracked total {}",
                total, list.total_bytes
            )));
        }
        if list.blocks.len() > self.config.max_block_count {
            return Err(AllocError::Corruption(format!(
                "{} blocks exceed the cap of {}",
                list.blocks.len(),
                self.config.max_block_count
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlockVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockVector")
            .field("config", &self.config)
            .field("blocks", &self.block_count())
            .finish()
    }
}

impl Drop for BlockVector {
    fn drop(&mut self) {
        let list = self.list.get_mut();
        let live = list.allocation_count();
        if live > 0 {
            warn!(
                "Dropping {} heap block vector with {} live allocations",
                self.config.heap_type, live
            );
        }
        for (_, block) in list.blocks.iter() {
            self.backend.destroy_heap(block.heap);
        }
    }
}
