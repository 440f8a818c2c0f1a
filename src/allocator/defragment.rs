/*!
 * Defragmentation Context
 * Caller-driven passes that move allocations between heaps
 *
 * ## Protocol
 *
 * 1. `begin_pass` reserves destinations and, for allocations with a bound
 *    resource, binds a new resource there
 * 2. The caller copies each source to its destination and may mark moves
 *    `Ignore` or `Destroy`
 * 3. `end_pass` points the records at their new place, frees the sources and
 *    releases the heaps that ran empty
 *
 * Aliased allocations, aliases and committed allocations never move.
 */

use super::records::{AllocationState, Backing};
use super::Allocator;
use crate::core::{
    AllocError, AllocResult, AllocationId, DeviceSize, HeapHandle, NativeResource, PoolId,
    ResourceDesc,
};
use crate::memory::{
    BlockAllocation, BlockVector, DefragmentationDesc, DefragmentationStats, MoveCandidate,
    MoveOperation, PassBudget,
};
use ahash::RandomState;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One proposed move inside a pass
#[derive(Debug)]
pub struct DefragmentationMove {
    /// Set by the caller before the pass ends; `Copy` unless changed
    pub operation: MoveOperation,
    pub allocation: AllocationId,
    pub size: DeviceSize,
    pub src_heap: HeapHandle,
    pub src_offset: DeviceSize,
    pub dst_heap: HeapHandle,
    pub dst_offset: DeviceSize,
    /// Resource bound at the destination, for allocations that have one
    pub dst_resource: Option<NativeResource>,
    vector: Arc<BlockVector>,
    src: BlockAllocation,
    dst: BlockAllocation,
}

/// Moves of one pass
///
/// Hand it back to `end_pass`; its destinations stay reserved until then.
#[derive(Debug, Default)]
pub struct DefragmentationPass {
    pub moves: Vec<DefragmentationMove>,
}

/// State of one defragmentation run
///
/// Created by `Allocator::begin_defragmentation` or
/// `Allocator::begin_pool_defragmentation`. Passes alternate strictly
/// between `begin_pass` and `end_pass`.
pub struct DefragmentationContext<'a> {
    allocator: &'a Allocator,
    vectors: Vec<Arc<BlockVector>>,
    desc: DefragmentationDesc,
    stats: DefragmentationStats,
    ignored: HashSet<AllocationId, RandomState>,
    in_pass: bool,
    limited: bool,
    complete: bool,
}

struct Candidate {
    id: AllocationId,
    resource: Option<ResourceDesc>,
}

impl<'a> DefragmentationContext<'a> {
    fn new(
        allocator: &'a Allocator,
        vectors: Vec<Arc<BlockVector>>,
        desc: DefragmentationDesc,
    ) -> Self {
        info!(
            vectors = vectors.len(),
            algorithm = ?desc.algorithm,
            max_bytes_per_pass = desc.max_bytes_per_pass,
            max_allocations_per_pass = desc.max_allocations_per_pass,
            "Defragmentation started"
        );
        Self {
            allocator,
            vectors,
            desc,
            stats: DefragmentationStats::default(),
            ignored: HashSet::with_hasher(RandomState::new()),
            in_pass: false,
            limited: false,
            complete: false,
        }
    }

    pub fn stats(&self) -> DefragmentationStats {
        self.stats
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Plan the next pass; `None` once there is nothing left to move
    pub fn begin_pass(&mut self) -> AllocResult<Option<DefragmentationPass>> {
        if self.in_pass {
            return Err(AllocError::InvalidState(
                "defragmentation pass already in progress".to_string(),
            ));
        }
        if self.complete {
            return Ok(None);
        }

        let mut budget = PassBudget::new(&self.desc);
        let mut pass = DefragmentationPass::default();
        for vector in &self.vectors {
            let (candidates, owners) = self.allocator.move_candidates(vector, &self.ignored);
            let planned =
                vector.plan_defragmentation(&candidates, self.desc.algorithm, &mut budget)?;
            for planned in planned {
                let src = candidates[planned.candidate].block;
                let owner = &owners[planned.candidate];
                let dst_resource = match &owner.resource {
                    Some(resource) => {
                        match self.allocator.binder.bind_resource(
                            planned.dst.heap,
                            planned.dst.offset,
                            resource,
                        ) {
                            Ok(native) => Some(native),
                            Err(e) => {
                                warn!(allocation = %owner.id, error = %e, "Binding at move destination failed");
                                vector.free(&planned.dst)?;
                                self.ignored.insert(owner.id);
                                continue;
                            }
                        }
                    }
                    None => None,
                };
                pass.moves.push(DefragmentationMove {
                    operation: MoveOperation::Copy,
                    allocation: owner.id,
                    size: src.size,
                    src_heap: src.heap,
                    src_offset: src.offset,
                    dst_heap: planned.dst.heap,
                    dst_offset: planned.dst.offset,
                    dst_resource,
                    vector: Arc::clone(vector),
                    src,
                    dst: planned.dst,
                });
            }
        }

        if pass.moves.is_empty() {
            self.complete = true;
            info!(stats = ?self.stats, "Defragmentation complete");
            return Ok(None);
        }
        self.limited = budget.is_exhausted();
        self.in_pass = true;
        debug!(moves = pass.moves.len(), limited = self.limited, "Defragmentation pass planned");
        Ok(Some(pass))
    }

    /// Apply the caller's decisions; returns true when the run is complete
    pub fn end_pass(&mut self, pass: DefragmentationPass) -> AllocResult<bool> {
        if !self.in_pass {
            return Err(AllocError::InvalidState(
                "no defragmentation pass in progress".to_string(),
            ));
        }
        self.in_pass = false;

        for mv in pass.moves {
            match mv.operation {
                MoveOperation::Copy => {
                    if self.allocator.commit_move(&mv) {
                        self.stats.allocations_moved += 1;
                        self.stats.bytes_moved += mv.size;
                        if let Some(bytes) = mv.vector.release(&mv.src)? {
                            self.stats.bytes_freed += bytes;
                            self.stats.heaps_freed += 1;
                        }
                    } else {
                        debug!(allocation = %mv.allocation, "Allocation changed during the pass, move dropped");
                        mv.vector.free(&mv.dst)?;
                    }
                }
                MoveOperation::Ignore => {
                    self.ignored.insert(mv.allocation);
                    mv.vector.free(&mv.dst)?;
                }
                MoveOperation::Destroy => {
                    if let Err(e) = self.allocator.free(mv.allocation) {
                        warn!(allocation = %mv.allocation, error = %e, "Destroying moved allocation failed");
                    }
                    mv.vector.free(&mv.dst)?;
                }
            }
        }

        for vector in &self.vectors {
            let (heaps, bytes) = vector.release_empty_blocks();
            self.stats.heaps_freed += heaps;
            self.stats.bytes_freed += bytes;
        }

        self.complete = !self.limited;
        info!(
            allocations_moved = self.stats.allocations_moved,
            bytes_moved = self.stats.bytes_moved,
            heaps_freed = self.stats.heaps_freed,
            complete = self.complete,
            "Defragmentation pass finished"
        );
        Ok(self.complete)
    }
}

impl std::fmt::Debug for DefragmentationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefragmentationContext")
            .field("vectors", &self.vectors.len())
            .field("desc", &self.desc)
            .field("stats", &self.stats)
            .field("in_pass", &self.in_pass)
            .field("complete", &self.complete)
            .finish()
    }
}

impl Allocator {
    /// Defragment every default pool
    pub fn begin_defragmentation(&self, desc: DefragmentationDesc) -> DefragmentationContext<'_> {
        let vectors = self
            .default_pools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        DefragmentationContext::new(self, vectors, desc)
    }

    /// Defragment one custom pool
    pub fn begin_pool_defragmentation(
        &self,
        id: PoolId,
        desc: DefragmentationDesc,
    ) -> AllocResult<DefragmentationContext<'_>> {
        let pool = self.pool(id).ok_or_else(|| AllocError::InvalidHandle(id.to_string()))?;
        Ok(DefragmentationContext::new(
            self,
            vec![Arc::clone(pool.vector())],
            desc,
        ))
    }

    /// Placed, unaliased allocations of `vector` that may move
    fn move_candidates(
        &self,
        vector: &Arc<BlockVector>,
        ignored: &HashSet<AllocationId, RandomState>,
    ) -> (Vec<MoveCandidate>, Vec<Candidate>) {
        let mut candidates = Vec::new();
        let mut owners = Vec::new();
        for entry in self.allocations.iter() {
            let record = entry.value();
            let Backing::Block { vector: owner, block } = &record.backing else {
                continue;
            };
            if !Arc::ptr_eq(owner, vector)
                || block.committed
                || record.alias_count > 0
                || ignored.contains(entry.key())
            {
                continue;
            }
            candidates.push(MoveCandidate {
                block: *block,
                alignment: record.alignment,
            });
            owners.push(Candidate {
                id: *entry.key(),
                resource: match record.state {
                    AllocationState::Bound => record.resource_desc.clone(),
                    _ => None,
                },
            });
        }
        (candidates, owners)
    }

    /// Point the record at the destination if it is still where the pass
    /// found it
    fn commit_move(&self, mv: &DefragmentationMove) -> bool {
        let Some(mut record) = self.allocations.get_mut(&mv.allocation) else {
            return false;
        };
        let unchanged = matches!(&record.backing, Backing::Block { block, .. } if *block == mv.src);
        let rebound = record.state != AllocationState::Bound || mv.dst_resource.is_some();
        if !unchanged || !rebound || record.alias_count > 0 {
            return false;
        }
        if let Backing::Block { block, .. } = &mut record.backing {
            *block = mv.dst;
        }
        record.heap = mv.dst.heap;
        record.offset = mv.dst.offset;
        if mv.dst_resource.is_some() {
            record.resource = mv.dst_resource;
        }
        true
    }
}
