/*!
 * Allocator
 * Routes resource requests to pools and tracks every allocation
 *
 * ## Pools
 *
 * - **Default pools**: one block vector per `(HeapType, ResourceCategory)`,
 *   created on first use
 * - **Custom pools**: explicit configuration, created and destroyed by the caller
 * - **Defragmentation**: caller-driven passes over default or custom pools
 *
 * ## Allocations
 *
 * Every allocation gets an `AllocationId` that is never reused. Its record
 * holds the block it lives in, its lifecycle state and, for aliasing
 * resources, the allocation it aliases. Aliases are not part of any block's
 * region list; they borrow the parent's range.
 */

mod config;
mod defragment;
mod pool;
mod records;

pub use config::{AllocatorBuilder, AllocatorConfig};
pub use defragment::{DefragmentationContext, DefragmentationMove, DefragmentationPass};
pub use pool::{Pool, PoolDesc, PoolFlags};
pub use records::{Allocation, AllocationDesc, AllocationState};

use records::{AllocationRecord, Backing};

use crate::core::{
    check_alignment, AllocError, AllocResult, AllocationId, AtomicGenerator, DeviceError,
    DeviceSize, HeapType,
    NativeResource, PoolId, ResourceCategory, ResourceDesc, ResourceKind,
};
use crate::memory::{
    BlockVector, BlockVectorConfig, DetailedStatistics, HeapBackend, ResourceBinder,
    TotalStatistics, VirtualAllocationDesc,
};
use crate::monitoring::span_allocation;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Thread-safe GPU memory allocator
///
/// Shared between threads through `Arc`; every method takes `&self`.
pub struct Allocator {
    config: AllocatorConfig,
    heaps: Arc<dyn HeapBackend>,
    binder: Arc<dyn ResourceBinder>,
    default_pools: DashMap<(HeapType, ResourceCategory), Arc<BlockVector>, RandomState>,
    pools: DashMap<PoolId, Arc<Pool>, RandomState>,
    allocations: DashMap<AllocationId, AllocationRecord, RandomState>,
    pool_ids: AtomicGenerator<PoolId>,
    allocation_ids: AtomicGenerator<AllocationId>,
}

impl Allocator {
    /// Allocator with the default configuration
    pub fn new<D>(device: Arc<D>) -> AllocResult<Self>
    where
        D: HeapBackend + ResourceBinder + 'static,
    {
        AllocatorBuilder::new().build(device)
    }

    pub fn builder() -> AllocatorBuilder {
        AllocatorBuilder::new()
    }

    pub(crate) fn from_parts(
        config: AllocatorConfig,
        heaps: Arc<dyn HeapBackend>,
        binder: Arc<dyn ResourceBinder>,
    ) -> Self {
        Self {
            config,
            heaps,
            binder,
            default_pools: DashMap::with_hasher(RandomState::new()),
            pools: DashMap::with_hasher(RandomState::new()),
            allocations: DashMap::with_hasher(RandomState::new()),
            pool_ids: AtomicGenerator::default(),
            allocation_ids: AtomicGenerator::default(),
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    fn default_vector(
        &self,
        heap_type: HeapType,
        category: ResourceCategory,
    ) -> AllocResult<Arc<BlockVector>> {
        if let Some(vector) = self.default_pools.get(&(heap_type, category)) {
            return Ok(Arc::clone(vector.value()));
        }
        let entry = self
            .default_pools
            .entry((heap_type, category))
            .or_try_insert_with(|| {
                let config = BlockVectorConfig {
                    preferred_block_size: self.config.preferred_block_size,
                    max_block_count: self.config.default_pool_max_blocks,
                    budget: self.config.heap_budget,
                    placement_threshold: self.config.placement_threshold,
                    placement_alignment_threshold: self.config.placement_alignment_threshold,
                    always_committed: self.config.always_committed,
                    ..BlockVectorConfig::new(heap_type, category.heap_flags())
                };
                debug!(heap_type = %heap_type, category = ?category, "Creating default pool");
                BlockVector::new(config, Arc::clone(&self.heaps)).map(Arc::new)
            })?;
        Ok(Arc::clone(entry.value()))
    }

    fn resolve(
        &self,
        desc: &AllocationDesc,
        kind: ResourceKind,
    ) -> AllocResult<Arc<BlockVector>> {
        match desc.pool {
            Some(id) => {
                let pool = self
                    .pools
                    .get(&id)
                    .ok_or_else(|| AllocError::InvalidHandle(id.to_string()))?;
                if !pool.desc().heap_flags.admits(kind) {
                    return Err(AllocError::InvalidFlags(format!(
                        "{} heaps ({:?}) do not admit {:?} resources",
                        id,
                        pool.desc().heap_flags,
                        kind
                    )));
                }
                Ok(Arc::clone(pool.vector()))
            }
            None => self.default_vector(desc.heap_type, kind.category()),
        }
    }

    /// Reserve memory for a resource without recording it
    fn reserve(&self, desc: &AllocationDesc, resource: &ResourceDesc) -> AllocResult<AllocationRecord> {
        let vector = self.resolve(desc, resource.kind)?;
        let request = VirtualAllocationDesc::new(resource.size, resource.alignment)
            .with_flags(desc.flags)
            .with_user_data(desc.user_data);
        let block = match (vector.allocate(&request), desc.pool) {
            // The pool was destroyed after `resolve` let go of the map entry
            (Err(AllocError::InvalidHandle(_)), Some(id)) if vector.is_retired() => {
                return Err(AllocError::InvalidHandle(id.to_string()));
            }
            (result, _) => result?,
        };

        let config = vector.config();
        Ok(AllocationRecord {
            heap_type: config.heap_type,
            heap_flags: config.heap_flags,
            heap: block.heap,
            offset: block.offset,
            size: block.size,
            alignment: resource.alignment,
            committed: block.committed,
            kind: resource.kind,
            pool: desc.pool,
            state: AllocationState::Created,
            resource: None,
            resource_desc: None,
            alias_count: 0,
            backing: Backing::Block { vector, block },
        })
    }

    fn release(record: &AllocationRecord) -> AllocResult<()> {
        match &record.backing {
            Backing::Block { vector, block } => vector.free(block),
            Backing::Alias { .. } => Ok(()),
        }
    }

    /// Give back memory whose binding failed; the binding error wins
    fn discard_unbound(record: &AllocationRecord, bind_error: DeviceError) -> AllocError {
        warn!(heap = %record.heap, offset = record.offset, error = %bind_error, "Resource binding failed");
        if let Err(release_error) = Self::release(record) {
            error!(
                heap = %record.heap,
                offset = record.offset,
                error = %release_error,
                "Could not release memory of a failed binding"
            );
        }
        bind_error.into()
    }

    fn record(&self, record: AllocationRecord) -> Allocation {
        let id = self.allocation_ids.next();
        let snapshot = record.snapshot(id);
        debug!(
            allocation = %id,
            heap = %record.heap,
            heap_type = %record.heap_type,
            pool = ?record.pool,
            offset = record.offset,
            size = record.size,
            committed = record.committed,
            kind = ?record.kind,
            "Allocation recorded"
        );
        self.allocations.insert(id, record);
        snapshot
    }

    /// Allocate memory and bind a resource into it
    pub fn create_resource(
        &self,
        desc: &AllocationDesc,
        resource: &ResourceDesc,
    ) -> AllocResult<Allocation> {
        let span = span_allocation("create_resource", resource.size);
        let _entered = span.enter();

        let result = self.reserve(desc, resource).and_then(|mut record| {
            match self.binder.bind_resource(record.heap, record.offset, resource) {
                Ok(native) => {
                    record.resource = Some(native);
                    record.resource_desc = Some(resource.clone());
                    record.state = AllocationState::Bound;
                    Ok(self.record(record))
                }
                Err(e) => Err(Self::discard_unbound(&record, e)),
            }
        });
        span.record_outcome(&result);
        result
    }

    /// Allocate memory for a resource that is bound later
    pub fn allocate_memory(
        &self,
        desc: &AllocationDesc,
        resource: &ResourceDesc,
    ) -> AllocResult<Allocation> {
        let span = span_allocation("allocate_memory", resource.size);
        let _entered = span.enter();

        let result = self.reserve(desc, resource).map(|record| self.record(record));
        span.record_outcome(&result);
        result
    }

    /// Bind a resource into memory from `allocate_memory`
    pub fn bind_resource(
        &self,
        id: AllocationId,
        resource: &ResourceDesc,
    ) -> AllocResult<NativeResource> {
        check_alignment(resource.alignment)?;
        let (heap, offset, size, heap_flags) = {
            let record = self
                .allocations
                .get(&id)
                .ok_or_else(|| AllocError::InvalidHandle(id.to_string()))?;
            if record.state != AllocationState::Created {
                return Err(AllocError::InvalidState(format!("{} is already bound", id)));
            }
            (record.heap, record.offset, record.size, record.heap_flags)
        };

        if resource.size == 0 || resource.size > size {
            return Err(AllocError::InvalidSize(resource.size));
        }
        if offset % resource.alignment != 0 {
            return Err(AllocError::InvalidAlignment(resource.alignment));
        }
        if !heap_flags.admits(resource.kind) {
            return Err(AllocError::InvalidFlags(format!(
                "heap flags {:?} do not admit {:?} resources",
                heap_flags, resource.kind
            )));
        }

        let native = self.binder.bind_resource(heap, offset, resource)?;

        let mut record = self
            .allocations
            .get_mut(&id)
            .ok_or_else(|| AllocError::InvalidHandle(id.to_string()))?;
        if record.state != AllocationState::Created {
            return Err(AllocError::InvalidState(format!("{} is already bound", id)));
        }
        record.state = AllocationState::Bound;
        record.resource = Some(native);
        record.resource_desc = Some(resource.clone());
        debug!(allocation = %id, resource = %native, "Resource bound");
        Ok(native)
    }

    /// Bind a second resource over part of an existing allocation
    ///
    /// The alias occupies `[offset, offset + resource.size)` relative to the
    /// start of `parent` and must be freed before `parent`.
    pub fn create_aliasing_resource(
        &self,
        parent: AllocationId,
        offset: DeviceSize,
        resource: &ResourceDesc,
    ) -> AllocResult<Allocation> {
        check_alignment(resource.alignment)?;
        if resource.size == 0 {
            return Err(AllocError::InvalidSize(0));
        }

        let (heap, base, template) = {
            let mut record = self
                .allocations
                .get_mut(&parent)
                .ok_or_else(|| AllocError::InvalidHandle(parent.to_string()))?;
            if record.alias_of().is_some() {
                return Err(AllocError::AliasingConflict(format!(
                    "{} is itself an aliasing resource",
                    parent
                )));
            }
            let fits = offset
                .checked_add(resource.size)
                .map_or(false, |end| end <= record.size);
            if !fits {
                return Err(AllocError::AliasOutOfBounds {
                    offset,
                    size: resource.size,
                    parent_size: record.size,
                });
            }
            if !record.heap_flags.admits(resource.kind) {
                return Err(AllocError::AliasingConflict(format!(
                    "heap of {} ({:?}) does not admit {:?} resources",
                    parent, record.heap_flags, resource.kind
                )));
            }
            let base = record.offset + offset;
            if base % resource.alignment != 0 {
                return Err(AllocError::InvalidAlignment(resource.alignment));
            }
            record.alias_count += 1;
            (
                record.heap,
                base,
                (record.heap_type, record.heap_flags, record.committed, record.pool),
            )
        };

        let native = match self.binder.bind_resource(heap, base, resource) {
            Ok(native) => native,
            Err(e) => {
                if let Some(mut record) = self.allocations.get_mut(&parent) {
                    record.alias_count -= 1;
                }
                return Err(e.into());
            }
        };

        let (heap_type, heap_flags, committed, pool) = template;
        let alias = self.record(AllocationRecord {
            backing: Backing::Alias { parent },
            heap_type,
            heap_flags,
            heap,
            offset: base,
            size: resource.size,
            alignment: resource.alignment,
            committed,
            kind: resource.kind,
            pool,
            state: AllocationState::Bound,
            resource: Some(native),
            resource_desc: Some(resource.clone()),
            alias_count: 0,
        });
        info!(
            allocation = %alias.id,
            parent = %parent,
            offset = offset,
            size = resource.size,
            kind = ?resource.kind,
            "Aliasing resource created"
        );
        Ok(alias)
    }

    /// Free an allocation or an aliasing resource
    pub fn free(&self, id: AllocationId) -> AllocResult<()> {
        let record = match self.allocations.remove_if(&id, |_, r| r.alias_count == 0) {
            Some((_, record)) => record,
            None => {
                return Err(match self.allocations.get(&id) {
                    Some(record) => AllocError::AliasesOutstanding {
                        count: record.alias_count,
                    },
                    None => AllocError::InvalidHandle(id.to_string()),
                })
            }
        };

        if let Backing::Alias { parent } = record.backing {
            if let Some(mut parent) = self.allocations.get_mut(&parent) {
                parent.alias_count = parent.alias_count.saturating_sub(1);
            }
        }
        Self::release(&record)?;
        debug!(allocation = %id, size = record.size, "Allocation freed");
        Ok(())
    }

    /// Snapshot of a live allocation
    pub fn allocation(&self, id: AllocationId) -> AllocResult<Allocation> {
        self.allocations
            .get(&id)
            .map(|record| record.snapshot(id))
            .ok_or_else(|| AllocError::InvalidHandle(id.to_string()))
    }

    /// Lifecycle state; ids issued earlier but no longer live are `Freed`
    pub fn allocation_state(&self, id: AllocationId) -> AllocResult<AllocationState> {
        if let Some(record) = self.allocations.get(&id) {
            return Ok(record.state);
        }
        if id.0 >= 1 && id.0 < self.allocation_ids.peek() {
            Ok(AllocationState::Freed)
        } else {
            Err(AllocError::InvalidHandle(id.to_string()))
        }
    }

    pub fn live_allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Create a custom pool and its minimum number of blocks
    pub fn create_pool(&self, desc: PoolDesc) -> AllocResult<Arc<Pool>> {
        let explicit = desc.block_size != 0;
        let config = BlockVectorConfig {
            heap_type: desc.heap_type,
            heap_flags: desc.heap_flags,
            preferred_block_size: if explicit {
                desc.block_size
            } else {
                self.config.preferred_block_size
            },
            explicit_block_size: explicit,
            min_block_count: desc.min_block_count,
            max_block_count: desc.max_block_count,
            algorithm: desc.algorithm,
            min_allocation_alignment: desc.min_allocation_alignment,
            budget: desc.budget,
            placement_threshold: self.config.placement_threshold,
            placement_alignment_threshold: self.config.placement_alignment_threshold,
            always_committed: desc.flags.contains(PoolFlags::ALWAYS_COMMITTED),
        };
        let vector = Arc::new(BlockVector::new(config, Arc::clone(&self.heaps))?);
        vector.create_min_blocks()?;

        let id = self.pool_ids.next();
        info!(
            pool = %id,
            name = ?desc.name,
            heap_type = %desc.heap_type,
            algorithm = %desc.algorithm,
            block_size = desc.block_size,
            min_blocks = desc.min_block_count,
            max_blocks = desc.max_block_count,
            "Pool created"
        );
        let pool = Arc::new(Pool::new(id, desc, vector));
        self.pools.insert(id, Arc::clone(&pool));
        Ok(pool)
    }

    /// Destroy an empty custom pool and release its blocks
    ///
    /// The pool's vector is retired under its own lock, so a thread that
    /// resolved the pool just before this call cannot allocate into it.
    pub fn destroy_pool(&self, id: PoolId) -> AllocResult<()> {
        match self.pools.remove_if(&id, |_, pool| pool.vector().retire()) {
            Some((_, pool)) => {
                info!(pool = %id, blocks = pool.block_count(), "Pool destroyed");
                Ok(())
            }
            None => Err(match self.pools.get(&id) {
                Some(pool) => AllocError::PoolInUse {
                    allocations: pool.allocation_count(),
                },
                None => AllocError::InvalidHandle(id.to_string()),
            }),
        }
    }

    pub fn pool(&self, id: PoolId) -> Option<Arc<Pool>> {
        self.pools.get(&id).map(|pool| Arc::clone(pool.value()))
    }

    /// Statistics over every default and custom pool, split by heap type
    pub fn calculate_statistics(&self) -> TotalStatistics {
        let mut total = TotalStatistics::default();
        for entry in self.default_pools.iter() {
            let mut stats = DetailedStatistics::default();
            entry.value().add_detailed_statistics(&mut stats);
            total.add(entry.key().0, &stats);
        }
        for entry in self.pools.iter() {
            total.add(entry.desc().heap_type, &entry.calculate_statistics());
        }
        total
    }

    /// Check the structure of every block owned by the allocator
    pub fn validate(&self) -> AllocResult<()> {
        for entry in self.default_pools.iter() {
            entry.value().validate()?;
        }
        for entry in self.pools.iter() {
            entry.vector().validate()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("config", &self.config)
            .field("default_pools", &self.default_pools.len())
            .field("pools", &self.pools.len())
            .field("allocations", &self.allocations.len())
            .finish()
    }
}
