/*!
 * Simulated Device
 * In-memory heap accounting with optional capacity and failure injection
 */

use crate::core::{
    AtomicGenerator, DeviceError, DeviceSize, HeapDesc, HeapHandle, NativeResource, ResourceDesc,
};
use crate::memory::{HeapBackend, ResourceBinder};
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Device backend that only does bookkeeping
///
/// Heaps are entries in a map, resources are fresh ids. A capacity turns
/// the device into a finite one and `fail_next` makes the next heap
/// creations fail as if the device ran out of memory. `fail_next_bind`
/// does the same for resource binding.
#[derive(Debug)]
pub struct SimulatedDevice {
    heaps: DashMap<HeapHandle, HeapDesc, RandomState>,
    heap_ids: AtomicGenerator<HeapHandle>,
    resource_ids: AtomicGenerator<NativeResource>,
    capacity: Option<DeviceSize>,
    allocated: AtomicU64,
    pending_failures: AtomicUsize,
    pending_bind_failures: AtomicUsize,
    bound: AtomicUsize,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self {
            heaps: DashMap::with_hasher(RandomState::new()),
            heap_ids: AtomicGenerator::default(),
            resource_ids: AtomicGenerator::default(),
            capacity: None,
            allocated: AtomicU64::new(0),
            pending_failures: AtomicUsize::new(0),
            pending_bind_failures: AtomicUsize::new(0),
            bound: AtomicUsize::new(0),
        }
    }

    /// Device with a fixed amount of memory
    pub fn with_capacity(capacity: DeviceSize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Fail the next `count` heap creations
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` resource bindings
    pub fn fail_next_bind(&self, count: usize) {
        self.pending_bind_failures.store(count, Ordering::SeqCst);
    }

    pub fn live_heaps(&self) -> usize {
        self.heaps.len()
    }

    pub fn allocated_bytes(&self) -> DeviceSize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn bound_resources(&self) -> usize {
        self.bound.load(Ordering::SeqCst)
    }

    pub fn heap_desc(&self, heap: HeapHandle) -> Option<HeapDesc> {
        self.heaps.get(&heap).map(|entry| *entry.value())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapBackend for SimulatedDevice {
    fn create_heap(&self, desc: &HeapDesc) -> Result<HeapHandle, DeviceError> {
        if desc.size == 0 {
            return Err(DeviceError::new(-1, "heap size must be non-zero"));
        }
        if Self::take_failure(&self.pending_failures) {
            return Err(DeviceError::out_of_memory(desc.size));
        }

        let capacity = self.capacity.unwrap_or(DeviceSize::MAX);
        let reserved = self
            .allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(desc.size).filter(|&total| total <= capacity)
            });
        if reserved.is_err() {
            return Err(DeviceError::out_of_memory(desc.size));
        }

        let heap = self.heap_ids.next();
        self.heaps.insert(heap, *desc);
        debug!("Simulated {} heap {} of {} bytes", desc.heap_type, heap, desc.size);
        Ok(heap)
    }

    fn destroy_heap(&self, heap: HeapHandle) {
        match self.heaps.remove(&heap) {
            Some((_, desc)) => {
                self.allocated.fetch_sub(desc.size, Ordering::SeqCst);
            }
            None => warn!("Destroy of unknown heap {}", heap),
        }
    }
}

impl ResourceBinder for SimulatedDevice {
    fn bind_resource(
        &self,
        heap: HeapHandle,
        offset: DeviceSize,
        desc: &ResourceDesc,
    ) -> Result<NativeResource, DeviceError> {
        let heap_desc = self
            .heap_desc(heap)
            .ok_or_else(|| DeviceError::new(-3, format!("unknown heap {}", heap)))?;
        if Self::take_failure(&self.pending_bind_failures) {
            return Err(DeviceError::new(-6, "resource creation failed"));
        }
        let fits = offset
            .checked_add(desc.size)
            .map_or(false, |end| end <= heap_desc.size);
        if !fits {
            return Err(DeviceError::new(
                -4,
                format!(
                    "{} bytes at offset {} exceed {} of {} bytes",
                    desc.size, offset, heap, heap_desc.size
                ),
            ));
        }
        if !heap_desc.flags.admits(desc.kind) {
            return Err(DeviceError::new(
                -5,
                format!("{:?} cannot be placed in a heap with {:?}", desc.kind, heap_desc.flags),
            ));
        }
        self.bound.fetch_add(1, Ordering::SeqCst);
        Ok(self.resource_ids.next())
    }
}
