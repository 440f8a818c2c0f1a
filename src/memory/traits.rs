/*!
 * Memory Traits
 * Device backend abstractions consumed by the block and pool layers
 */

use crate::core::{DeviceError, DeviceSize, HeapDesc, HeapHandle, NativeResource, ResourceDesc};

/// Creates and destroys device heaps
pub trait HeapBackend: Send + Sync {
    /// Create a heap of exactly `desc.size` bytes
    fn create_heap(&self, desc: &HeapDesc) -> Result<HeapHandle, DeviceError>;

    /// Release a heap previously returned by `create_heap`
    fn destroy_heap(&self, heap: HeapHandle);
}

/// Turns a heap range into a native resource
pub trait ResourceBinder: Send + Sync {
    fn bind_resource(
        &self,
        heap: HeapHandle,
        offset: DeviceSize,
        desc: &ResourceDesc,
    ) -> Result<NativeResource, DeviceError>;
}
