/*!
 * Core Types
 * Common types shared by the suballocator, block and pool layers
 */

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte offsets and sizes inside device memory
pub type DeviceSize = u64;

/// Opaque handle to a heap created by the device backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeapHandle(pub u64);

/// Opaque handle to a resource produced by the resource binder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeResource(pub u64);

impl fmt::Display for HeapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap#{}", self.0)
    }
}

impl fmt::Display for NativeResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

impl From<u64> for HeapHandle {
    fn from(raw: u64) -> Self {
        HeapHandle(raw)
    }
}

impl From<u64> for NativeResource {
    fn from(raw: u64) -> Self {
        NativeResource(raw)
    }
}

/// Memory heap type (CPU visibility of the heap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapType {
    /// Device-local, not CPU visible
    Default,
    /// CPU write, device read
    Upload,
    /// Device write, CPU read
    Readback,
    /// Device-local and CPU visible
    GpuUpload,
}

impl fmt::Display for HeapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapType::Default => write!(f, "DEFAULT"),
            HeapType::Upload => write!(f, "UPLOAD"),
            HeapType::Readback => write!(f, "READBACK"),
            HeapType::GpuUpload => write!(f, "GPU_UPLOAD"),
        }
    }
}

bitflags! {
    /// Heap creation flags forwarded to the device backend
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct HeapFlags: u32 {
        const ALLOW_ONLY_BUFFERS = 1 << 0;
        const ALLOW_ONLY_NON_RT_DS_TEXTURES = 1 << 1;
        const ALLOW_ONLY_RT_DS_TEXTURES = 1 << 2;
        const SHARED = 1 << 3;
        const SHARED_CROSS_ADAPTER = 1 << 4;
        const DENY_BUFFERS = 1 << 5;
        const DENY_RT_DS_TEXTURES = 1 << 6;
        const DENY_NON_RT_DS_TEXTURES = 1 << 7;
    }
}

/// What a resource is, as far as heap compatibility is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Buffer,
    Texture,
    RenderTargetTexture,
}

/// Resources that can share a heap
///
/// Default pools are split per category so that heap flags never have to
/// admit mixed resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Buffer,
    NonRtDsTexture,
    RtDsTexture,
}

impl ResourceKind {
    pub fn category(self) -> ResourceCategory {
        match self {
            ResourceKind::Buffer => ResourceCategory::Buffer,
            ResourceKind::Texture => ResourceCategory::NonRtDsTexture,
            ResourceKind::RenderTargetTexture => ResourceCategory::RtDsTexture,
        }
    }
}

impl ResourceCategory {
    /// Heap flags restricting a heap to this category
    pub fn heap_flags(self) -> HeapFlags {
        match self {
            ResourceCategory::Buffer => HeapFlags::ALLOW_ONLY_BUFFERS,
            ResourceCategory::NonRtDsTexture => HeapFlags::ALLOW_ONLY_NON_RT_DS_TEXTURES,
            ResourceCategory::RtDsTexture => HeapFlags::ALLOW_ONLY_RT_DS_TEXTURES,
        }
    }

    /// Derive the category implied by explicit heap flags, if any
    pub fn from_heap_flags(flags: HeapFlags) -> Option<Self> {
        if flags.contains(HeapFlags::ALLOW_ONLY_BUFFERS) {
            Some(ResourceCategory::Buffer)
        } else if flags.contains(HeapFlags::ALLOW_ONLY_NON_RT_DS_TEXTURES) {
            Some(ResourceCategory::NonRtDsTexture)
        } else if flags.contains(HeapFlags::ALLOW_ONLY_RT_DS_TEXTURES) {
            Some(ResourceCategory::RtDsTexture)
        } else {
            None
        }
    }
}

impl HeapFlags {
    /// Check whether a heap created with these flags may host a resource kind
    pub fn admits(self, kind: ResourceKind) -> bool {
        let category = kind.category();
        if let Some(only) = ResourceCategory::from_heap_flags(self) {
            return only == category;
        }
        let denied = match category {
            ResourceCategory::Buffer => HeapFlags::DENY_BUFFERS,
            ResourceCategory::NonRtDsTexture => HeapFlags::DENY_NON_RT_DS_TEXTURES,
            ResourceCategory::RtDsTexture => HeapFlags::DENY_RT_DS_TEXTURES,
        };
        !self.contains(denied)
    }
}

/// Description of a heap requested from the device backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapDesc {
    pub size: DeviceSize,
    pub heap_type: HeapType,
    pub flags: HeapFlags,
}

/// Description of a resource to place in device memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDesc {
    pub size: DeviceSize,
    pub alignment: DeviceSize,
    pub kind: ResourceKind,
}

impl ResourceDesc {
    pub fn buffer(size: DeviceSize) -> Self {
        Self {
            size,
            alignment: crate::core::limits::DEFAULT_RESOURCE_ALIGNMENT,
            kind: ResourceKind::Buffer,
        }
    }

    pub fn texture(size: DeviceSize, render_target: bool) -> Self {
        Self {
            size,
            alignment: crate::core::limits::DEFAULT_RESOURCE_ALIGNMENT,
            kind: if render_target {
                ResourceKind::RenderTargetTexture
            } else {
                ResourceKind::Texture
            },
        }
    }

    pub fn with_alignment(mut self, alignment: DeviceSize) -> Self {
        self.alignment = alignment;
        self
    }
}
