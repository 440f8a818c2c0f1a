/*!
 * Allocator Configuration
 * Serde-loadable settings and the allocator builder
 */

use super::Allocator;
use crate::core::limits::{
    DEFAULT_BLOCK_SIZE, DEFAULT_PLACEMENT_ALIGNMENT_THRESHOLD, DEFAULT_PLACEMENT_THRESHOLD,
    UNLIMITED_BLOCK_COUNT,
};
use crate::core::{AllocError, AllocResult, DeviceSize};
use crate::memory::{HeapBackend, ResourceBinder};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Allocator-wide settings
///
/// Every field has a default, so partial documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Preferred block size of default pools
    pub preferred_block_size: DeviceSize,
    /// Larger requests get a dedicated block
    pub placement_threshold: DeviceSize,
    /// Requests with a larger alignment get a dedicated block
    pub placement_alignment_threshold: DeviceSize,
    /// Give every default pool allocation a dedicated block
    pub always_committed: bool,
    /// Byte budget of each default pool
    pub heap_budget: Option<DeviceSize>,
    pub default_pool_max_blocks: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            preferred_block_size: DEFAULT_BLOCK_SIZE,
            placement_threshold: DEFAULT_PLACEMENT_THRESHOLD,
            placement_alignment_threshold: DEFAULT_PLACEMENT_ALIGNMENT_THRESHOLD,
            always_committed: false,
            heap_budget: None,
            default_pool_max_blocks: UNLIMITED_BLOCK_COUNT,
        }
    }
}

impl AllocatorConfig {
    pub fn validate(&self) -> AllocResult<()> {
        if self.preferred_block_size == 0 {
            return Err(AllocError::InvalidSize(0));
        }
        if self.default_pool_max_blocks == 0 {
            return Err(AllocError::PoolLimitExceeded {
                requested: 1,
                limit: 0,
            });
        }
        Ok(())
    }
}

/// Builder for Allocator
#[derive(Debug, Default)]
pub struct AllocatorBuilder {
    config: AllocatorConfig,
}

impl AllocatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a complete configuration
    pub fn with_config(mut self, config: AllocatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_preferred_block_size(mut self, size: DeviceSize) -> Self {
        self.config.preferred_block_size = size;
        self
    }

    pub fn with_placement_threshold(mut self, threshold: DeviceSize) -> Self {
        self.config.placement_threshold = threshold;
        self
    }

    pub fn with_always_committed(mut self) -> Self {
        self.config.always_committed = true;
        self
    }

    pub fn with_heap_budget(mut self, budget: DeviceSize) -> Self {
        self.config.heap_budget = Some(budget);
        self
    }

    pub fn with_default_pool_max_blocks(mut self, max: usize) -> Self {
        self.config.default_pool_max_blocks = max;
        self
    }

    /// Build the Allocator on top of a device backend
    pub fn build<D>(self, device: Arc<D>) -> AllocResult<Allocator>
    where
        D: HeapBackend + ResourceBinder + 'static,
    {
        self.config.validate()?;

        let mut features = Vec::new();
        if self.config.always_committed {
            features.push("always-committed".to_string());
        }
        if let Some(budget) = self.config.heap_budget {
            features.push(format!("heap budget {} bytes", budget));
        }
        if self.config.default_pool_max_blocks != UNLIMITED_BLOCK_COUNT {
            features.push(format!("{} blocks per heap", self.config.default_pool_max_blocks));
        }
        info!(
            "Allocator initialized with {} byte blocks{}{}",
            self.config.preferred_block_size,
            if features.is_empty() { "" } else { ": " },
            features.join(", ")
        );

        let heaps: Arc<dyn HeapBackend> = device.clone();
        let binder: Arc<dyn ResourceBinder> = device;
        Ok(Allocator::from_parts(self.config, heaps, binder))
    }
}
