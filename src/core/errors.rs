/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::DeviceSize;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allocation operation result
pub type AllocResult<T> = Result<T, AllocError>;

/// Failure reported by a device or resource-binding backend
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("device error {code}: {message}")]
pub struct DeviceError {
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Device refused the request for lack of memory
    pub fn out_of_memory(requested: DeviceSize) -> Self {
        Self::new(-2, format!("device out of memory allocating {} bytes", requested))
    }
}

/// Allocation errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum AllocError {
    #[error("Out of memory: requested {requested} bytes (alignment {alignment})")]
    #[diagnostic(
        code(alloc::out_of_memory),
        help("No free region fits the request and no new block could be created. Free allocations or raise pool limits.")
    )]
    OutOfMemory {
        requested: DeviceSize,
        alignment: DeviceSize,
    },

    #[error("Invalid alignment {0}: must be a non-zero power of two")]
    #[diagnostic(code(alloc::invalid_alignment))]
    InvalidAlignment(DeviceSize),

    #[error("Invalid size {0}")]
    #[diagnostic(code(alloc::invalid_size), help("Sizes must be non-zero."))]
    InvalidSize(DeviceSize),

    #[error("Invalid flag combination: {0}")]
    #[diagnostic(code(alloc::invalid_flags))]
    InvalidFlags(String),

    #[error("Free order violation at offset {offset}: only the most recent allocation of a stack may be freed")]
    #[diagnostic(
        code(alloc::invalid_free_order),
        help("Linear stack blocks release allocations in LIFO order. Free newer allocations first or clear the block.")
    )]
    InvalidFreeOrder { offset: DeviceSize },

    #[error("Invalid or already freed allocation handle: {0}")]
    #[diagnostic(
        code(alloc::invalid_handle),
        help("The handle was freed before, belongs to another block or pool, or its block was destroyed.")
    )]
    InvalidHandle(String),

    #[error("Invalid allocation state: {0}")]
    #[diagnostic(code(alloc::invalid_state))]
    InvalidState(String),

    #[error("Pool block limit exceeded: {requested} blocks requested, limit {limit}")]
    #[diagnostic(
        code(alloc::pool_limit_exceeded),
        help("Increase max_block_count or free dedicated allocations.")
    )]
    PoolLimitExceeded { requested: usize, limit: usize },

    #[error("Pool still owns {allocations} live allocations")]
    #[diagnostic(code(alloc::pool_in_use), help("Free every allocation before destroying the pool."))]
    PoolInUse { allocations: usize },

    #[error("Aliasing conflict: {0}")]
    #[diagnostic(
        code(alloc::aliasing_conflict),
        help("The aliasing resource is incompatible with the heap backing the parent allocation.")
    )]
    AliasingConflict(String),

    #[error("Alias range [{offset}, {offset}+{size}) exceeds allocation of {parent_size} bytes")]
    #[diagnostic(code(alloc::alias_out_of_bounds))]
    AliasOutOfBounds {
        offset: DeviceSize,
        size: DeviceSize,
        parent_size: DeviceSize,
    },

    #[error("Allocation still has {count} live aliasing resources")]
    #[diagnostic(
        code(alloc::aliases_outstanding),
        help("Aliasing resources must not outlive the allocation they alias. Free them first.")
    )]
    AliasesOutstanding { count: usize },

    #[error("Device heap creation failed: {0}")]
    #[diagnostic(code(alloc::device))]
    Device(#[from] DeviceError),

    #[error("Block metadata corruption detected: {0}")]
    #[diagnostic(code(alloc::corruption))]
    Corruption(String),
}

impl AllocError {
    pub fn out_of_memory(requested: DeviceSize, alignment: DeviceSize) -> Self {
        AllocError::OutOfMemory {
            requested,
            alignment,
        }
    }

    /// True for every failure caused by exhausted capacity
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            AllocError::OutOfMemory { .. } | AllocError::PoolLimitExceeded { .. }
        )
    }
}
