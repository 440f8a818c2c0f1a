/*!
 * ID Generation System
 * Type-safe identifiers for pools and allocations
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Type-Safe ID Wrappers
// ============================================================================

/// Pool identifier, unique for the lifetime of an allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub u64);

/// Allocation identifier, never reused by an allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc#{}", self.0)
    }
}

impl From<u64> for PoolId {
    fn from(raw: u64) -> Self {
        PoolId(raw)
    }
}

impl From<u64> for AllocationId {
    fn from(raw: u64) -> Self {
        AllocationId(raw)
    }
}

// ============================================================================
// Atomic Counter Generator
// ============================================================================

/// Lock-free monotonically increasing ID source
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
#[repr(C, align(64))]
pub struct AtomicGenerator<T> {
    counter: AtomicU64,
    _marker: PhantomData<T>,
}

impl<T: From<u64>> AtomicGenerator<T> {
    #[inline]
    pub fn new(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn next(&self) -> T {
        T::from(self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value the next call to `next` returns
    #[inline]
    pub fn peek(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl<T: From<u64>> Default for AtomicGenerator<T> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<T> fmt::Debug for AtomicGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicGenerator")
            .field("next", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}
