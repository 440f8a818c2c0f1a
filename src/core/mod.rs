/*!
 * Core Module
 * Fundamental types, identifiers, limits and error handling
 */

pub mod errors;
pub mod id;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use errors::*;
pub use id::{AllocationId, AtomicGenerator, PoolId};
pub use types::*;

/// Round `value` up to a multiple of `alignment` (power of two)
#[inline]
pub fn align_up(value: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Round `value` down to a multiple of `alignment` (power of two)
#[inline]
pub fn align_down(value: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Reject zero and non power of two alignments
#[inline]
pub fn check_alignment(alignment: DeviceSize) -> AllocResult<()> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return Err(AllocError::InvalidAlignment(alignment));
    }
    Ok(())
}
