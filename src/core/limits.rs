/*!
 * Allocation Limits and Constants
 *
 * Centralized location for block sizing, placement thresholds and alignment defaults.
 * Grouped by the layer that consumes them.
 */

use super::types::DeviceSize;

/// One mebibyte
pub const MEGABYTE: DeviceSize = 1024 * 1024;

// =============================================================================
// BLOCK SIZING
// =============================================================================

/// Preferred size of a device heap backing a default pool (64MB)
pub const DEFAULT_BLOCK_SIZE: DeviceSize = 64 * MEGABYTE;

/// Number of times a new block may be halved below the preferred size
/// The first blocks of a pool are created at 1/8, 1/4, 1/2 of the preferred size
pub const NEW_BLOCK_SIZE_SHIFT_MAX: u32 = 3;

/// Unlimited block count for pools without an explicit cap
pub const UNLIMITED_BLOCK_COUNT: usize = usize::MAX;

// =============================================================================
// PLACEMENT POLICY
// =============================================================================

/// Requests larger than this get a dedicated (committed) heap by default (32MB)
pub const DEFAULT_PLACEMENT_THRESHOLD: DeviceSize = DEFAULT_BLOCK_SIZE / 2;

/// Requests with alignment above this get a dedicated heap by default (4MB, MSAA placement)
pub const DEFAULT_PLACEMENT_ALIGNMENT_THRESHOLD: DeviceSize = 4 * MEGABYTE;

// =============================================================================
// ALIGNMENT
// =============================================================================

/// Default placement alignment for buffers and textures (64KB)
pub const DEFAULT_RESOURCE_ALIGNMENT: DeviceSize = 64 * 1024;
