/*!
 * Device Backends
 * Implementations of the heap and resource binding contracts
 */

mod simulated;

pub use simulated::SimulatedDevice;
