//! Concurrency limiting for outbound work.
//!
//! Two shapes of the same idea:
//! - [`Throttle`]: a fixed-width pool. Every submitted task gets its own [`TaskHandle`].
//! - [`Aggregator`]: feed it items, close the intake, wait once for every result.
//!
//! Neither retries anything. A task that fails only fails for its own caller, and the pump
//! keeps going.
mod aggregate;
mod pool;

pub use aggregate::Aggregator;
pub use pool::{TaskHandle, Throttle};
