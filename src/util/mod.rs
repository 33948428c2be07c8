//! Shared utilities.

pub mod clock;
pub mod signing;
pub mod telemetry;
pub mod ttl_cache;

pub use clock::*;
pub use signing::*;
pub use telemetry::*;
pub use ttl_cache::*;
