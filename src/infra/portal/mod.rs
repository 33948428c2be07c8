//! Portal drivers.

pub mod simulated;

pub use simulated::{PortalScript, PortalStats, SimulatedPortal, SimulatedPortalFactory};
