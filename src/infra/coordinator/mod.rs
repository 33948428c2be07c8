//! Coordinator adapters.

pub mod http;
pub mod memory;

pub use http::HttpCoordinator;
pub use memory::{InMemoryCoordinator, Report};
