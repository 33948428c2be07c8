//! Infrastructure adapters: coordinator clients, notification sinks, portal drivers.

pub mod coordinator;
pub mod notify;
pub mod portal;

pub use coordinator::{HttpCoordinator, InMemoryCoordinator, Report};
pub use notify::{FanoutSink, MemorySink, TracingSink, WebhookSink};
pub use portal::{PortalScript, SimulatedPortalFactory};
