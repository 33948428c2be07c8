//! Process runtime: coordinator wire models and signal handling.

pub mod api;
pub mod shutdown;

pub use api::{ClaimRequest, ClaimResponse, ControlsResponse, EventReport, StatusReport};
pub use shutdown::install_shutdown_handler;
