//! Configuration models for the engine, loadable from the environment or JSON.

pub mod engine;
pub mod quiet_hours;

pub use engine::{
    BreakerConfig, CoordinatorConfig, EngineConfig, NotifyConfig, PacingAuthority, PacingConfig,
    PortalMode, SchedulingConfig, SessionConfig,
};
pub use quiet_hours::{HourRange, QuietHours};
