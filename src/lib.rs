//! # Slotwatch
//!
//! A job-orchestration engine that claims queued slot searches from a coordinating
//! service and drives paced, defence-aware automation sessions against a portal
//! that offers scarce, time-boxed appointment slots.
//!
//! ## Moving parts
//!
//! - **Claim loop** ([`core::ClaimLoop`]): claims up to the free runner capacity, ranks
//!   jobs with the [`core::PriorityScorer`], and keeps at most `concurrency` runners in
//!   flight. It idles while paused, in quiet hours, or under a global cooldown.
//! - **Job runner** ([`core::JobRunner`]): one pass per claimed job. It serialises on
//!   the credential identity, hands back stale leases, scans priority resources first,
//!   and reports one status per pass plus breadcrumbs for every step.
//! - **Pacing** ([`core::RateLimiter`], [`core::KeyedRateLimiter`]): token buckets
//!   with jitter, owned either by the engine or by each session.
//! - **Breaker** ([`core::ResourceHealth`]): per-resource failure counters plus a
//!   reserved global cooldown that a challenge wall engages.
//! - **Sessions** ([`core::AutomationSession`]): a readiness-gated state machine
//!   over the [`core::PortalPage`] port, with challenge and block detection after
//!   every navigation and submit.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use slotwatch::builders::EngineBuilder;
//! use slotwatch::config::EngineConfig;
//! use slotwatch::infra::{InMemoryCoordinator, MemorySink};
//!
//! let engine = EngineBuilder::new(EngineConfig::default())
//!     .coordinator(Arc::new(InMemoryCoordinator::new()))
//!     .sink(Arc::new(MemorySink::new()))
//!     .build()?;
//! let stats = engine.run().await;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Job model, pacing, breaker, sessions, runners and the claim loop.
pub mod core;
/// Engine configuration from environment or JSON.
pub mod config;
/// Builders that wire configuration and ports into an engine.
pub mod builders;
/// Coordinator clients, notification sinks and portal drivers.
pub mod infra;
/// Wire models and process signal handling.
pub mod runtime;
/// Clock, caches, signing and telemetry helpers.
pub mod util;
