//! Builders that turn configuration into a running engine.

pub mod engine_builder;

pub use engine_builder::{Engine, EngineBuilder};
