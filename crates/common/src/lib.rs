//! Shared types for the saga orchestration and event bridge crates.

pub mod types;

pub use types::CorrelationId;
