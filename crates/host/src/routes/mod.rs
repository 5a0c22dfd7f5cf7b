//! HTTP route handlers.

pub mod broker;
pub mod events;
pub mod health;
pub mod metrics;
