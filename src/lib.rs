//! maintenance-quiesce: alert suppression for scheduled maintenance windows
//!
//! Maintenance events are routed to a handler that resolves the resources
//! bound to the maintenance configuration and keeps one suppression rule per
//! resource for the duration of the window. Rule operations are idempotent,
//! so redelivered or duplicated events converge on the same state.

pub mod azure;
pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod resolver;
pub mod rest_api;
pub mod suppression;
pub mod telemetry;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(test)]
mod testing;

pub use crate::error::{Error, Result};
