//! HTTP ingest API
//!
//! Receives maintenance event deliveries, answers the Event Grid
//! subscription handshake and exposes health and metrics endpoints.

mod dto;
mod handlers;
mod server;

pub use dto::{DispatchSummary, ErrorResponse, EventSummary, HealthResponse, ValidationResponse};
pub use server::{build_router, run_server, AppState};
