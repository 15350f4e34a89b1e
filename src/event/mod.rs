//! Event ingestion: inbound shapes, duplicate suppression and the batching router

mod dedupe;
mod router;
mod types;

pub use dedupe::EventDeduplicator;
pub use router::{DispatchReport, Disposition, EventReport, EventRouter, RouterOptions};
pub use types::{
    parse_event, parse_events, EventParseError, InboundEvent, MaintenanceEvent,
    MaintenanceEventKind, POST_MAINTENANCE_EVENT, PRE_MAINTENANCE_EVENT,
    SUBSCRIPTION_VALIDATION_EVENT,
};
