//! Orchestration: wires the resolver and the rule manager behind the event router

mod handler;
mod outcome;
mod window_store;

pub use handler::{
    CompletionStrategy, EventHandler, HandlerOptions, MaintenanceHandler, ShutdownSignal,
};
pub use outcome::{EventOutcome, OutcomeStatus, ResourceOutcome};
pub use window_store::{RememberedWindow, WindowStore};
