//! Event Router: batches delivered events and invokes the handler once per event
//!
//! Batches run concurrently up to `max_concurrent_batches`; events inside a
//! batch run in order. Events sharing a maintenance id always land in the
//! same batch in delivery order, so a completion never races its start.
//! One event's failure never blocks another's, and every failure is reported
//! back so the sender can redeliver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tracing::{debug, error, info};

use super::dedupe::EventDeduplicator;
use super::types::MaintenanceEvent;
use crate::error::HandlerError;
use crate::orchestrator::{EventHandler, EventOutcome};

#[derive(Clone, Debug)]
pub struct RouterOptions {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub dedupe_ttl: Duration,
    /// How long handled completions with an occurrence block late starts
    pub completion_tombstone_ttl: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_concurrent_batches: 4,
            dedupe_ttl: Duration::from_secs(6 * 60 * 60),
            completion_tombstone_ttl: Duration::from_secs(48 * 60 * 60),
        }
    }
}

#[derive(Debug)]
pub enum Disposition {
    Handled(EventOutcome),
    Duplicate,
    Failed(HandlerError),
}

#[derive(Debug)]
pub struct EventReport {
    pub event: MaintenanceEvent,
    pub disposition: Disposition,
}

impl EventReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.disposition, Disposition::Failed(_))
    }
}

/// Per-event results of one dispatch, in delivery order
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub reports: Vec<EventReport>,
}

impl DispatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &EventReport> {
        self.reports.iter().filter(|r| r.is_failure())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct EventRouter {
    handler: Arc<dyn EventHandler>,
    dedupe: EventDeduplicator,
    options: RouterOptions,
}

impl EventRouter {
    pub fn new(handler: Arc<dyn EventHandler>, options: RouterOptions) -> Self {
        Self {
            handler,
            dedupe: EventDeduplicator::new(options.dedupe_ttl)
                .with_tombstone_ttl(options.completion_tombstone_ttl),
            options,
        }
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Dispatch a delivery of events
    pub async fn dispatch(&self, events: Vec<MaintenanceEvent>) -> DispatchReport {
        if events.is_empty() {
            return DispatchReport::default();
        }

        let total = events.len();
        let batches = plan_batches(events, self.options.batch_size.max(1));
        debug!("Dispatching {} event(s) in {} batch(es)", total, batches.len());

        let batched: Vec<Vec<(usize, EventReport)>> = stream::iter(batches)
            .map(|batch| self.run_batch(batch))
            .buffered(self.options.max_concurrent_batches.max(1))
            .collect()
            .await;

        let mut indexed: Vec<(usize, EventReport)> = batched.into_iter().flatten().collect();
        indexed.sort_by_key(|(index, _)| *index);

        let report = DispatchReport {
            reports: indexed.into_iter().map(|(_, report)| report).collect(),
        };
        info!(
            "Dispatched {} event(s): {} failed",
            report.reports.len(),
            report.failures().count()
        );
        report
    }

    async fn run_batch(&self, batch: Vec<(usize, MaintenanceEvent)>) -> Vec<(usize, EventReport)> {
        let mut reports = Vec::with_capacity(batch.len());
        for (index, event) in batch {
            let disposition = self.run_one(&event).await;
            reports.push((index, EventReport { event, disposition }));
        }
        reports
    }

    async fn run_one(&self, event: &MaintenanceEvent) -> Disposition {
        let kind = event.kind().label();

        if self.dedupe.is_duplicate(event) {
            info!(
                event_id = %event.id(),
                "Skipping duplicate {} event for maintenance {}",
                kind,
                event.maintenance_id()
            );
            record(kind, "duplicate");
            return Disposition::Duplicate;
        }

        match self.handler.handle(event).await {
            Ok(outcome) => {
                self.dedupe.mark_handled(event);
                record(kind, "processed");
                Disposition::Handled(outcome)
            }
            Err(e) => {
                error!(event_id = %event.id(), "Event handling failed: {}", e);
                record(kind, "failed");
                Disposition::Failed(e)
            }
        }
    }
}

/// Group events by maintenance id into ordered chains, then pack whole chains
/// into batches of up to `batch_size` events. A chain longer than
/// `batch_size` becomes a batch of its own.
fn plan_batches(
    events: Vec<MaintenanceEvent>,
    batch_size: usize,
) -> Vec<Vec<(usize, MaintenanceEvent)>> {
    let mut chains: Vec<Vec<(usize, MaintenanceEvent)>> = Vec::new();
    let mut chain_of: HashMap<String, usize> = HashMap::new();
    for (index, event) in events.into_iter().enumerate() {
        let key = event.maintenance_id().to_ascii_lowercase();
        let chain = *chain_of.entry(key).or_insert_with(|| {
            chains.push(Vec::new());
            chains.len() - 1
        });
        chains[chain].push((index, event));
    }

    let mut batches = Vec::new();
    let mut current: Vec<(usize, MaintenanceEvent)> = Vec::new();
    for chain in chains {
        if !current.is_empty() && current.len() + chain.len() > batch_size {
            batches.push(std::mem::take(&mut current));
        }
        current.extend(chain);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(feature = "metrics")]
fn record(kind: &str, result: &str) {
    crate::metrics::inc_event(kind, result);
}

#[cfg(not(feature = "metrics"))]
fn record(_kind: &str, _result: &str) {}
