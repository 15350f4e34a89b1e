//! Resolve-then-act handling of one maintenance event

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use super::outcome::{EventOutcome, OutcomeStatus, ResourceOutcome};
use super::window_store::WindowStore;
use crate::azure::RemoteError;
use crate::error::{HandlerError, SuppressionError};
use crate::event::{MaintenanceEvent, MaintenanceEventKind};
use crate::resolver::{AffectedResourceResolver, TargetResource};
use crate::suppression::SuppressionRuleManager;

/// How targets are chosen when maintenance completes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionStrategy {
    /// Union of a fresh resolve and the resources remembered from the start event
    #[default]
    RememberedOrReresolve,
    /// Only a fresh resolve; a cleared binding yields nothing to clean up
    Reresolve,
}

impl FromStr for CompletionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remembered-or-reresolve" => Ok(Self::RememberedOrReresolve),
            "reresolve" => Ok(Self::Reresolve),
            other => Err(format!("unknown completion strategy {other:?}")),
        }
    }
}

/// Process-wide shutdown flag checked before each per-resource operation
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// Handles one delivered event; implemented by [`MaintenanceHandler`]
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &MaintenanceEvent) -> Result<EventOutcome, HandlerError>;
}

#[derive(Clone, Debug)]
pub struct HandlerOptions {
    pub completion_strategy: CompletionStrategy,
    pub max_parallel_resources: usize,
    /// Surface partial outcomes as errors so the sender redelivers
    pub retry_partial_failures: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            completion_strategy: CompletionStrategy::default(),
            max_parallel_resources: 8,
            retry_partial_failures: false,
        }
    }
}

pub struct MaintenanceHandler {
    resolver: AffectedResourceResolver,
    manager: SuppressionRuleManager,
    windows: Arc<WindowStore>,
    options: HandlerOptions,
    shutdown: ShutdownSignal,
}

impl MaintenanceHandler {
    pub fn new(
        resolver: AffectedResourceResolver,
        manager: SuppressionRuleManager,
        windows: Arc<WindowStore>,
        options: HandlerOptions,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            resolver,
            manager,
            windows,
            options,
            shutdown,
        }
    }

    async fn targets(
        &self,
        event: &MaintenanceEvent,
        resolved: Vec<TargetResource>,
    ) -> Vec<TargetResource> {
        if event.kind() == MaintenanceEventKind::MaintenanceStarting
            || self.options.completion_strategy == CompletionStrategy::Reresolve
        {
            return resolved;
        }

        let mut targets = resolved;
        for remembered in self.windows.recall(event.maintenance_id()).await {
            let key = remembered.identity_key();
            if !targets.iter().any(|t| t.identity_key() == key) {
                targets.push(remembered);
            }
        }
        targets
    }

    /// Split off resources whose rule name is already taken by an earlier
    /// target in the same subscription
    ///
    /// On start those are reported as failures, since no rule would cover
    /// them. On completion they are dropped: removing the shared rule once
    /// is enough.
    fn partition_collisions(
        &self,
        event: &MaintenanceEvent,
        targets: Vec<TargetResource>,
    ) -> (Vec<TargetResource>, Vec<ResourceOutcome>) {
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut kept = Vec::with_capacity(targets.len());
        let mut collided = Vec::new();

        for resource in targets {
            match owners.entry(self.manager.rule_slot(&resource)) {
                Entry::Vacant(slot) => {
                    slot.insert(resource.resource_id.clone());
                    kept.push(resource);
                }
                Entry::Occupied(owner) => {
                    let rule = self.manager.rule_name(&resource);
                    if event.kind() == MaintenanceEventKind::MaintenanceCompleted {
                        debug!(rule = %rule, "Rule for {} already handled via {}", resource.resource_id, owner.get());
                        continue;
                    }
                    warn!(
                        rule = %rule,
                        "Rule name for {} collides with {}",
                        resource.resource_id,
                        owner.get()
                    );
                    collided.push(ResourceOutcome {
                        result: Err(SuppressionError {
                            rule: rule.clone(),
                            resource_id: resource.resource_id.clone(),
                            source: RemoteError::Conflict(format!(
                                "rule name {} is already used for {}",
                                rule,
                                owner.get()
                            )),
                        }),
                        rule,
                        resource,
                    });
                }
            }
        }
        (kept, collided)
    }

    /// Run the rule operation for every target; `None` marks a resource
    /// skipped because shutdown began before its turn
    async fn apply(
        &self,
        event: &MaintenanceEvent,
        targets: &[TargetResource],
    ) -> Vec<Option<ResourceOutcome>> {
        let parallel = self.options.max_parallel_resources.max(1);
        let operations: Vec<BoxFuture<'_, Option<ResourceOutcome>>> = targets
            .iter()
            .cloned()
            .map(|resource| self.apply_one(event, resource).boxed())
            .collect();

        stream::iter(operations)
            .buffer_unordered(parallel)
            .collect()
            .await
    }

    async fn apply_one(
        &self,
        event: &MaintenanceEvent,
        resource: TargetResource,
    ) -> Option<ResourceOutcome> {
        if self.shutdown.is_triggered() {
            return None;
        }
        let rule = self.manager.rule_name(&resource);
        let result = match event.kind() {
            MaintenanceEventKind::MaintenanceStarting => {
                self.manager
                    .ensure_suppressed(&resource, event.maintenance_id())
                    .await
            }
            MaintenanceEventKind::MaintenanceCompleted => {
                self.manager.ensure_unsuppressed(&resource).await
            }
        };
        Some(ResourceOutcome {
            resource,
            rule,
            result,
        })
    }

    fn verdict(&self, outcome: EventOutcome) -> Result<EventOutcome, HandlerError> {
        let maintenance_id = outcome.maintenance_id.clone();
        let failed = outcome.failed_count();
        let total = outcome.resources.len();

        for failure in outcome.failed() {
            if let Err(e) = &failure.result {
                warn!(
                    resource_id = %failure.resource.resource_id,
                    rule = %failure.rule,
                    retryable = e.is_retryable(),
                    "Rule operation failed: {}",
                    e.source
                );
            }
        }

        if outcome.skipped > 0 {
            warn!(
                "Shutdown interrupted maintenance {}: {} resource(s) not processed",
                maintenance_id, outcome.skipped
            );
            return Err(HandlerError::ShuttingDown { maintenance_id });
        }

        match outcome.status() {
            OutcomeStatus::Failed => Err(HandlerError::AllOperationsFailed {
                maintenance_id,
                failed,
            }),
            OutcomeStatus::PartiallySucceeded if self.options.retry_partial_failures => {
                Err(HandlerError::PartialFailure {
                    maintenance_id,
                    failed: failed + outcome.scope_failures.len(),
                    total: total + outcome.scope_failures.len(),
                })
            }
            OutcomeStatus::PartiallySucceeded => {
                warn!(
                    "Maintenance {} partially succeeded: {}/{} resource(s) failed, {} scope(s) failed",
                    maintenance_id,
                    failed,
                    total,
                    outcome.scope_failures.len()
                );
                Ok(outcome)
            }
            OutcomeStatus::Succeeded | OutcomeStatus::NoTargets => Ok(outcome),
        }
    }
}

#[async_trait]
impl EventHandler for MaintenanceHandler {
    #[instrument(
        skip(self, event),
        fields(event_id = %event.id(), kind = event.kind().label(), maintenance_id = %event.maintenance_id())
    )]
    async fn handle(&self, event: &MaintenanceEvent) -> Result<EventOutcome, HandlerError> {
        let started = Instant::now();
        let maintenance_id = event.maintenance_id();

        let resolution = self
            .resolver
            .resolve(maintenance_id, event.subscription_scope())
            .await;
        #[cfg(feature = "metrics")]
        {
            for failure in &resolution.failures {
                crate::metrics::inc_resolve_failure(&failure.scope);
            }
        }

        let all_failed = resolution.all_scopes_failed();
        let scope_failures = resolution.failures;
        let targets = self.targets(event, resolution.resources).await;

        // A completion can still clean up remembered resources when every scope failed
        if all_failed && targets.is_empty() {
            error!(
                "Resolution failed for all {} scope(s) of maintenance {}",
                scope_failures.len(),
                maintenance_id
            );
            return Err(HandlerError::ResolutionFailed {
                maintenance_id: maintenance_id.to_string(),
                failures: scope_failures,
            });
        }

        #[cfg(feature = "metrics")]
        {
            crate::metrics::set_resolved_resources(event.kind().label(), targets.len());
        }

        let (targets, collisions) = self.partition_collisions(event, targets);

        if event.kind() == MaintenanceEventKind::MaintenanceStarting {
            // Remember before acting so a crash mid-way still leaves cleanup targets
            self.windows.remember(maintenance_id, &targets).await;
        }

        let applied = self.apply(event, &targets).await;
        let skipped = applied.iter().filter(|r| r.is_none()).count();
        let mut resources: Vec<ResourceOutcome> = applied.into_iter().flatten().collect();
        resources.extend(collisions);

        if event.kind() == MaintenanceEventKind::MaintenanceCompleted {
            let released: Vec<TargetResource> = resources
                .iter()
                .filter(|r| r.is_success())
                .map(|r| r.resource.clone())
                .collect();
            self.windows.release(maintenance_id, &released).await;
        }

        let outcome = EventOutcome {
            maintenance_id: maintenance_id.to_string(),
            kind: event.kind(),
            resources,
            scope_failures,
            skipped,
        };

        info!(
            "Handled maintenance {} ({}): {} resource(s), status {} in {:?}",
            maintenance_id,
            event.kind().label(),
            targets.len(),
            outcome.status().as_str(),
            started.elapsed()
        );
        #[cfg(feature = "metrics")]
        {
            crate::metrics::observe_handler_duration_seconds(
                event.kind().label(),
                started.elapsed().as_secs_f64(),
            );
        }

        self.verdict(outcome)
    }
}
