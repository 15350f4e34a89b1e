//! Per-event outcome: which resources converged and which did not

use crate::error::{ResolveError, SuppressionError};
use crate::event::MaintenanceEventKind;
use crate::resolver::TargetResource;
use crate::suppression::RuleChange;

#[derive(Clone, Debug)]
pub struct ResourceOutcome {
    pub resource: TargetResource,
    pub rule: String,
    pub result: Result<RuleChange, SuppressionError>,
}

impl ResourceOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Resolution succeeded and nothing is bound to the maintenance id
    NoTargets,
    Succeeded,
    /// Some resources or scopes failed, others converged
    PartiallySucceeded,
    /// Every resource operation failed
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::NoTargets => "noTargets",
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::PartiallySucceeded => "partiallySucceeded",
            OutcomeStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventOutcome {
    pub maintenance_id: String,
    pub kind: MaintenanceEventKind,
    pub resources: Vec<ResourceOutcome>,
    pub scope_failures: Vec<ResolveError>,
    /// Resources not attempted because the process was shutting down
    pub skipped: usize,
}

impl EventOutcome {
    pub fn succeeded(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.resources.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.resources.iter().filter(|r| !r.is_success())
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn status(&self) -> OutcomeStatus {
        let failed = self.failed_count();
        let total = self.resources.len();

        if total == 0 && self.skipped == 0 {
            if self.scope_failures.is_empty() {
                OutcomeStatus::NoTargets
            } else {
                OutcomeStatus::PartiallySucceeded
            }
        } else if failed == 0 && self.skipped == 0 && self.scope_failures.is_empty() {
            OutcomeStatus::Succeeded
        } else if total > 0 && failed == total {
            OutcomeStatus::Failed
        } else {
            OutcomeStatus::PartiallySucceeded
        }
    }

    /// True only when every scope resolved and every resource converged
    pub fn is_complete_success(&self) -> bool {
        matches!(self.status(), OutcomeStatus::Succeeded | OutcomeStatus::NoTargets)
    }
}
