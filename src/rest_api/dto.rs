//! Response bodies for the ingest API

use serde::Serialize;

use crate::event::{DispatchReport, Disposition, EventReport};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Event Grid subscription handshake reply
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub validation_response: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: String,
    pub maintenance_id: String,
    pub kind: String,
    /// `handled`, `duplicate` or `failed`
    pub disposition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failed_scopes: Vec<String>,
    pub failed_resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&EventReport> for EventSummary {
    fn from(report: &EventReport) -> Self {
        let mut summary = EventSummary {
            id: report.event.id().to_string(),
            maintenance_id: report.event.maintenance_id().to_string(),
            kind: report.event.kind().label().to_string(),
            disposition: String::new(),
            status: None,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            failed_scopes: Vec::new(),
            failed_resources: Vec::new(),
            error: None,
        };

        match &report.disposition {
            Disposition::Handled(outcome) => {
                summary.disposition = "handled".to_string();
                summary.status = Some(outcome.status().as_str().to_string());
                summary.succeeded = outcome.succeeded().count();
                summary.failed = outcome.failed_count();
                summary.skipped = outcome.skipped;
                summary.failed_scopes = outcome
                    .scope_failures
                    .iter()
                    .map(|f| f.scope.clone())
                    .collect();
                summary.failed_resources = outcome
                    .failed()
                    .map(|r| r.resource.resource_id.clone())
                    .collect();
            }
            Disposition::Duplicate => {
                summary.disposition = "duplicate".to_string();
            }
            Disposition::Failed(err) => {
                summary.disposition = "failed".to_string();
                summary.error = Some(err.to_string());
            }
        }
        summary
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub total: usize,
    pub failed: usize,
    /// Ids of events the sender should redeliver
    pub failed_event_ids: Vec<String>,
    pub events: Vec<EventSummary>,
}

impl From<&DispatchReport> for DispatchSummary {
    fn from(report: &DispatchReport) -> Self {
        let failed_event_ids: Vec<String> =
            report.failures().map(|r| r.event.id().to_string()).collect();
        DispatchSummary {
            total: report.reports.len(),
            failed: failed_event_ids.len(),
            failed_event_ids,
            events: report.reports.iter().map(EventSummary::from).collect(),
        }
    }
}
