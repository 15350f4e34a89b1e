//! Maintenance lifecycle events and the inbound envelope shapes
//!
//! Two envelope shapes are accepted: the direct shape
//! `{ eventType, maintenanceId, subscriptionScope, occurrence? }` and the Event Grid
//! schema emitted for maintenance configurations, whose `data` carries
//! `MaintenanceConfigurationId` and `ResourceSubscriptionIds`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const PRE_MAINTENANCE_EVENT: &str = "Microsoft.Maintenance.PreMaintenanceEvent";
pub const POST_MAINTENANCE_EVENT: &str = "Microsoft.Maintenance.PostMaintenanceEvent";
pub const SUBSCRIPTION_VALIDATION_EVENT: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaintenanceEventKind {
    MaintenanceStarting,
    MaintenanceCompleted,
}

impl MaintenanceEventKind {
    /// Map a direct or Event Grid event type to a kind
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "MaintenanceStarting" | PRE_MAINTENANCE_EVENT => Some(Self::MaintenanceStarting),
            "MaintenanceCompleted" | POST_MAINTENANCE_EVENT => Some(Self::MaintenanceCompleted),
            _ => None,
        }
    }

    /// Lowercase label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::MaintenanceStarting => "starting",
            Self::MaintenanceCompleted => "completed",
        }
    }
}

/// One lifecycle notification; immutable once received
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceEvent {
    id: String,
    kind: MaintenanceEventKind,
    maintenance_id: String,
    subscription_scope: Vec<String>,
    /// Identifies one run of a recurring maintenance configuration, when the sender provides it
    #[serde(skip_serializing_if = "Option::is_none")]
    occurrence: Option<String>,
}

impl MaintenanceEvent {
    pub fn new(
        kind: MaintenanceEventKind,
        maintenance_id: impl Into<String>,
        subscription_scope: Vec<String>,
    ) -> Self {
        let maintenance_id = maintenance_id.into();
        Self {
            id: format!("{}:{}", kind.label(), maintenance_id),
            kind,
            maintenance_id,
            subscription_scope,
            occurrence: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_occurrence(mut self, occurrence: impl Into<String>) -> Self {
        self.occurrence = Some(occurrence.into());
        self
    }

    /// Delivery id, used only for reporting
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MaintenanceEventKind {
        self.kind
    }

    pub fn maintenance_id(&self) -> &str {
        &self.maintenance_id
    }

    pub fn subscription_scope(&self) -> &[String] {
        &self.subscription_scope
    }

    pub fn occurrence(&self) -> Option<&str> {
        self.occurrence.as_deref()
    }
}

/// A parsed inbound item
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Maintenance(MaintenanceEvent),
    /// Event Grid handshake; answered with the validation code
    SubscriptionValidation { id: String, validation_code: String },
    /// Any other event type routed to this endpoint
    Ignored { id: String, event_type: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventParseError {
    #[error("malformed event envelope: {0}")]
    Malformed(String),

    #[error("event {id} is missing {field}")]
    MissingField { id: String, field: &'static str },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "type")]
    event_type: String,
    #[serde(default)]
    maintenance_id: Option<String>,
    #[serde(default)]
    subscription_scope: Vec<String>,
    /// Distinguishes windows of one maintenance id in the direct shape
    #[serde(default, alias = "correlationId")]
    occurrence: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct MaintenanceData {
    #[serde(rename = "MaintenanceConfigurationId", alias = "maintenanceConfigurationId")]
    maintenance_configuration_id: Option<String>,
    #[serde(
        rename = "ResourceSubscriptionIds",
        alias = "resourceSubscriptionIds",
        default
    )]
    resource_subscription_ids: Vec<String>,
    #[serde(rename = "CorrelationId", alias = "correlationId", default)]
    correlation_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationData {
    validation_code: String,
}

/// Parse one inbound JSON object
pub fn parse_event(value: &Value) -> Result<InboundEvent, EventParseError> {
    let raw: RawEnvelope = serde_json::from_value(value.clone())
        .map_err(|e| EventParseError::Malformed(e.to_string()))?;

    if raw.event_type == SUBSCRIPTION_VALIDATION_EVENT {
        let id = raw.id.unwrap_or_default();
        let data: ValidationData = raw
            .data
            .ok_or_else(|| EventParseError::MissingField {
                id: id.clone(),
                field: "data",
            })
            .and_then(|d| {
                serde_json::from_value(d).map_err(|e| EventParseError::Malformed(e.to_string()))
            })?;
        return Ok(InboundEvent::SubscriptionValidation {
            id,
            validation_code: data.validation_code,
        });
    }

    let Some(kind) = MaintenanceEventKind::from_event_type(&raw.event_type) else {
        return Ok(InboundEvent::Ignored {
            id: raw.id.unwrap_or_default(),
            event_type: raw.event_type,
        });
    };

    let data: Option<MaintenanceData> = match raw.data {
        Some(Value::Object(map)) => Some(
            serde_json::from_value(Value::Object(map))
                .map_err(|e| EventParseError::Malformed(e.to_string()))?,
        ),
        _ => None,
    };

    let maintenance_id = raw
        .maintenance_id
        .or_else(|| data.as_ref().and_then(|d| d.maintenance_configuration_id.clone()))
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| EventParseError::MissingField {
            id: raw.id.clone().unwrap_or_default(),
            field: "maintenanceId",
        })?;

    let mut subscription_scope = raw.subscription_scope;
    let mut occurrence = raw.occurrence.filter(|o| !o.is_empty());
    if let Some(data) = data {
        if subscription_scope.is_empty() {
            subscription_scope = data.resource_subscription_ids;
        }
        if occurrence.is_none() {
            occurrence = data.correlation_id.filter(|c| !c.is_empty());
        }
    }

    let mut event = MaintenanceEvent::new(kind, maintenance_id.trim(), subscription_scope);
    if let Some(id) = raw.id.filter(|id| !id.is_empty()) {
        event = event.with_id(id);
    }
    if let Some(occurrence) = occurrence {
        event = event.with_occurrence(occurrence);
    }
    Ok(InboundEvent::Maintenance(event))
}

/// Parse a request body holding either one event or an array of events
pub fn parse_events(body: &Value) -> Result<Vec<InboundEvent>, EventParseError> {
    match body {
        Value::Array(items) => items.iter().map(parse_event).collect(),
        Value::Object(_) => parse_event(body).map(|event| vec![event]),
        _ => Err(EventParseError::Malformed(
            "expected a JSON object or array".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_direct_shape() {
        let parsed = parse_event(&json!({
            "eventType": "MaintenanceStarting",
            "maintenanceId": "m1",
            "subscriptionScope": ["sub1", "sub2"]
        }))
        .unwrap();

        let InboundEvent::Maintenance(event) = parsed else {
            panic!("expected maintenance event");
        };
        assert_eq!(event.kind(), MaintenanceEventKind::MaintenanceStarting);
        assert_eq!(event.maintenance_id(), "m1");
        assert_eq!(event.subscription_scope(), ["sub1", "sub2"]);
        assert_eq!(event.id(), "starting:m1");
        assert_eq!(event.occurrence(), None);
    }

    #[test]
    fn test_parse_direct_shape_with_occurrence() {
        let starting = |occurrence: &str| {
            let parsed = parse_event(&json!({
                "eventType": "MaintenanceStarting",
                "maintenanceId": "m1",
                "occurrence": occurrence
            }))
            .unwrap();
            let InboundEvent::Maintenance(event) = parsed else {
                panic!("expected maintenance event");
            };
            event
        };

        let monday = starting("2026-10-19");
        assert_eq!(monday.occurrence(), Some("2026-10-19"));
        assert_eq!(starting("").occurrence(), None);

        let dedupe = crate::event::EventDeduplicator::new(std::time::Duration::from_secs(3600));
        dedupe.mark_handled(&monday);
        assert!(dedupe.is_duplicate(&starting("2026-10-19")));
        assert!(!dedupe.is_duplicate(&starting("2026-10-20")));
    }

    #[test]
    fn test_parse_event_grid_shape() {
        let parsed = parse_event(&json!({
            "id": "evt-42",
            "topic": "/subscriptions/sub1/resourceGroups/rg/providers/Microsoft.Maintenance/maintenanceConfigurations/weekly",
            "subject": "weekly",
            "eventType": POST_MAINTENANCE_EVENT,
            "eventTime": "2026-10-18T02:00:00Z",
            "dataVersion": "1.0",
            "data": {
                "MaintenanceConfigurationId": "/subscriptions/sub1/resourcegroups/rg/providers/microsoft.maintenance/maintenanceconfigurations/weekly",
                "ResourceSubscriptionIds": ["sub1"],
                "CorrelationId": "corr-7",
                "Status": "Succeeded"
            }
        }))
        .unwrap();

        let InboundEvent::Maintenance(event) = parsed else {
            panic!("expected maintenance event");
        };
        assert_eq!(event.kind(), MaintenanceEventKind::MaintenanceCompleted);
        assert_eq!(event.id(), "evt-42");
        assert!(event.maintenance_id().ends_with("maintenanceconfigurations/weekly"));
        assert_eq!(event.subscription_scope(), ["sub1"]);
        assert_eq!(event.occurrence(), Some("corr-7"));
    }

    #[test]
    fn test_parse_subscription_validation() {
        let parsed = parse_event(&json!({
            "id": "v1",
            "eventType": SUBSCRIPTION_VALIDATION_EVENT,
            "data": { "validationCode": "512d38b6-c7b8-40c8-89fe-f46f9e9622b6" }
        }))
        .unwrap();
        assert_eq!(
            parsed,
            InboundEvent::SubscriptionValidation {
                id: "v1".to_string(),
                validation_code: "512d38b6-c7b8-40c8-89fe-f46f9e9622b6".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_event_type_is_ignored() {
        let parsed = parse_event(&json!({ "id": "x", "eventType": "Microsoft.Resources.ResourceWriteSuccess" }))
            .unwrap();
        assert!(matches!(parsed, InboundEvent::Ignored { event_type, .. } if event_type == "Microsoft.Resources.ResourceWriteSuccess"));
    }

    #[test]
    fn test_missing_maintenance_id_is_error() {
        let err = parse_event(&json!({ "id": "e1", "eventType": "MaintenanceCompleted" })).unwrap_err();
        assert_eq!(
            err,
            EventParseError::MissingField {
                id: "e1".to_string(),
                field: "maintenanceId"
            }
        );
    }

    #[test]
    fn test_parse_events_accepts_object_or_array() {
        let one = json!({ "eventType": "MaintenanceCompleted", "maintenanceId": "m1" });
        assert_eq!(parse_events(&one).unwrap().len(), 1);
        assert_eq!(parse_events(&json!([one.clone(), one])).unwrap().len(), 2);
        assert!(parse_events(&json!("nope")).is_err());
    }
}
