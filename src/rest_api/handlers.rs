//! HTTP handlers for the ingest API

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::event::{parse_events, InboundEvent};

use super::dto::{DispatchSummary, ErrorResponse, HealthResponse, ValidationResponse};
use super::server::AppState;

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus text exposition
#[cfg(feature = "metrics")]
pub async fn metrics() -> Response {
    match crate::metrics::encode_text() {
        Ok(body) => body.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("encode_failed", &e.to_string())),
        )
            .into_response(),
    }
}

/// Accept a delivery of one or more events
///
/// Replies 200 when every maintenance event was handled or recognised as a
/// duplicate, 500 with the failed event ids otherwise so the sender
/// redelivers, and 400 when the body cannot be parsed at all.
#[instrument(skip(state, payload))]
pub async fn post_events(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Rejected event delivery: {}", rejection.body_text());
            return bad_request(&rejection.body_text());
        }
    };

    let inbound = match parse_events(&body) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!("Rejected event delivery: {}", e);
            return bad_request(&e.to_string());
        }
    };

    let mut validation_code = None;
    let mut events = Vec::new();
    for item in inbound {
        match item {
            InboundEvent::Maintenance(event) => events.push(event),
            InboundEvent::SubscriptionValidation { id, validation_code: code } => {
                info!(event_id = %id, "Answering subscription validation handshake");
                validation_code.get_or_insert(code);
            }
            InboundEvent::Ignored { id, event_type } => {
                debug!(event_id = %id, "Ignoring event of type {}", event_type);
            }
        }
    }

    let report = state.router.dispatch(events).await;
    let summary = DispatchSummary::from(&report);

    if !report.all_succeeded() {
        warn!(
            "{} of {} event(s) failed: {:?}",
            summary.failed, summary.total, summary.failed_event_ids
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(summary)).into_response();
    }

    match validation_code {
        Some(code) => Json(ValidationResponse {
            validation_response: code,
        })
        .into_response(),
        None => (StatusCode::OK, Json(summary)).into_response(),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("invalid_event", message)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventRouter, RouterOptions};
    use crate::orchestrator::HandlerOptions;
    use crate::testing::{Fixture, M1, SUB1, SUB2};
    use axum::body::to_bytes;
    use serde_json::json;

    fn state(fx: &Fixture) -> Arc<AppState> {
        let handler = Arc::new(fx.handler(HandlerOptions::default()));
        Arc::new(AppState {
            router: Arc::new(EventRouter::new(handler, RouterOptions::default())),
        })
    }

    fn pre_maintenance(id: &str, subscriptions: &[&str]) -> Value {
        json!({
            "id": id,
            "eventType": "Microsoft.Maintenance.PreMaintenanceEvent",
            "subject": M1,
            "data": {
                "MaintenanceConfigurationId": M1,
                "ResourceSubscriptionIds": subscriptions,
                "CorrelationId": "run-1"
            }
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let Json(health) = health().await;
        assert_eq!(health.status, "healthy");
    }

    #[tokio::test]
    async fn test_delivery_creates_rules_and_returns_ok() {
        let fx = Fixture::new();
        fx.bind(SUB1, "vm-a", M1).await;
        let state = state(&fx);

        let response = post_events(
            State(state),
            Ok(Json(json!([pre_maintenance("evt-1", &[SUB1])]))),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["events"][0]["disposition"], "handled");
        assert_eq!(body["events"][0]["status"], "succeeded");
        assert_eq!(fx.rule_names().await, ["maint-suppress-vm-a"]);
    }

    #[tokio::test]
    async fn test_redelivery_is_reported_as_duplicate() {
        let fx = Fixture::new();
        fx.bind(SUB1, "vm-a", M1).await;
        let state = state(&fx);

        let first = post_events(
            State(state.clone()),
            Ok(Json(pre_maintenance("evt-1", &[SUB1]))),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = post_events(State(state), Ok(Json(pre_maintenance("evt-1", &[SUB1])))).await;
        assert_eq!(second.status(), StatusCode::OK);
        let body = body_json(second).await;
        assert_eq!(body["events"][0]["disposition"], "duplicate");
        assert_eq!(fx.rule_names().await.len(), 1);
    }

    #[tokio::test]
    async fn test_total_failure_returns_500_with_event_id() {
        let fx = Fixture::new();
        fx.catalog.fail_scope(SUB1);
        fx.catalog.fail_scope(SUB2);
        let state = state(&fx);

        let response = post_events(
            State(state),
            Ok(Json(pre_maintenance("evt-9", &[SUB1, SUB2]))),
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["failedEventIds"], json!(["evt-9"]));
        assert_eq!(body["events"][0]["disposition"], "failed");
    }

    #[tokio::test]
    async fn test_partial_scope_failure_is_still_accepted() {
        let fx = Fixture::new();
        fx.bind(SUB1, "vm-a", M1).await;
        fx.catalog.fail_scope(SUB2);
        let state = state(&fx);

        let response = post_events(
            State(state),
            Ok(Json(pre_maintenance("evt-2", &[SUB1, SUB2]))),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["events"][0]["status"], "partiallySucceeded");
        assert_eq!(body["events"][0]["failedScopes"], json!([SUB2]));
    }

    #[tokio::test]
    async fn test_subscription_validation_handshake() {
        let fx = Fixture::new();
        let response = post_events(
            State(state(&fx)),
            Ok(Json(json!([{
                "id": "v-1",
                "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent",
                "data": { "validationCode": "abc-123" }
            }]))),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "validationResponse": "abc-123" })
        );
    }

    #[tokio::test]
    async fn test_unknown_event_types_are_ignored() {
        let fx = Fixture::new();
        let response = post_events(
            State(state(&fx)),
            Ok(Json(json!({
                "id": "x-1",
                "eventType": "Microsoft.Resources.ResourceWriteSuccess",
                "data": {}
            }))),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["total"], 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let fx = Fixture::new();
        let response = post_events(State(state(&fx)), Ok(Json(json!("not an event")))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = post_events(
            State(state(&fx)),
            Ok(Json(json!({ "id": "e", "eventType": "Microsoft.Maintenance.PreMaintenanceEvent", "data": {} }))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
