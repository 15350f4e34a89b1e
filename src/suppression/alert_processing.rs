//! Azure Alert Processing Rules backed suppression service
//!
//! Each rule is an `actionRules` resource with a `RemoveAllActionGroups`
//! action scoped to exactly one target resource. Rules for a subscription
//! live in one dedicated resource group.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::service::{RuleHandle, SuppressionService};
use crate::azure::{ArmHttp, RemoteError, ScopeContext};

const API_VERSION: &str = "2021-08-08";
const MANAGED_BY_TAG: &str = "maintenance-quiesce";

#[derive(Deserialize)]
struct ActionRuleResponse {
    #[serde(default)]
    id: String,
}

pub struct AlertProcessingRuleService {
    http: ArmHttp,
    resource_group: String,
}

impl AlertProcessingRuleService {
    pub fn new(http: ArmHttp, resource_group: impl Into<String>) -> Self {
        Self {
            http,
            resource_group: resource_group.into(),
        }
    }

    fn rule_url(&self, ctx: &ScopeContext, name: &str) -> String {
        self.http.url(&format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.AlertsManagement/actionRules/{}?api-version={}",
            ctx.subscription_id, self.resource_group, name, API_VERSION
        ))
    }
}

#[async_trait]
impl SuppressionService for AlertProcessingRuleService {
    async fn create(
        &self,
        ctx: &ScopeContext,
        name: &str,
        scope: &str,
        description: &str,
    ) -> Result<RuleHandle, RemoteError> {
        let body = json!({
            "location": "Global",
            "tags": { "managed-by": MANAGED_BY_TAG },
            "properties": {
                "scopes": [scope],
                "description": description,
                "enabled": true,
                "actions": [{ "actionType": "RemoveAllActionGroups" }]
            }
        });
        let url = self.rule_url(ctx, name);
        debug!("PUT alert processing rule {}", url);

        let response = self.http.send(ctx, Method::PUT, &url, Some(&body)).await?;
        let created: ActionRuleResponse = response.json().await?;

        Ok(RuleHandle {
            name: name.to_string(),
            id: created.id,
            scope: scope.to_string(),
        })
    }

    async fn delete(&self, ctx: &ScopeContext, name: &str) -> Result<(), RemoteError> {
        let url = self.rule_url(ctx, name);
        let response = self.http.send(ctx, Method::DELETE, &url, None).await?;
        // ARM answers 204 for a delete of a resource that does not exist
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            debug!("Alert processing rule {} was already absent", name);
        }
        Ok(())
    }

    async fn exists(&self, ctx: &ScopeContext, name: &str) -> Result<bool, RemoteError> {
        let url = self.rule_url(ctx, name);
        match self.http.send(ctx, Method::GET, &url, None).await {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
