//! Azure Resource Graph backed catalog
//!
//! Queries the `maintenanceresources` table for configuration assignments
//! whose `maintenanceConfigurationId` matches, one subscription per call.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::catalog::{CatalogRecord, ResourceCatalog};
use crate::azure::{ArmHttp, RemoteError, ScopeContext};

const API_VERSION: &str = "2021-03-01";
const PAGE_SIZE: u32 = 1000;
/// Upper bound on followed `$skipToken` pages for a single query
const MAX_PAGES: usize = 50;

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(rename = "$skipToken", default)]
    skip_token: Option<String>,
}

pub struct ResourceGraphCatalog {
    http: ArmHttp,
}

impl ResourceGraphCatalog {
    pub fn new(http: ArmHttp) -> Self {
        Self { http }
    }

    fn query_url(&self) -> String {
        self.http.url(&format!(
            "/providers/Microsoft.ResourceGraph/resources?api-version={API_VERSION}"
        ))
    }
}

/// Escape a value for use inside a single-quoted KQL string literal
fn kql_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// KQL selecting configuration assignments bound to `maintenance_id`
pub fn assignment_query(maintenance_id: &str) -> String {
    format!(
        "maintenanceresources \
         | where type =~ 'microsoft.maintenance/configurationassignments' \
         | where tostring(properties.maintenanceConfigurationId) =~ {} \
         | project resourceId = tostring(properties.resourceId), \
         maintenanceConfigurationId = tostring(properties.maintenanceConfigurationId)",
        kql_string(maintenance_id)
    )
}

fn parse_record(row: &Value) -> Option<CatalogRecord> {
    let resource_id = row.get("resourceId")?.as_str()?;
    let maintenance_id = row.get("maintenanceConfigurationId")?.as_str()?;
    if resource_id.is_empty() {
        return None;
    }
    Some(CatalogRecord {
        resource_id: resource_id.to_string(),
        maintenance_configuration_id: maintenance_id.to_string(),
    })
}

#[async_trait]
impl ResourceCatalog for ResourceGraphCatalog {
    async fn query(
        &self,
        ctx: &ScopeContext,
        maintenance_id: &str,
    ) -> Result<Vec<CatalogRecord>, RemoteError> {
        let url = self.query_url();
        let query = assignment_query(maintenance_id);
        let mut records = Vec::new();
        let mut skip_token: Option<String> = None;

        for page in 0..MAX_PAGES {
            let mut options = json!({ "resultFormat": "objectArray", "$top": PAGE_SIZE });
            if let Some(token) = &skip_token {
                options["$skipToken"] = Value::String(token.clone());
            }
            let body = json!({
                "subscriptions": [ctx.subscription_id],
                "query": query,
                "options": options,
            });

            let response = self.http.send(ctx, Method::POST, &url, Some(&body)).await?;
            let parsed: QueryResponse = response.json().await?;

            let before = records.len();
            records.extend(parsed.data.iter().filter_map(parse_record));
            debug!(
                "Resource Graph page {} for {} returned {} assignment(s)",
                page,
                ctx.subscription_id,
                records.len() - before
            );

            match parsed.skip_token {
                Some(token) if !token.is_empty() => skip_token = Some(token),
                _ => return Ok(records),
            }
        }

        Err(RemoteError::Decode(format!(
            "Resource Graph paging exceeded {MAX_PAGES} pages"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::StaticToken;
    use reqwest::Client;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MC: &str = "/subscriptions/sub1/resourceGroups/rg-maint/providers/Microsoft.Maintenance/maintenanceConfigurations/weekly";

    fn ctx() -> ScopeContext {
        ScopeContext::new("sub1", Arc::new(StaticToken::new("tok")))
    }

    #[test]
    fn test_query_escapes_quotes() {
        let q = assignment_query("it's");
        assert!(q.contains(r"=~ 'it\'s'"));
        assert!(q.starts_with("maintenanceresources"));
    }

    #[tokio::test]
    async fn test_query_follows_skip_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .and(query_param("api-version", API_VERSION))
            .and(body_partial_json(json!({ "options": { "$skipToken": "page-2" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "resourceId": "/subscriptions/sub1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-b", "maintenanceConfigurationId": MC }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .and(body_partial_json(json!({ "subscriptions": ["sub1"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "resourceId": "/subscriptions/sub1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-a", "maintenanceConfigurationId": MC },
                    { "resourceId": "", "maintenanceConfigurationId": MC }
                ],
                "$skipToken": "page-2"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let catalog = ResourceGraphCatalog::new(ArmHttp::new(Client::new(), &server.uri(), 0));
        let records = catalog.query(&ctx(), MC).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].ends_with("vm-a"));
        assert!(ids[1].ends_with("vm-b"));
    }

    #[tokio::test]
    async fn test_query_forbidden_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("AuthorizationFailed"))
            .mount(&server)
            .await;

        let catalog = ResourceGraphCatalog::new(ArmHttp::new(Client::new(), &server.uri(), 2));
        let err = catalog.query(&ctx(), MC).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized(_)));
    }
}
