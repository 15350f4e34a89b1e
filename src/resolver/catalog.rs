//! Read-only resource catalog queried for maintenance bindings

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::azure::{RemoteError, ScopeContext};

/// One maintenance binding as reported by the catalog
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogRecord {
    pub resource_id: String,
    pub maintenance_configuration_id: String,
}

/// Resource catalog filtered by maintenance binding
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// Resources in `ctx`'s subscription whose binding matches `maintenance_id`
    async fn query(
        &self,
        ctx: &ScopeContext,
        maintenance_id: &str,
    ) -> Result<Vec<CatalogRecord>, RemoteError>;
}

/// Catalog backed by an in-process table, used for local runs and tests
#[derive(Default)]
pub struct InMemoryCatalog {
    assignments: RwLock<HashMap<String, Vec<CatalogRecord>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `resource_id` in `subscription_id` to a maintenance configuration
    pub async fn assign(&self, subscription_id: &str, resource_id: &str, maintenance_id: &str) {
        let mut assignments = self.assignments.write().await;
        let records = assignments
            .entry(subscription_id.to_ascii_lowercase())
            .or_default();
        records.retain(|r| !r.resource_id.eq_ignore_ascii_case(resource_id));
        records.push(CatalogRecord {
            resource_id: resource_id.to_string(),
            maintenance_configuration_id: maintenance_id.to_string(),
        });
    }

    /// Remove any binding for `resource_id`
    pub async fn unassign(&self, resource_id: &str) {
        let mut assignments = self.assignments.write().await;
        for records in assignments.values_mut() {
            records.retain(|r| !r.resource_id.eq_ignore_ascii_case(resource_id));
        }
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryCatalog {
    async fn query(
        &self,
        ctx: &ScopeContext,
        maintenance_id: &str,
    ) -> Result<Vec<CatalogRecord>, RemoteError> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .get(&ctx.subscription_id.to_ascii_lowercase())
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.maintenance_configuration_id.eq_ignore_ascii_case(maintenance_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
