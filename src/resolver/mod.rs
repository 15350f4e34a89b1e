//! Affected-resource resolution
//!
//! Given a maintenance configuration id and the subscriptions to search,
//! queries every scope live (never cached), filters on the binding attribute
//! case-insensitively, and unions the results deduplicated by resource id.
//! A failing scope is recorded and skipped; the others still contribute.

mod catalog;
mod resource;
mod resource_graph;

pub use catalog::{CatalogRecord, InMemoryCatalog, ResourceCatalog};
pub use resource::TargetResource;
pub use resource_graph::{assignment_query, ResourceGraphCatalog};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::azure::{with_timeout, ScopeFactory};
use crate::error::ResolveError;

/// Union of resources found across scopes plus the scopes that failed
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub resources: Vec<TargetResource>,
    pub failures: Vec<ResolveError>,
    pub scopes_queried: usize,
}

impl Resolution {
    /// True when at least one scope was queried and none succeeded
    pub fn all_scopes_failed(&self) -> bool {
        self.scopes_queried > 0 && self.failures.len() == self.scopes_queried
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && !self.all_scopes_failed()
    }
}

pub struct AffectedResourceResolver {
    catalog: Arc<dyn ResourceCatalog>,
    scopes: ScopeFactory,
    call_timeout: Duration,
}

impl AffectedResourceResolver {
    pub fn new(catalog: Arc<dyn ResourceCatalog>, scopes: ScopeFactory, call_timeout: Duration) -> Self {
        Self {
            catalog,
            scopes,
            call_timeout,
        }
    }

    /// Resolve the resources currently bound to `maintenance_id`
    ///
    /// An empty result is a valid answer. Each scope is queried concurrently
    /// under the per-call timeout; results keep scope order.
    #[instrument(skip(self), fields(maintenance_id = %maintenance_id))]
    pub async fn resolve(&self, maintenance_id: &str, subscription_scope: &[String]) -> Resolution {
        let mut seen_scopes = HashSet::new();
        let scopes: Vec<&str> = subscription_scope
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && seen_scopes.insert(s.to_ascii_lowercase()))
            .collect();

        let queries = scopes.iter().map(|scope| {
            let ctx = self.scopes.context(scope);
            async move {
                let result = with_timeout(self.call_timeout, self.catalog.query(&ctx, maintenance_id)).await;
                (ctx.subscription_id, result)
            }
        });
        let results = futures::future::join_all(queries).await;

        let mut resolution = Resolution {
            scopes_queried: scopes.len(),
            ..Default::default()
        };
        let mut seen_resources = HashSet::new();

        for (scope, result) in results {
            let records = match result {
                Ok(records) => records,
                Err(source) => {
                    warn!(scope = %scope, "Resolve failed for scope, skipping: {}", source);
                    resolution.failures.push(ResolveError { scope, source });
                    continue;
                }
            };

            for record in records {
                if !record
                    .maintenance_configuration_id
                    .eq_ignore_ascii_case(maintenance_id)
                {
                    debug!(
                        "Ignoring {} bound to {}",
                        record.resource_id, record.maintenance_configuration_id
                    );
                    continue;
                }
                let Some(resource) = TargetResource::from_resource_id(&record.resource_id, &scope)
                else {
                    warn!(scope = %scope, "Skipping malformed resource id {:?}", record.resource_id);
                    continue;
                };
                if seen_resources.insert(resource.identity_key()) {
                    resolution.resources.push(resource);
                }
            }
        }

        info!(
            "Resolved {} resource(s) across {} scope(s), {} scope failure(s)",
            resolution.resources.len(),
            resolution.scopes_queried,
            resolution.failures.len()
        );
        resolution
    }
}
