//! Shared fixtures for unit tests: in-memory backends with failure injection

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::azure::{RemoteError, ScopeContext, ScopeFactory, StaticToken};
use crate::orchestrator::{HandlerOptions, MaintenanceHandler, ShutdownSignal, WindowStore};
use crate::resolver::{AffectedResourceResolver, CatalogRecord, InMemoryCatalog, ResourceCatalog};
use crate::suppression::{
    InMemorySuppressionService, RuleHandle, RuleNaming, SuppressionRuleManager, SuppressionService,
};

pub const SUB1: &str = "sub1";
pub const SUB2: &str = "sub2";
pub const M1: &str = "/subscriptions/sub1/resourceGroups/rg-maint/providers/Microsoft.Maintenance/maintenanceConfigurations/m1";

pub fn vm_id(subscription: &str, name: &str) -> String {
    format!("/subscriptions/{subscription}/resourceGroups/rg-app/providers/Microsoft.Compute/virtualMachines/{name}")
}

pub fn scopes() -> ScopeFactory {
    ScopeFactory::new(Arc::new(StaticToken::new("test-token")))
}

/// Catalog whose listed subscriptions answer with an authorization error
#[derive(Default)]
pub struct FlakyCatalog {
    pub inner: InMemoryCatalog,
    failing: Mutex<HashSet<String>>,
}

impl FlakyCatalog {
    pub fn fail_scope(&self, subscription: &str) {
        self.failing.lock().unwrap().insert(subscription.to_string());
    }
}

#[async_trait]
impl ResourceCatalog for FlakyCatalog {
    async fn query(
        &self,
        ctx: &ScopeContext,
        maintenance_id: &str,
    ) -> Result<Vec<CatalogRecord>, RemoteError> {
        if self.failing.lock().unwrap().contains(&ctx.subscription_id) {
            return Err(RemoteError::Unauthorized(format!(
                "no access to {}",
                ctx.subscription_id
            )));
        }
        self.inner.query(ctx, maintenance_id).await
    }
}

/// Suppression service that fails create/delete for chosen rule names
#[derive(Default)]
pub struct FlakySuppression {
    pub inner: InMemorySuppressionService,
    failing: Mutex<HashSet<String>>,
}

impl FlakySuppression {
    pub fn fail_rule(&self, rule: &str) {
        self.failing.lock().unwrap().insert(rule.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, name: &str) -> Result<(), RemoteError> {
        if self.failing.lock().unwrap().contains(name) {
            Err(RemoteError::Status {
                code: 500,
                body: format!("injected failure for {name}"),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SuppressionService for FlakySuppression {
    async fn create(
        &self,
        ctx: &ScopeContext,
        name: &str,
        scope: &str,
        description: &str,
    ) -> Result<RuleHandle, RemoteError> {
        self.check(name)?;
        self.inner.create(ctx, name, scope, description).await
    }

    async fn delete(&self, ctx: &ScopeContext, name: &str) -> Result<(), RemoteError> {
        self.check(name)?;
        self.inner.delete(ctx, name).await
    }

    async fn exists(&self, ctx: &ScopeContext, name: &str) -> Result<bool, RemoteError> {
        self.inner.exists(ctx, name).await
    }
}

/// A handler wired to flaky in-memory backends
pub struct Fixture {
    pub catalog: Arc<FlakyCatalog>,
    pub suppression: Arc<FlakySuppression>,
    pub windows: Arc<WindowStore>,
    pub shutdown: ShutdownSignal,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(FlakyCatalog::default()),
            suppression: Arc::new(FlakySuppression::default()),
            windows: Arc::new(WindowStore::in_memory()),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub async fn bind(&self, subscription: &str, vm: &str, maintenance_id: &str) {
        self.catalog
            .inner
            .assign(subscription, &vm_id(subscription, vm), maintenance_id)
            .await;
    }

    pub async fn unbind(&self, subscription: &str, vm: &str) {
        self.catalog.inner.unassign(&vm_id(subscription, vm)).await;
    }

    pub async fn rule_names(&self) -> Vec<String> {
        self.suppression
            .inner
            .rules()
            .await
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    pub fn handler(&self, options: HandlerOptions) -> MaintenanceHandler {
        let timeout = Duration::from_secs(5);
        let resolver = AffectedResourceResolver::new(self.catalog.clone(), scopes(), timeout);
        let manager = SuppressionRuleManager::new(
            self.suppression.clone(),
            scopes(),
            RuleNaming::default(),
            timeout,
        );
        MaintenanceHandler::new(
            resolver,
            manager,
            self.windows.clone(),
            options,
            self.shutdown.clone(),
        )
    }
}
