//! Suppression-rule lifecycle: one rule per affected resource
//!
//! Both operations converge rather than fail on repeat: an existing rule is
//! a successful no-op on suppress, an absent rule is a successful no-op on
//! unsuppress. Duplicate deliveries and concurrent handlers therefore need
//! no locking.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::naming::RuleNaming;
use super::service::SuppressionService;
use crate::azure::{with_timeout, RemoteError, ScopeContext, ScopeFactory};
use crate::error::SuppressionError;
use crate::resolver::TargetResource;

/// Default description; `{resource}`, `{maintenance}` and `{instance}` are substituted
pub const DEFAULT_DESCRIPTION_TEMPLATE: &str =
    "Alerts suppressed for {resource} during maintenance {maintenance} (managed by {instance})";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RuleState {
    Absent,
    Active,
}

/// What an ensure operation did to converge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleChange {
    Created,
    AlreadyActive,
    Removed,
    AlreadyAbsent,
    /// Dry run: the rule would have been created
    WouldCreate,
    /// Dry run: the rule would have been removed
    WouldRemove,
}

impl RuleChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleChange::Created => "created",
            RuleChange::AlreadyActive => "already_active",
            RuleChange::Removed => "removed",
            RuleChange::AlreadyAbsent => "already_absent",
            RuleChange::WouldCreate => "would_create",
            RuleChange::WouldRemove => "would_remove",
        }
    }
}

pub struct SuppressionRuleManager {
    service: Arc<dyn SuppressionService>,
    scopes: ScopeFactory,
    naming: RuleNaming,
    description_template: String,
    instance: String,
    call_timeout: Duration,
    dry_run: bool,
}

impl SuppressionRuleManager {
    pub fn new(
        service: Arc<dyn SuppressionService>,
        scopes: ScopeFactory,
        naming: RuleNaming,
        call_timeout: Duration,
    ) -> Self {
        Self {
            service,
            scopes,
            naming,
            description_template: DEFAULT_DESCRIPTION_TEMPLATE.to_string(),
            instance: "maintenance-quiesce".to_string(),
            call_timeout,
            dry_run: false,
        }
    }

    pub fn with_description_template(mut self, template: impl Into<String>) -> Self {
        self.description_template = template.into();
        self
    }

    /// Identity written into rule descriptions, usually the host name
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn naming(&self) -> &RuleNaming {
        &self.naming
    }

    pub fn rule_name(&self, resource: &TargetResource) -> String {
        self.naming.rule_name(&resource.name)
    }

    /// Where the rule for `resource` lives: its subscription plus the rule name.
    /// Two resources with the same slot would share one rule.
    pub fn rule_slot(&self, resource: &TargetResource) -> String {
        let subscription = resource
            .subscription_id()
            .unwrap_or(&resource.subscription_scope)
            .to_ascii_lowercase();
        format!("{}/{}", subscription, self.rule_name(resource))
    }

    /// Rules live in the resource's own subscription
    fn context_for(&self, resource: &TargetResource) -> ScopeContext {
        let subscription = resource
            .subscription_id()
            .unwrap_or(&resource.subscription_scope);
        self.scopes.context(subscription)
    }

    fn describe(&self, resource: &TargetResource, maintenance_id: &str) -> String {
        self.description_template
            .replace("{resource}", &resource.resource_id)
            .replace("{maintenance}", maintenance_id)
            .replace("{instance}", &self.instance)
    }

    fn error(&self, rule: &str, resource: &TargetResource, source: RemoteError) -> SuppressionError {
        SuppressionError {
            rule: rule.to_string(),
            resource_id: resource.resource_id.clone(),
            source,
        }
    }

    pub async fn rule_state(&self, resource: &TargetResource) -> Result<RuleState, SuppressionError> {
        let rule = self.rule_name(resource);
        let ctx = self.context_for(resource);
        self.state_of(&ctx, &rule)
            .await
            .map_err(|e| self.error(&rule, resource, e))
    }

    async fn state_of(&self, ctx: &ScopeContext, rule: &str) -> Result<RuleState, RemoteError> {
        let exists = with_timeout(self.call_timeout, self.service.exists(ctx, rule)).await?;
        Ok(if exists {
            RuleState::Active
        } else {
            RuleState::Absent
        })
    }

    /// Make sure a rule silencing `resource` is active
    #[instrument(skip(self, resource), fields(resource_id = %resource.resource_id))]
    pub async fn ensure_suppressed(
        &self,
        resource: &TargetResource,
        maintenance_id: &str,
    ) -> Result<RuleChange, SuppressionError> {
        let rule = self.rule_name(resource);
        let ctx = self.context_for(resource);
        let result = self.suppress(&ctx, &rule, resource, maintenance_id).await;
        record("suppress", &result);
        result.map_err(|e| {
            warn!(rule = %rule, "Failed to suppress alerts: {}", e);
            self.error(&rule, resource, e)
        })
    }

    async fn suppress(
        &self,
        ctx: &ScopeContext,
        rule: &str,
        resource: &TargetResource,
        maintenance_id: &str,
    ) -> Result<RuleChange, RemoteError> {
        if self.state_of(ctx, rule).await? == RuleState::Active {
            debug!(rule = %rule, "Suppression rule already active");
            return Ok(RuleChange::AlreadyActive);
        }
        if self.dry_run {
            info!(rule = %rule, "Dry run: would create suppression rule");
            return Ok(RuleChange::WouldCreate);
        }

        let description = self.describe(resource, maintenance_id);
        let created = with_timeout(
            self.call_timeout,
            self.service
                .create(ctx, rule, &resource.resource_id, &description),
        )
        .await;

        match created {
            Ok(handle) => {
                info!(rule = %rule, rule_id = %handle.id, "Created suppression rule");
                Ok(RuleChange::Created)
            }
            // A concurrent delivery of the same event won the race
            Err(RemoteError::Conflict(_)) => Ok(RuleChange::AlreadyActive),
            Err(e) => Err(e),
        }
    }

    /// Make sure no rule silences `resource`
    #[instrument(skip(self, resource), fields(resource_id = %resource.resource_id))]
    pub async fn ensure_unsuppressed(
        &self,
        resource: &TargetResource,
    ) -> Result<RuleChange, SuppressionError> {
        let rule = self.rule_name(resource);
        let ctx = self.context_for(resource);
        let result = self.unsuppress(&ctx, &rule).await;
        record("unsuppress", &result);
        result.map_err(|e| {
            warn!(rule = %rule, "Failed to remove suppression: {}", e);
            self.error(&rule, resource, e)
        })
    }

    async fn unsuppress(&self, ctx: &ScopeContext, rule: &str) -> Result<RuleChange, RemoteError> {
        if self.state_of(ctx, rule).await? == RuleState::Absent {
            debug!(rule = %rule, "Suppression rule already absent");
            return Ok(RuleChange::AlreadyAbsent);
        }
        if self.dry_run {
            info!(rule = %rule, "Dry run: would remove suppression rule");
            return Ok(RuleChange::WouldRemove);
        }

        match with_timeout(self.call_timeout, self.service.delete(ctx, rule)).await {
            Ok(()) => {
                info!(rule = %rule, "Removed suppression rule");
                Ok(RuleChange::Removed)
            }
            Err(RemoteError::NotFound) => Ok(RuleChange::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }
}

#[cfg(feature = "metrics")]
fn record(operation: &str, result: &Result<RuleChange, RemoteError>) {
    let label = match result {
        Ok(change) => change.as_str(),
        Err(_) => "error",
    };
    crate::metrics::inc_rule_operation(operation, label);
}

#[cfg(not(feature = "metrics"))]
fn record(_operation: &str, _result: &Result<RuleChange, RemoteError>) {}
