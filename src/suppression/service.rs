//! Alerting platform interface for suppression rules

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::azure::{RemoteError, ScopeContext};

/// A created suppression rule as reported by the platform
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleHandle {
    pub name: String,
    pub id: String,
    /// The single resource the rule silences
    pub scope: String,
}

/// Create/delete/exists operations on suppression rules within a scope
#[async_trait]
pub trait SuppressionService: Send + Sync {
    async fn create(
        &self,
        ctx: &ScopeContext,
        name: &str,
        scope: &str,
        description: &str,
    ) -> Result<RuleHandle, RemoteError>;

    /// Returns [`RemoteError::NotFound`] when no rule has that name
    async fn delete(&self, ctx: &ScopeContext, name: &str) -> Result<(), RemoteError>;

    async fn exists(&self, ctx: &ScopeContext, name: &str) -> Result<bool, RemoteError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRule {
    pub name: String,
    pub scope: String,
    pub description: String,
}

/// Rules held in process memory, keyed by subscription and rule name
#[derive(Default)]
pub struct InMemorySuppressionService {
    rules: RwLock<HashMap<(String, String), StoredRule>>,
}

impl InMemorySuppressionService {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(ctx: &ScopeContext, name: &str) -> (String, String) {
        (
            ctx.subscription_id.to_ascii_lowercase(),
            name.to_ascii_lowercase(),
        )
    }

    /// Snapshot of every active rule, sorted by name
    pub async fn rules(&self) -> Vec<StoredRule> {
        let mut rules: Vec<StoredRule> = self.rules.read().await.values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }
}

#[async_trait]
impl SuppressionService for InMemorySuppressionService {
    async fn create(
        &self,
        ctx: &ScopeContext,
        name: &str,
        scope: &str,
        description: &str,
    ) -> Result<RuleHandle, RemoteError> {
        let mut rules = self.rules.write().await;
        let key = Self::key(ctx, name);
        if rules.contains_key(&key) {
            return Err(RemoteError::Conflict(format!("rule {name} already exists")));
        }
        rules.insert(
            key,
            StoredRule {
                name: name.to_string(),
                scope: scope.to_string(),
                description: description.to_string(),
            },
        );
        Ok(RuleHandle {
            name: name.to_string(),
            id: format!("memory://{}/{}", ctx.subscription_id, name),
            scope: scope.to_string(),
        })
    }

    async fn delete(&self, ctx: &ScopeContext, name: &str) -> Result<(), RemoteError> {
        match self.rules.write().await.remove(&Self::key(ctx, name)) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound),
        }
    }

    async fn exists(&self, ctx: &ScopeContext, name: &str) -> Result<bool, RemoteError> {
        Ok(self.rules.read().await.contains_key(&Self::key(ctx, name)))
    }
}
