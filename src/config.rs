//! Service configuration
//!
//! Loaded from an optional TOML file; the binary then applies CLI flags and
//! environment variables on top. Secrets are never read from the file.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::event::RouterOptions;
use crate::orchestrator::{CompletionStrategy, HandlerOptions};
use crate::suppression::{RuleNaming, DEFAULT_DESCRIPTION_TEMPLATE, DEFAULT_RULE_PREFIX};

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Resolve and plan rule changes without writing them
    pub dry_run: bool,
    pub router: RouterConfig,
    pub handler: HandlerConfig,
    pub suppression: SuppressionConfig,
    pub azure: AzureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            dry_run: false,
            router: RouterConfig::default(),
            handler: HandlerConfig::default(),
            suppression: SuppressionConfig::default(),
            azure: AzureConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    /// How long a handled event blocks redeliveries of itself
    pub dedupe_ttl_secs: u64,
    /// How long a handled completion blocks a late start of the same
    /// occurrence. Must exceed the sender's retry horizon (24h for Event Grid).
    /// Events without an occurrence (the direct shape without `occurrence`)
    /// fall back to `dedupe_ttl_secs`, and a new window for the same
    /// maintenance id inside that TTL is skipped as a duplicate.
    pub completion_tombstone_ttl_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_concurrent_batches: 4,
            dedupe_ttl_secs: 6 * 60 * 60,
            completion_tombstone_ttl_secs: 48 * 60 * 60,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerConfig {
    pub call_timeout_secs: u64,
    pub max_parallel_resources: usize,
    pub completion_strategy: CompletionStrategy,
    pub retry_partial_failures: bool,
    pub window_store_path: Option<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            max_parallel_resources: 8,
            completion_strategy: CompletionStrategy::default(),
            retry_partial_failures: false,
            window_store_path: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SuppressionConfig {
    pub rule_prefix: String,
    /// Resource group holding the rules in each subscription
    pub rule_resource_group: String,
    pub description: String,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            rule_prefix: DEFAULT_RULE_PREFIX.to_string(),
            rule_resource_group: "rg-maintenance-suppression".to_string(),
            description: DEFAULT_DESCRIPTION_TEMPLATE.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Azure,
    /// In-process catalog and rule store, for local runs
    Memory,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AzureConfig {
    pub backend: Backend,
    pub arm_endpoint: String,
    pub authority_host: String,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub max_retries: u32,
    #[serde(skip)]
    pub client_secret: Option<String>,
    #[serde(skip)]
    pub static_token: Option<String>,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            arm_endpoint: "https://management.azure.com".to_string(),
            authority_host: "https://login.microsoftonline.com".to_string(),
            tenant_id: None,
            client_id: None,
            max_retries: 3,
            client_secret: None,
            static_token: None,
        }
    }
}

impl Config {
    /// Read `path`, or start from defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.router.batch_size == 0 {
            return Err(Error::ConfigError("router.batch_size must be at least 1".to_string()));
        }
        if self.router.max_concurrent_batches == 0 {
            return Err(Error::ConfigError(
                "router.max_concurrent_batches must be at least 1".to_string(),
            ));
        }
        if self.router.completion_tombstone_ttl_secs < self.router.dedupe_ttl_secs {
            return Err(Error::ConfigError(
                "router.completion_tombstone_ttl_secs must not be shorter than router.dedupe_ttl_secs"
                    .to_string(),
            ));
        }
        if self.handler.call_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "handler.call_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.handler.max_parallel_resources == 0 {
            return Err(Error::ConfigError(
                "handler.max_parallel_resources must be at least 1".to_string(),
            ));
        }
        if !RuleNaming::is_valid_prefix(&self.suppression.rule_prefix) {
            return Err(Error::ConfigError(format!(
                "suppression.rule_prefix {:?} is not a valid rule name prefix",
                self.suppression.rule_prefix
            )));
        }

        if self.azure.backend == Backend::Azure {
            if self.suppression.rule_resource_group.trim().is_empty() {
                return Err(Error::ConfigError(
                    "suppression.rule_resource_group is required".to_string(),
                ));
            }
            let has_secret = self.azure.tenant_id.is_some()
                && self.azure.client_id.is_some()
                && self.azure.client_secret.is_some();
            if self.azure.static_token.is_none() && !has_secret {
                return Err(Error::ConfigError(
                    "azure backend needs AZURE_ACCESS_TOKEN or tenant_id, client_id and AZURE_CLIENT_SECRET"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.handler.call_timeout_secs)
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            batch_size: self.router.batch_size,
            max_concurrent_batches: self.router.max_concurrent_batches,
            dedupe_ttl: Duration::from_secs(self.router.dedupe_ttl_secs),
            completion_tombstone_ttl: Duration::from_secs(self.router.completion_tombstone_ttl_secs),
        }
    }

    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            completion_strategy: self.handler.completion_strategy,
            max_parallel_resources: self.handler.max_parallel_resources,
            retry_partial_failures: self.handler.retry_partial_failures,
        }
    }
}
