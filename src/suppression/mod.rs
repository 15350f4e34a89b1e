//! Suppression rules: deterministic naming, the alerting-platform interface
//! and the per-resource lifecycle manager

mod alert_processing;
mod manager;
mod naming;
mod service;

pub use alert_processing::AlertProcessingRuleService;
pub use manager::{RuleChange, RuleState, SuppressionRuleManager, DEFAULT_DESCRIPTION_TEMPLATE};
pub use naming::{rule_name, RuleNaming, DEFAULT_RULE_PREFIX, MAX_RULE_NAME_LEN};
pub use service::{InMemorySuppressionService, RuleHandle, StoredRule, SuppressionService};
