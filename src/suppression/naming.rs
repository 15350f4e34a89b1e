//! Deterministic suppression rule names
//!
//! A rule's identity is recomputed from the resource name on every event,
//! so creation and removal agree without a persisted mapping.

/// Prefix applied when none is configured
pub const DEFAULT_RULE_PREFIX: &str = "maint-suppress-";

/// ARM resource names are limited to 260 characters
pub const MAX_RULE_NAME_LEN: usize = 260;

const FORBIDDEN: &[char] = &['<', '>', '%', '&', ':', '\\', '?', '/', '#', '*'];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleNaming {
    prefix: String,
}

impl Default for RuleNaming {
    fn default() -> Self {
        Self::new(DEFAULT_RULE_PREFIX)
    }
}

impl RuleNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Rule name for a resource: prefix + lowercased, sanitized resource name
    pub fn rule_name(&self, resource_name: &str) -> String {
        let sanitized: String = resource_name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if FORBIDDEN.contains(&c) || c.is_control() { '-' } else { c })
            .collect();
        let mut name = format!("{}{}", self.prefix, sanitized);
        if name.len() > MAX_RULE_NAME_LEN {
            let mut cut = MAX_RULE_NAME_LEN;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        // ARM rejects names ending in a period or space
        name.trim_end_matches(['.', ' ']).to_string()
    }

    /// Whether `prefix` can start a valid rule name
    pub fn is_valid_prefix(prefix: &str) -> bool {
        !prefix.is_empty()
            && prefix.len() < MAX_RULE_NAME_LEN
            && !prefix.chars().any(|c| FORBIDDEN.contains(&c) || c.is_control())
    }
}

/// Rule name for `resource_name` under the default prefix
pub fn rule_name(resource_name: &str) -> String {
    RuleNaming::default().rule_name(resource_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_name_is_deterministic() {
        assert_eq!(rule_name("vm-a"), "maint-suppress-vm-a");
        assert_eq!(rule_name("vm-a"), rule_name("vm-a"));
    }

    #[test]
    fn test_rule_name_ignores_case() {
        assert_eq!(rule_name("VM-A"), rule_name("vm-a"));
    }

    #[test]
    fn test_rule_name_sanitizes_forbidden_characters() {
        assert_eq!(rule_name("web/01:a"), "maint-suppress-web-01-a");
        assert_eq!(rule_name("db."), "maint-suppress-db");
    }

    #[test]
    fn test_rule_name_is_bounded() {
        let long = "x".repeat(400);
        assert_eq!(rule_name(&long).len(), MAX_RULE_NAME_LEN);
    }

    #[test]
    fn test_custom_prefix() {
        let naming = RuleNaming::new("quiet-");
        assert_eq!(naming.rule_name("vm-b"), "quiet-vm-b");
    }

    #[test]
    fn test_prefix_validation() {
        assert!(RuleNaming::is_valid_prefix("maint-suppress-"));
        assert!(!RuleNaming::is_valid_prefix(""));
        assert!(!RuleNaming::is_valid_prefix("bad/prefix"));
    }
}
