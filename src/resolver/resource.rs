//! Target resources affected by a maintenance configuration

use serde::{Deserialize, Serialize};

/// A resource bound to a maintenance configuration, discovered by a live query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResource {
    /// Fully-qualified resource id
    pub resource_id: String,
    /// Last path segment of the resource id
    pub name: String,
    pub resource_group: String,
    /// Subscription scope the resource was discovered under
    pub subscription_scope: String,
}

impl TargetResource {
    /// Derive name and resource group from a fully-qualified id
    ///
    /// Expects `/subscriptions/{sub}/resourceGroups/{rg}/providers/.../{name}`;
    /// segment names are matched case-insensitively.
    pub fn from_resource_id(resource_id: &str, subscription_scope: &str) -> Option<Self> {
        let segments: Vec<&str> = resource_id
            .trim()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        if segments.len() < 4 || !segments[0].eq_ignore_ascii_case("subscriptions") {
            return None;
        }

        let resource_group = segments
            .windows(2)
            .find(|pair| pair[0].eq_ignore_ascii_case("resourceGroups"))
            .map(|pair| pair[1])?;

        let name = segments.last()?;
        if name.eq_ignore_ascii_case(resource_group) {
            // The id points at the resource group itself, not a resource inside it
            return None;
        }

        Some(Self {
            resource_id: resource_id.trim().to_string(),
            name: (*name).to_string(),
            resource_group: resource_group.to_string(),
            subscription_scope: subscription_scope.to_string(),
        })
    }

    /// Subscription id embedded in the resource id
    pub fn subscription_id(&self) -> Option<&str> {
        let mut segments = self.resource_id.split('/').filter(|s| !s.is_empty());
        match (segments.next(), segments.next()) {
            (Some(head), Some(sub)) if head.eq_ignore_ascii_case("subscriptions") => Some(sub),
            _ => None,
        }
    }

    /// Case-insensitive identity used for deduplication
    pub fn identity_key(&self) -> String {
        self.resource_id.to_ascii_lowercase()
    }
}
