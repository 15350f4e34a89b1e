//! Explicit per-scope context passed to every catalog and suppression call

use std::fmt;
use std::sync::Arc;

use super::TokenCredential;

/// One subscription scope and the credential used to act within it
///
/// Handed to collaborators as a parameter so concurrent events working in
/// different subscriptions never share mutable "current subscription" state.
#[derive(Clone)]
pub struct ScopeContext {
    pub subscription_id: String,
    pub credential: Arc<dyn TokenCredential>,
}

impl ScopeContext {
    pub fn new(subscription_id: impl Into<String>, credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            credential,
        }
    }
}

impl fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeContext")
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

/// Builds scope contexts for the handler's single principal
#[derive(Clone)]
pub struct ScopeFactory {
    credential: Arc<dyn TokenCredential>,
}

impl ScopeFactory {
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self { credential }
    }

    pub fn context(&self, subscription_id: &str) -> ScopeContext {
        ScopeContext::new(subscription_id, Arc::clone(&self.credential))
    }
}
