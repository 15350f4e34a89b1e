//! Cloud plumbing: identity, per-scope context, remote errors and HTTP retry

mod credential;
mod error;
mod http;
mod scope;

pub use credential::{ClientSecretCredential, StaticToken, TokenCredential};
pub use error::RemoteError;
pub use http::{backoff_delay, ArmHttp};
pub use scope::{ScopeContext, ScopeFactory};

use std::future::Future;
use std::time::Duration;

/// Bound a remote call; expiry surfaces as the retryable [`RemoteError::Timeout`]
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout),
    }
}
