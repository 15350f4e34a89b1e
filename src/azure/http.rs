//! Authenticated HTTP plumbing shared by the Resource Graph and ARM clients

use std::time::Duration;

use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, Response};
use serde_json::Value;
use tracing::{debug, warn};

use super::{RemoteError, ScopeContext};

/// Retry-After values above this are ignored in favour of computed backoff
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Thin wrapper over `reqwest::Client` that authenticates per scope and
/// retries throttled or transient failures with exponential backoff
#[derive(Clone, Debug)]
pub struct ArmHttp {
    client: Client,
    endpoint: String,
    max_retries: u32,
    base_delay: Duration,
}

impl ArmHttp {
    pub fn new(client: Client, endpoint: &str, max_retries: u32) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            max_retries,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Override the base backoff delay (tests use a few milliseconds)
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build an absolute URL from a path beginning with `/`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Send a request as the scope's principal
    ///
    /// Non-success statuses come back as [`RemoteError`]; 429 and 5xx responses
    /// and transport failures are retried up to `max_retries` times first.
    pub async fn send(
        &self,
        ctx: &ScopeContext,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Response, RemoteError> {
        let mut attempt = 0;

        loop {
            let token = ctx.credential.token().await?;
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let (error, retry_after) = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let retry_after = parse_retry_after(&response);
                    let body = response.text().await.unwrap_or_default();
                    (RemoteError::from_status(status, body), retry_after)
                }
                Err(e) => (RemoteError::from(e), None),
            };

            if !error.is_retryable() || attempt >= self.max_retries {
                return Err(error);
            }

            attempt += 1;
            let delay = retry_after.unwrap_or_else(|| backoff_delay(self.base_delay, attempt));
            warn!(
                "{} {} failed: {}, retrying in {:?} (attempt {}/{})",
                method, url, error, delay, attempt, self.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    let secs: u64 = response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let delay = Duration::from_secs(secs);
    (delay <= MAX_RETRY_AFTER).then_some(delay)
}

/// Exponential backoff with up to 50% jitter, capped at 30 seconds
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1).min(6)));
    let capped = exp.min(MAX_RETRY_AFTER);
    let jitter_ms = (capped.as_millis() as u64) / 2;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    debug!("Computed backoff {:?} + {}ms jitter", capped, jitter);
    capped + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::StaticToken;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> ScopeContext {
        ScopeContext::new("sub1", Arc::new(StaticToken::new("tok")))
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let first = backoff_delay(base, 1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let third = backoff_delay(base, 3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));
        let huge = backoff_delay(Duration::from_secs(10), 20);
        assert!(huge >= MAX_RETRY_AFTER && huge <= MAX_RETRY_AFTER + Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_send_attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let http = ArmHttp::new(Client::new(), &server.uri(), 0);
        let response = http
            .send(&ctx(), Method::GET, &http.url("/ping"), None)
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_send_retries_server_errors_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(3)
            .mount(&server)
            .await;

        let http = ArmHttp::new(Client::new(), &server.uri(), 2)
            .with_base_delay(Duration::from_millis(5));
        let err = http
            .send(&ctx(), Method::GET, &http.url("/flaky"), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Status {
                code: 503,
                body: "busy".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_send_does_not_retry_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let http = ArmHttp::new(Client::new(), &server.uri(), 3);
        let err = http
            .send(&ctx(), Method::GET, &http.url("/missing"), None)
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
    }
}
