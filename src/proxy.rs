//! Proxy routes.
//!
//! A route file whose whole trimmed content is an absolute http(s) URL is
//! forwarded instead of evaluated: the upstream is called with the incoming
//! method and query, and its body is relayed.

use crate::error::MockError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static PROXY_TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://\S+$").expect("proxy target pattern is valid"));

/// Whether trimmed route content names a proxy target.
pub fn is_proxy_target(content: &str) -> bool {
    PROXY_TARGET_RE.is_match(content)
}

/// Outbound HTTP used by proxy routes.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch `target` and return the response body text.
    ///
    /// Transport failures and non-2xx statuses are both errors.
    async fn fetch(
        &self,
        target: &str,
        method: &str,
        query: &[(String, String)],
    ) -> Result<String, MockError>;
}

/// [`Upstream`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// Client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, MockError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MockError::ProxyTransport {
                target: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(
        &self,
        target: &str,
        method: &str,
        query: &[(String, String)],
    ) -> Result<String, MockError> {
        let transport = |reason: String| MockError::ProxyTransport {
            target: target.to_string(),
            reason,
        };

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| transport(e.to_string()))?;
        debug!(%target, %method, "Forwarding to upstream");

        let response = self
            .client
            .request(method, target)
            .query(query)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| transport(e.to_string()))?;

        response.text().await.map_err(|e| transport(e.to_string()))
    }
}
