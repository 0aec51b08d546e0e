//! Request dispatch.
//!
//! Routes a request to its template file, then either proxies it or
//! resolves the template against the request context. Every failure is
//! turned into the `{"error": "..."}` envelope here; nothing escapes.

use crate::config::GlobalSettings;
use crate::context::{RequestContext, RequestParts};
use crate::error::MockError;
use crate::proxy::{self, Upstream};
use crate::routes::RouteRegistry;
use crate::template::{TemplateEngine, TemplateNode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Response payload produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    /// Resolved template, error envelope, or upstream JSON
    Json(Value),
    /// Upstream body that is not JSON
    Text(String),
}

/// Dispatches mock requests.
pub struct Dispatcher {
    routes: Arc<RouteRegistry>,
    engine: TemplateEngine,
    upstream: Arc<dyn Upstream>,
    settings: GlobalSettings,
    /// Total requests dispatched.
    requests_total: AtomicU64,
    /// Requests answered with the error envelope.
    requests_failed: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher over a loaded route registry.
    pub fn new(
        routes: Arc<RouteRegistry>,
        engine: TemplateEngine,
        upstream: Arc<dyn Upstream>,
        settings: GlobalSettings,
    ) -> Self {
        info!(
            root = %routes.root().display(),
            routes = routes.table().len(),
            "Mock dispatcher initialized"
        );
        Self {
            routes,
            engine,
            upstream,
            settings,
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    /// Get total requests dispatched.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get requests answered with an error envelope.
    pub fn total_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    /// The route registry served by this dispatcher.
    pub fn routes(&self) -> &Arc<RouteRegistry> {
        &self.routes
    }

    /// Handle one request. Always yields a payload.
    pub async fn dispatch(&self, parts: &RequestParts) -> MockResponse {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        match self.try_dispatch(parts).await {
            Ok(response) => response,
            Err(err) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    method = %parts.method,
                    path = %parts.path(),
                    error = %err,
                    "Request failed"
                );
                MockResponse::Json(err.to_body())
            }
        }
    }

    async fn try_dispatch(&self, parts: &RequestParts) -> Result<MockResponse, MockError> {
        let matched = self
            .routes
            .resolve(parts.path())
            .ok_or(MockError::RouteNotFound)?;
        info!(
            method = %parts.method,
            path = %parts.path(),
            file = %matched.file.display(),
            params = ?matched.params,
            "Route matched"
        );

        let raw = tokio::fs::read_to_string(&matched.file).await?;
        let content = raw.trim();
        let context = RequestContext::build(parts, matched.params);

        if proxy::is_proxy_target(content) {
            let body = self
                .upstream
                .fetch(content, &context.method, &context.query_pairs())
                .await?;
            return Ok(match serde_json::from_str::<Value>(&body) {
                Ok(value) => MockResponse::Json(value),
                Err(_) => MockResponse::Text(body),
            });
        }

        let template = TemplateNode::parse(content)?;
        let value = self.engine.evaluate(&template, &context)?;
        if self.settings.log_responses {
            debug!(
                method = %context.method,
                path = %context.path,
                body = %value,
                "Resolved mock response"
            );
        }
        Ok(MockResponse::Json(value))
    }
}
