//! Error taxonomy for request handling.
//!
//! Every variant is caught at the request boundary and rendered as the
//! uniform `{"error": "..."}` payload, so none of them ever escape a handler.

use serde_json::{json, Value};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving, reading, or evaluating a mock route.
#[derive(Debug, Error)]
pub enum MockError {
    /// No literal or dynamic entry matched the request path.
    #[error("Not Found")]
    RouteNotFound,

    /// A directory holds more than one dynamic directory or dynamic file.
    #[error("ambiguous dynamic entries in {}: '{first}' and '{second}'", .dir.display())]
    AmbiguousRoute {
        dir: PathBuf,
        first: String,
        second: String,
    },

    /// Reading the route tree or a template file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The proxy target could not be reached or answered with a failure status.
    #[error("proxy request to {target} failed: {reason}")]
    ProxyTransport { target: String, reason: String },

    /// Template text is neither valid JSON nor valid YAML.
    #[error("template parse error: {0}")]
    TemplateParse(String),

    /// A decorated key carries a rule the randomization library rejects.
    #[error("invalid rule '{rule}': {reason}")]
    Rule { rule: String, reason: String },

    /// A generator expression failed to render.
    #[error("generator error: {0}")]
    Generator(String),
}

impl MockError {
    /// Message placed in the error envelope.
    ///
    /// Proxy failures are reported exactly like a route miss.
    pub fn response_message(&self) -> String {
        match self {
            MockError::RouteNotFound | MockError::ProxyTransport { .. } => "Not Found".to_string(),
            other => other.to_string(),
        }
    }

    /// The `{"error": "..."}` envelope for this failure.
    pub fn to_body(&self) -> Value {
        json!({ "error": self.response_message() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_body() {
        assert_eq!(MockError::RouteNotFound.to_body(), json!({"error": "Not Found"}));
    }

    #[test]
    fn test_proxy_failure_looks_like_not_found() {
        let err = MockError::ProxyTransport {
            target: "http://127.0.0.1:9".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.to_body(), json!({"error": "Not Found"}));
    }

    #[test]
    fn test_rule_error_message() {
        let err = MockError::Rule {
            rule: "abc".to_string(),
            reason: "unrecognized rule syntax".to_string(),
        };
        assert_eq!(
            err.to_body(),
            json!({"error": "invalid rule 'abc': unrecognized rule syntax"})
        );
    }
}
