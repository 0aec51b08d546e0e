//! Per-request context exposed to generator expressions.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;

/// Transport-neutral view of an incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    /// HTTP method
    pub method: String,
    /// Original request target (path plus query string)
    pub uri: String,
    /// Headers keyed by lower-case name
    pub headers: HashMap<String, String>,
    /// Raw request body
    pub body: Vec<u8>,
    /// Client address, if known
    pub remote_addr: Option<IpAddr>,
}

impl RequestParts {
    /// Path component of the request target.
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map_or(self.uri.as_str(), |(path, _)| path)
    }

    /// Raw query string (without `?`), empty when absent.
    pub fn query_string(&self) -> &str {
        self.uri.split_once('?').map_or("", |(_, query)| query)
    }
}

/// Immutable snapshot of one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub url: String,
    pub method: String,
    pub query: Map<String, Value>,
    pub body: Value,
    pub path: String,
    #[serde(rename = "header")]
    pub headers: HashMap<String, String>,
    pub original_url: String,
    pub host: String,
    pub hostname: String,
    pub protocol: String,
    pub ip: String,
    #[serde(rename = "querystring")]
    pub query_string: String,
    pub search: String,
    #[serde(rename = "type")]
    pub content_type: String,
    /// Parameters bound by dynamic route entries
    pub params: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

impl RequestContext {
    /// Build the context for a request routed with `params`.
    pub fn build(parts: &RequestParts, params: HashMap<String, String>) -> Self {
        let query_string = parts.query_string().to_string();
        let content_type =
            normalize_content_type(parts.headers.get("content-type").map_or("", String::as_str));
        let host = parts.headers.get("host").map(|h| strip_port(h)).unwrap_or_default();
        let cookies = parts
            .headers
            .get("cookie")
            .map(|c| parse_cookies(c))
            .unwrap_or_default();

        Self {
            url: parts.uri.clone(),
            method: parts.method.to_uppercase(),
            query: parse_query(&query_string),
            body: parse_body(&content_type, &parts.body),
            path: parts.path().to_string(),
            headers: parts.headers.clone(),
            original_url: parts.uri.clone(),
            hostname: host.clone(),
            host,
            protocol: "http".to_string(),
            ip: parts.remote_addr.map(|ip| ip.to_string()).unwrap_or_default(),
            search: format!("?{query_string}"),
            query_string,
            content_type,
            params,
            cookies,
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Query pairs in forwardable form; array values repeat the key.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (key, value) in &self.query {
            match value {
                Value::Array(items) => {
                    for item in items {
                        pairs.push((key.clone(), value_text(item)));
                    }
                }
                other => pairs.push((key.clone(), value_text(other))),
            }
        }
        pairs
    }
}

/// Lower-case the content type and drop its charset parameter.
///
/// Every non-charset segment overwrites the previous one, so the last one
/// wins. With no non-charset segment the lower-cased input is kept as is.
pub fn normalize_content_type(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut content_type = lowered.clone();
    for segment in lowered.split(';') {
        if !segment.contains("charset") {
            content_type = segment.trim().to_string();
        }
    }
    content_type
}

/// Parse a query string; repeated keys collect into an array.
pub fn parse_query(query: &str) -> Map<String, Value> {
    let mut params = Map::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());
        match params.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                params.insert(key.into_owned(), value);
            }
        }
    }
    params
}

fn parse_body(content_type: &str, body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Object(Map::new());
    }
    if content_type.contains("json") {
        return serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Map::new()));
    }
    if content_type.contains("application/x-www-form-urlencoded") {
        return std::str::from_utf8(body)
            .map(|text| Value::Object(parse_query(text)))
            .unwrap_or_else(|_| Value::Object(Map::new()));
    }
    Value::Object(Map::new())
}

fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| {
            (
                name.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            )
        })
        .collect()
}

fn strip_port(host: &str) -> String {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default().to_string();
    }
    host.split(':').next().unwrap_or_default().to_string()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
