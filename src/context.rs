//! Buffered inbound requests and the per-request evaluation context.
//!
//! The body is read from the transport exactly once, when the
//! [`InboundRequest`] is built. Every accessor afterwards works on that buffer.

use crate::error::EvalError;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request};
use serde_json::value::RawValue;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A request whose body has already been buffered.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
}

impl InboundRequest {
    /// Create a request from already buffered parts.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query_string: Option<&str>,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        let query = query_string
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Self {
            method,
            path: path.into(),
            query,
            headers,
            body: body.into(),
        }
    }

    /// Buffer an axum request, reading at most `limit` body bytes.
    pub async fn buffer(request: Request<Body>, limit: usize) -> Result<Self, axum::Error> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, limit).await?;

        Ok(Self::new(
            parts.method,
            parts.uri.path(),
            parts.uri.query(),
            parts.headers,
            body,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Routing key used by dynamic loaders: the first path segment.
    pub fn prefix(&self) -> String {
        extract_prefix(&self.path)
    }
}

/// Derive the lookup prefix from a URL path.
///
/// `""` and `"/"` map to `"/"`, anything else to `/` plus its first segment.
pub fn extract_prefix(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    let mut parts = path.split('/');
    match (parts.next(), parts.next()) {
        (Some(_), Some(first)) => format!("/{}", first),
        _ => path.to_string(),
    }
}

/// Everything a template can read about the request being answered.
#[derive(Debug)]
pub struct EvaluationContext {
    request: InboundRequest,
    vars: HashMap<String, String>,
    json: OnceLock<Option<Value>>,
}

impl EvaluationContext {
    /// Bind a buffered request to the path variables of the route it matched.
    pub fn new(request: InboundRequest, vars: HashMap<String, String>) -> Self {
        Self {
            request,
            vars,
            json: OnceLock::new(),
        }
    }

    pub fn request(&self) -> &InboundRequest {
        &self.request
    }

    /// Value bound to `name` by the route pattern, or `""`.
    pub fn path_variable(&self, name: &str) -> &str {
        self.vars.get(name).map(String::as_str).unwrap_or("")
    }

    /// First value of query parameter `name`, or `""`.
    pub fn query_param(&self, name: &str) -> &str {
        self.request
            .query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// Header value for `name` (case-insensitive), or `""`.
    pub fn header(&self, name: &str) -> String {
        self.request
            .headers
            .get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default()
    }

    /// Read from the request body.
    ///
    /// - no arguments: the raw body text, unescaped
    /// - `key`: raw JSON text of the field, or `""` when absent
    /// - `key, fallback`: as above, but `fallback` when absent
    pub fn body_field(&self, args: &[Value]) -> Result<Value, EvalError> {
        let (key, fallback) = match args {
            [] => return Ok(Value::String(self.raw_body())),
            [key] => (key, None),
            [key, fallback] => (key, Some(fallback)),
            _ => {
                return Err(EvalError::invalid_argument(
                    "requestBody",
                    format!("expected at most 2 arguments, got {}", args.len()),
                ))
            }
        };

        let key = key
            .as_str()
            .ok_or_else(|| EvalError::invalid_argument("requestBody", "key must be a string"))?;

        let found = if key.starts_with('$') {
            self.json()
                .and_then(|json| lookup_json_path(json, key))
                .map(|found| found.to_string())
        } else {
            std::str::from_utf8(&self.request.body)
                .ok()
                .and_then(|body| lookup_raw(body, key))
                .map(str::to_string)
        };

        match found {
            Some(found) => Ok(Value::String(found)),
            None => Ok(fallback.cloned().unwrap_or_else(|| Value::String(String::new()))),
        }
    }

    fn raw_body(&self) -> String {
        String::from_utf8_lossy(&self.request.body).into_owned()
    }

    fn json(&self) -> Option<&Value> {
        self.json
            .get_or_init(|| serde_json::from_slice(&self.request.body).ok())
            .as_ref()
    }
}

/// Find a dotted `key` in a JSON document and return the field's text exactly
/// as it appears in `body`. Numeric segments index into arrays.
fn lookup_raw<'b>(body: &'b str, key: &str) -> Option<&'b str> {
    let mut current: &'b RawValue = serde_json::from_str(body).ok()?;

    for segment in key.split('.') {
        let raw = current.get();
        current = match raw.as_bytes().first().copied()? {
            b'{' => {
                let fields: HashMap<String, &'b RawValue> = serde_json::from_str(raw).ok()?;
                *fields.get(segment)?
            }
            b'[' => {
                let items: Vec<&'b RawValue> = serde_json::from_str(raw).ok()?;
                *items.get(segment.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }

    Some(current.get())
}

/// Evaluate a JSONPath expression, keeping the first hit.
fn lookup_json_path(json: &Value, expr: &str) -> Option<Value> {
    use jsonpath_rust::JsonPath;

    let path = JsonPath::try_from(expr).ok()?;
    match path.find(json) {
        Value::Array(mut hits) if !hits.is_empty() => Some(hits.swap_remove(0)),
        _ => None,
    }
}
