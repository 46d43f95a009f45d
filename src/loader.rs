//! Per-request route loading for dynamic mode.

use crate::config::{ResponseType, RouteDefinition, RouteResponse};
use crate::context::InboundRequest;
use crate::error::LoaderError;
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Resolves the route table for a single request.
///
/// Called once per request, possibly from many tasks at once. Backing-store
/// failures must come back as `Err`, never as a panic.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, request: &InboundRequest) -> Result<Vec<RouteDefinition>, LoaderError>;
}

/// A persisted route row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteRecord {
    pub name: String,
    pub path: String,
    pub method: String,
    pub response_type: String,
    pub response_status_code: u16,
    #[serde(default)]
    pub response_body: String,
    /// JSON object text, optionally percent-encoded
    #[serde(default)]
    pub response_headers: String,
    /// Milliseconds
    #[serde(default)]
    pub response_delay: u64,
    /// Routing key the row is filed under
    pub prefix: String,
}

impl RouteRecord {
    /// Convert the row into a route definition.
    pub fn into_definition(self) -> Result<RouteDefinition, LoaderError> {
        let response_type: ResponseType = self.response_type.parse().map_err(|e| LoaderError::InvalidRow {
            name: self.name.clone(),
            reason: format!("{}", e),
        })?;

        let headers = decode_headers(&self.response_headers).map_err(|reason| LoaderError::InvalidRow {
            name: self.name.clone(),
            reason,
        })?;

        let response = RouteResponse {
            response_type,
            status_code: self.response_status_code,
            body: self.response_body,
            headers,
            delay_ms: self.response_delay,
        };

        Ok(RouteDefinition {
            name: Some(self.name),
            path: self.path,
            method: self.method,
            response,
        })
    }
}

/// Parse stored header text. Plain JSON is accepted as-is, otherwise the text
/// is percent-decoded first.
fn decode_headers(raw: &str) -> Result<HashMap<String, String>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(HashMap::new());
    }

    serde_json::from_str(raw).or_else(|_| {
        let decoded = percent_decode_str(raw).decode_utf8_lossy();
        serde_json::from_str(&decoded).map_err(|e| format!("invalid response_headers: {}", e))
    })
}

/// Loader backed by a YAML (or JSON) file of [`RouteRecord`] rows.
///
/// The file is re-read on every call, so edits show up on the next request.
#[derive(Debug, Clone)]
pub struct TableFileLoader {
    path: PathBuf,
}

impl TableFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Loader for TableFileLoader {
    async fn load(&self, request: &InboundRequest) -> Result<Vec<RouteDefinition>, LoaderError> {
        let prefix = request.prefix();
        let content = tokio::fs::read_to_string(&self.path).await?;
        let records: Vec<RouteRecord> =
            serde_yaml::from_str(&content).map_err(|e| LoaderError::Parse(e.to_string()))?;

        let routes = records
            .into_iter()
            .filter(|r| r.prefix == prefix)
            .map(RouteRecord::into_definition)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(prefix = %prefix, routes = routes.len(), "Loaded route definitions");
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use std::io::Write;

    fn request(path: &str) -> InboundRequest {
        InboundRequest::new(Method::GET, path, None, HeaderMap::new(), "")
    }

    fn record(name: &str, prefix: &str) -> RouteRecord {
        RouteRecord {
            name: name.to_string(),
            path: format!("{}/{{id}}", prefix),
            method: "GET".to_string(),
            response_type: "DYNAMIC".to_string(),
            response_status_code: 200,
            response_body: r#"{"id": "{{ requestVar "id" }}"}"#.to_string(),
            response_headers: String::new(),
            response_delay: 25,
            prefix: prefix.to_string(),
        }
    }

    #[test]
    fn test_record_into_definition() {
        let mut row = record("get-item", "/items");
        row.response_headers = r#"{"Content-Type": "application/json"}"#.to_string();

        let route = row.into_definition().unwrap();
        assert_eq!(route.name.as_deref(), Some("get-item"));
        assert_eq!(route.path, "/items/{id}");
        assert_eq!(route.response.response_type, ResponseType::Dynamic);
        assert_eq!(route.response.delay_ms, 25);
        assert_eq!(
            route.response.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_percent_encoded_headers() {
        let mut row = record("encoded", "/items");
        row.response_headers = "%7B%22X-Trace%22%3A%22a%2Fb%22%7D".to_string();

        let route = row.into_definition().unwrap();
        assert_eq!(route.response.headers.get("X-Trace").map(String::as_str), Some("a/b"));
    }

    #[test]
    fn test_invalid_rows() {
        let mut row = record("bad-type", "/items");
        row.response_type = "STREAM".to_string();
        assert!(matches!(row.into_definition(), Err(LoaderError::InvalidRow { .. })));

        let mut row = record("bad-headers", "/items");
        row.response_headers = "not json".to_string();
        assert!(matches!(row.into_definition(), Err(LoaderError::InvalidRow { .. })));
    }

    #[test]
    fn test_percent_encoded_headers_keep_stray_percent() {
        let mut row = record("stray", "/items");
        row.response_headers = "%7B%22X-Ratio%22%3A%22100%25%20%zz%22%7D".to_string();

        let route = row.into_definition().unwrap();
        assert_eq!(route.response.headers.get("X-Ratio").map(String::as_str), Some("100% %zz"));
    }

    #[tokio::test]
    async fn test_table_file_filters_by_prefix() {
        let rows = vec![record("item", "/items"), record("order", "/orders")];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_yaml::to_string(&rows).unwrap().as_bytes()).unwrap();

        let loader = TableFileLoader::new(file.path());

        let routes = loader.load(&request("/items/1")).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name.as_deref(), Some("item"));

        let routes = loader.load(&request("/unknown/1")).await.unwrap();
        assert!(routes.is_empty());
    }

    #[test]
    fn test_bundled_table_rows_convert() {
        let rows: Vec<RouteRecord> =
            serde_yaml::from_str(include_str!("../demos/routes-table.yaml")).unwrap();
        let routes = rows
            .into_iter()
            .map(RouteRecord::into_definition)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(routes.len(), 3);
        assert_eq!(
            routes[0].response.headers.get("Item-ID").map(String::as_str),
            Some(r#"{{ requestVar "id" }}"#)
        );
        for route in &routes {
            route.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_table_file_errors() {
        let loader = TableFileLoader::new("/nonexistent/stubsmith/routes.yaml");
        assert!(matches!(loader.load(&request("/items")).await, Err(LoaderError::Io(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"- name: [unterminated").unwrap();
        let loader = TableFileLoader::new(file.path());
        assert!(matches!(loader.load(&request("/items")).await, Err(LoaderError::Parse(_))));
    }
}
