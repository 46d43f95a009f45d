//! Configuration for the mock server.
//!
//! Defines route definitions, response templates and server settings.

use crate::error::ResponseError;
use crate::matcher::PathPattern;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Statically configured routes
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,

    /// Resolve routes per request from a route table instead
    #[serde(default)]
    pub dynamic: Option<DynamicSource>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dynamic.is_some() && !self.routes.is_empty() {
            anyhow::bail!("`routes` and `dynamic` cannot be configured together");
        }
        self.settings.validate()?;
        for (i, route) in self.routes.iter().enumerate() {
            route
                .validate()
                .map_err(|e| anyhow::anyhow!("Route {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// Where dynamic routes are loaded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicSource {
    /// Route table file, re-read on every request
    pub table: PathBuf,
}

/// One servable endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDefinition {
    /// Optional name/description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Path pattern, e.g. `/item/{id}`
    pub path: String,

    /// HTTP method, matched case-sensitively
    pub method: String,

    /// Response to synthesize
    pub response: RouteResponse,
}

impl RouteDefinition {
    pub fn new(path: impl Into<String>, method: impl Into<String>, response: RouteResponse) -> Self {
        Self {
            name: None,
            path: path.into(),
            method: method.into(),
            response,
        }
    }

    /// Validate the route definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.path.starts_with('/') {
            anyhow::bail!("path must start with '/': {}", self.path);
        }
        if self.method.is_empty() {
            anyhow::bail!("method cannot be empty");
        }
        PathPattern::parse(&self.path)?;
        self.response.validate()?;
        Ok(())
    }
}

/// How the response body is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseType {
    /// Body returned literally
    Static,
    /// Body rendered as a template
    Dynamic,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Static => "STATIC",
            ResponseType::Dynamic => "DYNAMIC",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = ResponseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STATIC" => Ok(ResponseType::Static),
            "DYNAMIC" => Ok(ResponseType::Dynamic),
            other => Err(ResponseError::NotImplemented(other.to_string())),
        }
    }
}

/// Response template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteResponse {
    /// STATIC or DYNAMIC
    #[serde(rename = "type")]
    pub response_type: ResponseType,

    /// HTTP status code
    #[serde(default = "default_status")]
    pub status_code: u16,

    /// Literal body or body template
    #[serde(default)]
    pub body: String,

    /// Response headers; values containing `{{` are templates
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Simulated latency in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_status() -> u16 {
    200
}

impl RouteResponse {
    pub fn new(response_type: ResponseType, status_code: u16, body: impl Into<String>) -> Self {
        Self {
            response_type,
            status_code,
            body: body.into(),
            headers: HashMap::new(),
            delay_ms: 0,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status_code < 100 || self.status_code > 599 {
            anyhow::bail!("Invalid status code: {}", self.status_code);
        }
        Ok(())
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log all matched routes
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Largest request body that will be buffered
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Abort requests (including delayed ones) after this long
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Headers applied to every routed response before route headers
    #[serde(default = "default_base_headers")]
    pub base_headers: HashMap<String, String>,
}

impl GlobalSettings {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", self.listen, e))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr()?;
        Ok(())
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_matches: true,
            log_unmatched: true,
            max_body_bytes: default_max_body_bytes(),
            request_timeout_ms: None,
            base_headers: default_base_headers(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_base_headers() -> HashMap<String, String> {
    HashMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_static_route() {
        let yaml = r#"
routes:
  - name: list-items
    path: /items
    method: GET
    response:
      type: STATIC
      status_code: 200
      body: '{"id": 1, "name": "Item 1"}'
      headers:
        Content-Type: application/json
"#;
        let config: MockServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].response.response_type, ResponseType::Static);
        assert_eq!(config.routes[0].name.as_deref(), Some("list-items"));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_dynamic_route_with_delay() {
        let yaml = r#"
routes:
  - path: /items/{id}
    method: POST
    response:
      type: DYNAMIC
      status_code: 418
      body: '{"id": "{{ requestVar "id" }}"}'
      headers:
        Item-ID: '{{ requestVar "id" }}'
      delay_ms: 250
"#;
        let config: MockServerConfig = serde_yaml::from_str(yaml).unwrap();
        let response = &config.routes[0].response;
        assert_eq!(response.response_type, ResponseType::Dynamic);
        assert_eq!(response.status_code, 418);
        assert_eq!(response.delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_response_type_rejected() {
        let yaml = r#"
routes:
  - path: /items
    method: GET
    response:
      type: STREAMING
"#;
        assert!(serde_yaml::from_str::<MockServerConfig>(yaml).is_err());
    }

    #[test]
    fn test_response_type_from_str() {
        assert_eq!("STATIC".parse::<ResponseType>().unwrap(), ResponseType::Static);
        assert_eq!("DYNAMIC".parse::<ResponseType>().unwrap(), ResponseType::Dynamic);

        let err = "static".parse::<ResponseType>().unwrap_err();
        assert!(matches!(err, ResponseError::NotImplemented(ref t) if t == "static"));
    }

    #[test]
    fn test_validate_status_code() {
        let mut route = RouteDefinition::new(
            "/items",
            "GET",
            RouteResponse::new(ResponseType::Static, 200, ""),
        );
        assert!(route.validate().is_ok());

        route.response.status_code = 42;
        assert!(route.validate().is_err());
    }

    #[test]
    fn test_validate_path() {
        let response = RouteResponse::new(ResponseType::Static, 200, "");
        assert!(RouteDefinition::new("items", "GET", response.clone()).validate().is_err());
        assert!(RouteDefinition::new("/items/{id:[}", "GET", response.clone()).validate().is_err());
        assert!(RouteDefinition::new("/items", "", response).validate().is_err());
    }

    #[test]
    fn test_routes_and_dynamic_are_exclusive() {
        let yaml = r#"
routes:
  - path: /items
    method: GET
    response:
      type: STATIC
dynamic:
  table: routes-table.yaml
"#;
        let config: MockServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_settings() {
        let config = MockServerConfig::default();
        assert_eq!(config.settings.listen, "0.0.0.0:3000");
        assert_eq!(config.settings.max_body_bytes, 1024 * 1024);
        assert_eq!(
            config.settings.base_headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
settings:
  listen: "127.0.0.1:8080"
  request_timeout_ms: 5000
routes:
  - path: /health
    method: GET
    response:
      type: STATIC
      body: ok
"#
        )
        .unwrap();

        let config = MockServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.settings.listen_addr().unwrap().port(), 8080);
        assert_eq!(config.settings.request_timeout_ms, Some(5000));
        assert_eq!(config.routes[0].response.status_code, 200);
    }

    #[test]
    fn test_bundled_configs_are_valid() {
        let config: MockServerConfig =
            serde_yaml::from_str(include_str!("../demos/default-config.yaml")).unwrap();
        config.validate().unwrap();
        assert!(!config.routes.is_empty());
        assert!(config.dynamic.is_none());

        let config: MockServerConfig =
            serde_yaml::from_str(include_str!("../demos/dynamic-config.yaml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.dynamic.unwrap().table, PathBuf::from("routes-table.yaml"));
    }

    #[test]
    fn test_from_file_rejects_bad_listen() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "settings:\n  listen: nowhere\n").unwrap();
        assert!(MockServerConfig::from_file(file.path()).is_err());
    }
}
