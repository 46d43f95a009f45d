//! Response synthesis.
//!
//! Turns a [`RouteResponse`] plus the request it answers into a concrete
//! status, body and header set.

use crate::config::{ResponseType, RouteResponse};
use crate::context::EvaluationContext;
use crate::error::ResponseError;
use crate::template::{has_expression, Evaluator};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of synthesizing a route response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

/// Build the response for `response` and wait out its delay.
///
/// The delay is a cooperative sleep: dropping the returned future (client
/// disconnect, request timeout) ends it early.
pub async fn synthesize(
    response: &RouteResponse,
    ctx: &EvaluationContext,
) -> Result<MockResponse, ResponseError> {
    let result = build(response, ctx)?;

    let delay = response.delay();
    if !delay.is_zero() {
        debug!(delay_ms = response.delay_ms, "Applying delay");
        tokio::time::sleep(delay).await;
    }

    Ok(result)
}

/// Build the response without applying the delay.
pub fn build(response: &RouteResponse, ctx: &EvaluationContext) -> Result<MockResponse, ResponseError> {
    let needs_templates = response.response_type == ResponseType::Dynamic
        || response.headers.values().any(|v| has_expression(v));

    // No registry unless something will be rendered.
    let evaluator = needs_templates.then(|| Evaluator::new(ctx));

    let body = match (response.response_type, &evaluator) {
        (ResponseType::Static, _) => response.body.clone(),
        (ResponseType::Dynamic, Some(evaluator)) => evaluator.render(&response.body)?,
        (ResponseType::Dynamic, None) => response.body.clone(),
    };

    let mut headers = HashMap::with_capacity(response.headers.len());
    for (name, value) in &response.headers {
        let value = match &evaluator {
            Some(evaluator) if has_expression(value) => evaluator.render(value)?,
            _ => value.clone(),
        };
        headers.insert(name.clone(), value);
    }

    Ok(MockResponse {
        status_code: response.status_code,
        body,
        headers,
    })
}

/// JSON error payload returned by the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status_code: u16,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ErrorResponse {
    pub fn not_found() -> Self {
        Self {
            status_code: 404,
            error: ErrorDetail {
                code: "not_found",
                message: "Not found".to_string(),
                reason: None,
            },
        }
    }

    pub fn internal_error(message: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            status_code: 500,
            error: ErrorDetail {
                code: "internal_error",
                message: message.into(),
                reason,
            },
        }
    }

    /// Serialized body, e.g. `{"error":{"code":"not_found","message":"Not found"}}`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":{{"code":"{}","message":"serialization failed"}}}}"#, self.error.code)
        })
    }
}
