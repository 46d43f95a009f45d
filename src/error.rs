//! Error types for request-scoped failures.
//!
//! None of these are fatal to the process. The dispatcher turns every one of
//! them into a well-formed HTTP error response for the request that caused it.

use thiserror::Error;

/// Failure while evaluating a body or header template.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    /// Malformed expression, unknown function or unknown identifier.
    #[error("template syntax error: {0}")]
    TemplateSyntax(String),

    /// Wrong arity or argument type passed to a template function.
    #[error("invalid argument for {function}: {reason}")]
    InvalidArgument {
        function: &'static str,
        reason: String,
    },
}

impl EvalError {
    pub(crate) fn invalid_argument(function: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function,
            reason: reason.into(),
        }
    }
}

/// Failure while synthesizing a response from a route definition.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The configured response type is not one of the supported kinds.
    #[error("response type not implemented: {0}")]
    NotImplemented(String),

    /// A body or header template failed to evaluate.
    #[error("failed to build response: {0}")]
    Build(#[from] EvalError),

    /// The configured status code cannot be sent over HTTP.
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    /// A header name or value is not valid HTTP.
    #[error("invalid response header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Failure reported by a dynamic route loader.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read route table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse route table: {0}")]
    Parse(String),

    #[error("invalid route row {name}: {reason}")]
    InvalidRow { name: String, reason: String },
}
