//! Request dispatch.
//!
//! Every request runs `MATCH -> (LOAD) -> SYNTHESIZE -> WRITE`. Static and
//! dynamic mode share everything except where the route table comes from.

use crate::config::{GlobalSettings, RouteDefinition};
use crate::context::{EvaluationContext, InboundRequest};
use crate::error::ResponseError;
use crate::generators::utc_timestamp;
use crate::loader::Loader;
use crate::matcher::RouteTable;
use crate::response::{synthesize, ErrorResponse, MockResponse};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Correlation id header, generated when the client does not send one.
pub const REQUEST_ID_HEADER: &str = "request-id";
/// Time the request reached the dispatcher.
pub const REQUEST_START_HEADER: &str = "x-stubsmith-req-start";
/// Time the response was handed back to the transport.
pub const REQUEST_END_HEADER: &str = "x-stubsmith-req-end";

const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Where route definitions come from.
pub enum RouteSource {
    /// Compiled once at startup and shared read-only.
    Static(RouteTable),
    /// Loaded for every request.
    Dynamic(Arc<dyn Loader>),
}

/// Routes requests to their route definitions and writes the results.
pub struct Dispatcher {
    source: RouteSource,
    settings: GlobalSettings,
}

impl Dispatcher {
    /// Dispatcher over a fixed set of routes.
    pub fn with_routes(routes: Vec<RouteDefinition>, settings: GlobalSettings) -> anyhow::Result<Self> {
        let table = RouteTable::new(routes)?;

        info!(routes = table.len(), "Static route table compiled");

        Ok(Self {
            source: RouteSource::Static(table),
            settings,
        })
    }

    /// Dispatcher that asks `loader` for the routes on every request.
    pub fn with_loader(loader: Arc<dyn Loader>, settings: GlobalSettings) -> Self {
        info!("Dynamic route loading enabled");

        Self {
            source: RouteSource::Dynamic(loader),
            settings,
        }
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    /// Build the HTTP router with all middleware layers.
    pub fn into_router(self) -> Router {
        let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

        Router::new()
            .fallback(handle)
            .with_state(Arc::new(self))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until Ctrl-C.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        let app = self.into_router();

        info!(%addr, "Mock server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Mock server stopped");
        Ok(())
    }

    /// Answer one buffered request that arrived at `started`.
    pub async fn dispatch(&self, request: InboundRequest, started: &str) -> Response {
        let method = request.method().as_str().to_string();
        let path = request.path().to_string();

        let loaded;
        let table = match &self.source {
            RouteSource::Static(table) => table,
            RouteSource::Dynamic(loader) => {
                let routes = match loader.load(&request).await {
                    Ok(routes) => routes,
                    Err(e) => {
                        error!(method = %method, path = %path, error = %e, "Failed to load route definitions");
                        return error_response(
                            ErrorResponse::internal_error(INTERNAL_ERROR_MESSAGE, Some(e.to_string())),
                            started,
                        );
                    }
                };
                loaded = match RouteTable::new(routes) {
                    Ok(table) => table,
                    Err(e) => {
                        error!(method = %method, path = %path, error = %e, "Loaded route has an invalid path pattern");
                        return error_response(
                            ErrorResponse::internal_error(INTERNAL_ERROR_MESSAGE, Some(e.to_string())),
                            started,
                        );
                    }
                };
                &loaded
            }
        };

        let Some(matched) = table.find_match(&method, &path) else {
            if self.settings.log_unmatched {
                warn!(method = %method, path = %path, "No matching route found");
            }
            return error_response(ErrorResponse::not_found(), started);
        };

        if self.settings.log_matches {
            info!(
                route = matched.route.name.as_deref().unwrap_or(&matched.route.path),
                method = %method,
                path = %path,
                "Request matched route"
            );
        }

        let route = matched.route;
        let ctx = EvaluationContext::new(request, matched.vars);

        let result = synthesize(&route.response, &ctx)
            .await
            .and_then(|result| self.write(result, started));

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!(method = %method, path = %path, error = %e, "Failed to synthesize response");
                error_response(
                    ErrorResponse::internal_error(INTERNAL_ERROR_MESSAGE, Some(e.to_string())),
                    started,
                )
            }
        }
    }

    /// Turn a synthesized result into an HTTP response.
    ///
    /// Base headers go first so route headers override them.
    fn write(&self, result: MockResponse, started: &str) -> Result<Response, ResponseError> {
        let status = StatusCode::from_u16(result.status_code)
            .map_err(|_| ResponseError::InvalidStatus(result.status_code))?;

        let mut headers = HeaderMap::new();
        apply_headers(&mut headers, &self.settings.base_headers)?;
        apply_headers(&mut headers, &result.headers)?;
        stamp(&mut headers, started);

        let mut response = Response::new(Body::from(result.body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

async fn handle(State(dispatcher): State<Arc<Dispatcher>>, request: Request) -> Response {
    let started = utc_timestamp();

    let Some(timeout_ms) = dispatcher.settings.request_timeout_ms else {
        return receive(&dispatcher, request, &started).await;
    };

    match tokio::time::timeout(Duration::from_millis(timeout_ms), receive(&dispatcher, request, &started)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(timeout_ms, "Request timed out");
            error_response(
                ErrorResponse::internal_error(
                    INTERNAL_ERROR_MESSAGE,
                    Some(format!("request timed out after {} ms", timeout_ms)),
                ),
                &started,
            )
        }
    }
}

/// Buffer the body, then dispatch.
async fn receive(dispatcher: &Dispatcher, request: Request, started: &str) -> Response {
    match InboundRequest::buffer(request, dispatcher.settings.max_body_bytes).await {
        Ok(request) => dispatcher.dispatch(request, started).await,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            error_response(
                ErrorResponse::internal_error(INTERNAL_ERROR_MESSAGE, Some(e.to_string())),
                started,
            )
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            // Without a handler the server can only be stopped by killing it.
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}

fn apply_headers(target: &mut HeaderMap, headers: &HashMap<String, String>) -> Result<(), ResponseError> {
    for (name, value) in headers {
        let invalid = |reason: String| ResponseError::InvalidHeader {
            name: name.clone(),
            reason,
        };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        target.insert(header_name, header_value);
    }
    Ok(())
}

fn stamp(headers: &mut HeaderMap, started: &str) {
    // Both timestamps are generated ASCII and always valid header values.
    if let Ok(value) = HeaderValue::from_str(started) {
        headers.insert(REQUEST_START_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&utc_timestamp()) {
        headers.insert(REQUEST_END_HEADER, value);
    }
}

fn error_response(err: ErrorResponse, started: &str) -> Response {
    let status = StatusCode::from_u16(err.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = Response::new(Body::from(err.to_json()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    stamp(headers, started);
    response
}
