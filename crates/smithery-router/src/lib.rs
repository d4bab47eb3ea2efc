//! HTTP surface: the OpenAI-compatible proxy routes plus the JSON admin
//! endpoints for model visibility and request metrics.

mod admin;
mod proxy;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::warn;

use smithery_core::{ChatEngine, MasterKeyAuth};
use smithery_provider_core::ProxyError;
use smithery_storage::{MetricsStore, ModelVisibilityStore};

/// Name and version reported by the liveness route.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

#[derive(Clone)]
pub struct RouterState {
    pub engine: ChatEngine,
    pub auth: MasterKeyAuth,
    pub visibility: Arc<ModelVisibilityStore>,
    pub metrics: Arc<dyn MetricsStore>,
    pub service: ServiceInfo,
}

/// Per-request data set by the auth layer.
#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    pub trace_id: String,
    pub client_ip: Option<String>,
}

pub fn router(state: RouterState) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", post(proxy::chat_completions))
        .route("/chat-completions", post(proxy::chat_completions))
        .route("/v1/models", get(proxy::list_models))
        .route("/models", get(proxy::list_models))
        .route(
            "/settings/models/visibility",
            get(admin::get_visibility).put(admin::put_visibility),
        )
        .route("/metrics/requests", get(admin::metrics_requests))
        .route("/metrics/summary", get(admin::metrics_summary))
        .route_layer(middleware::from_fn_with_state(state.clone(), proxy_auth));

    Router::new()
        .route("/", get(root))
        .merge(protected)
        .with_state(state)
}

async fn root(State(state): State<RouterState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": format!(
            "Welcome to {} v{}. Service is running.",
            state.service.name, state.service.version
        )
    }))
}

async fn proxy_auth(
    State(state): State<RouterState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client_ip = client_ip(req.headers(), peer);

    if let Err(err) = state.auth.authenticate(req.headers()) {
        warn!(
            event = "downstream_rejected",
            trace_id = %trace_id,
            path = %req.uri().path(),
            client_ip = ?client_ip,
            status = err.status()
        );
        return error_response(&err);
    }

    req.headers_mut().remove(header::AUTHORIZATION);
    req.headers_mut().remove("x-api-key");
    req.extensions_mut().insert(RequestContext {
        trace_id,
        client_ip,
    });
    next.run(req).await
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    if let Some(forwarded) = header("x-forwarded-for") {
        let first = forwarded.split(',').next().map(str::trim).unwrap_or("");
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return Some(real_ip.to_string());
    }
    peer.map(|addr| addr.ip().to_string())
}

pub(crate) fn error_response(err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_body())).into_response()
}
