//! Top-level request dispatch.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header},
    middleware,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::handlers::{proxy_upstream, serve_static};
use crate::middleware::log_requests;
use crate::request_id::RequestContext;
use crate::state::AppState;

pub const CORS_ALLOW_ORIGIN: &str = "*";
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, X-CSRF-TOKEN, X-Requested-With";

/// Builds the service: every path lands in [`dispatch`], and the CORS set is
/// stamped onto every response, proxied and error responses included.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(middleware::from_fn(log_requests))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(CORS_ALLOW_ORIGIN),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .with_state(state)
}

/// Sends proxied prefixes upstream and everything else to the asset root.
pub async fn dispatch(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    let ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();

    if state.config.routes.matches(req.uri().path()) {
        proxy_upstream(&state, &ctx, req).await.into_response()
    } else {
        serve_static(&state, &ctx, req.uri()).await.into_response()
    }
}
