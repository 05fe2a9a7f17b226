//! Request logging middleware.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::info;

use crate::request_id::RequestContext;

/// Assigns each request a short colored id and logs it on the way in and out.
///
/// The [`RequestContext`] is stored in request extensions so handlers can tag
/// their own log lines and measure latency from the same start time.
pub async fn log_requests(mut req: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::new();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("{} → {} {}", ctx.id, method, path);
    req.extensions_mut().insert(ctx.clone());

    let response = next.run(req).await;
    info!(
        "{} ← {} {} ({}ms)",
        ctx.id,
        method,
        response.status(),
        ctx.elapsed_ms()
    );
    response
}
