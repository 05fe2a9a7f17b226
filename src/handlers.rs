//! HTTP request handlers.

use axum::{
    body::{Body, BodyDataStream, Bytes, HttpBody},
    extract::ConnectInfo,
    http::{HeaderValue, Request, Uri, header},
    response::Response,
};
use futures_util::{Stream, StreamExt};
use owo_colors::OwoColorize;
use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tokio::{
    fs::File,
    sync::oneshot,
    time::{error::Elapsed, timeout},
};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::error::{ProxyError, StaticError};
use crate::headers::{ClientContext, rewrite_response_headers, upstream_request_headers};
use crate::mime::OCTET_STREAM;
use crate::request_id::RequestContext;
use crate::resolve::resolve;
use crate::state::AppState;

/// Serves a file from the asset root, falling back to the SPA entry document.
///
/// The file is streamed with its on-disk length; read failures become a 500
/// carrying the I/O error message.
pub async fn serve_static(
    state: &AppState,
    ctx: &RequestContext,
    uri: &Uri,
) -> Result<Response, StaticError> {
    let target = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());

    match open_asset(state, target).await {
        Ok((response, fallback)) => {
            info!(
                "{} ← {} {}{} ({}ms)",
                ctx.id,
                "STATIC".green(),
                response.status(),
                if fallback { " (spa fallback)" } else { "" },
                ctx.elapsed_ms()
            );
            Ok(response)
        }
        Err(err) => {
            warn!(
                "{} ← {} {} {} ({}ms)",
                ctx.id,
                "STATIC".green(),
                err.status(),
                err,
                ctx.elapsed_ms()
            );
            Err(err)
        }
    }
}

async fn open_asset(state: &AppState, target: &str) -> Result<(Response, bool), StaticError> {
    let asset = resolve(&state.config.asset_root, target).await?;
    let read_error = |source: io::Error| StaticError::Read {
        path: asset.path.clone(),
        source,
    };

    let file = File::open(&asset.path).await.map_err(read_error)?;
    let meta = file.metadata().await.map_err(read_error)?;
    if !meta.is_file() {
        return Err(read_error(io::Error::other(format!(
            "{} is not a regular file",
            asset.path.display()
        ))));
    }

    let content_type = state.config.mime_types.content_type(&asset.path);
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));

    Ok((response, asset.fallback))
}

/// Forwards the request to the admin backend and relays its response.
///
/// Method, path, query and body go through unchanged; headers are sanitized
/// on the way out and `Location` is rewritten on the way back. Both bodies
/// are streamed, so dropping the client connection drops the upstream one.
pub async fn proxy_upstream(
    state: &AppState,
    ctx: &RequestContext,
    req: Request<Body>,
) -> Result<Response, ProxyError> {
    let upstream = &state.config.upstream;
    let target = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{}", upstream.base_url(), target);

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let client = ClientContext::from_request(req.headers(), peer);
    let headers = upstream_request_headers(req.headers(), upstream, &client);

    let (parts, body) = req.into_parts();
    let mut outbound = state.client.request(parts.method, &url).headers(headers);
    let uploaded = if body.is_end_stream() {
        None
    } else {
        let (upload, uploaded) = UploadBody::new(body);
        outbound = outbound.body(reqwest::Body::wrap_stream(upload));
        Some(uploaded)
    };

    info!("{} → {} {}", ctx.id, "PROXY".yellow(), url);
    let proxy_start_time = Instant::now();

    let sent = send_awaiting_headers(outbound, uploaded, state.config.upstream_response_timeout);
    let response = match sent.await {
        Ok(Ok(response)) => response,
        Ok(Err(source)) => {
            let err = ProxyError::Unavailable {
                upstream: upstream.to_string(),
                source,
            };
            warn!("{} ← {} {} ({}ms)", ctx.id, "PROXY".yellow(), err, ctx.elapsed_ms());
            return Err(err);
        }
        Err(_) => {
            let err = ProxyError::Timeout {
                upstream: upstream.to_string(),
                timeout: state.config.upstream_response_timeout,
            };
            warn!("{} ← {} {} ({}ms)", ctx.id, "PROXY".yellow(), err, ctx.elapsed_ms());
            return Err(err);
        }
    };

    let status = response.status();
    let mut headers = response.headers().clone();
    rewrite_response_headers(&mut headers, upstream, &state.config.external_origin);

    info!(
        "{} ← {} {} ({}ms)",
        ctx.id,
        "PROXY".yellow(),
        status,
        proxy_start_time.elapsed().as_millis()
    );

    let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    Ok(relayed)
}

/// Sends `request` and waits for the response head.
///
/// The response timeout starts once the request body has been handed to the
/// upstream, so a slow upload is never cut off by it.
async fn send_awaiting_headers(
    request: reqwest::RequestBuilder,
    uploaded: Option<oneshot::Receiver<()>>,
    response_timeout: Duration,
) -> Result<reqwest::Result<reqwest::Response>, Elapsed> {
    let send = request.send();
    tokio::pin!(send);

    if let Some(uploaded) = uploaded {
        tokio::select! {
            result = &mut send => return Ok(result),
            // Resolves on completion or when the body is dropped
            _ = uploaded => {}
        }
    }
    timeout(response_timeout, send).await
}

/// Inbound request body that signals when it has been read to the end.
struct UploadBody {
    inner: BodyDataStream,
    done: Option<oneshot::Sender<()>>,
}

impl UploadBody {
    fn new(body: Body) -> (Self, oneshot::Receiver<()>) {
        let (done, uploaded) = oneshot::channel();
        let upload = Self {
            inner: body.into_data_stream(),
            done: Some(done),
        };
        (upload, uploaded)
    }
}

impl Stream for UploadBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(None) = polled {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
        polled
    }
}
