//! Integration tests for proxy behavior

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::Response,
    routing::{any, get, post},
};
use frontdoor::{
    config::{Config, ExternalOrigin, UpstreamTarget},
    error::UPSTREAM_STARTING_MESSAGE,
    router::{CORS_ALLOW_HEADERS, CORS_ALLOW_METHODS},
    server::serve,
    state::AppState,
};
use std::{
    convert::Infallible,
    io,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};

const ORIGIN: &str = "https://notes.example.com";

async fn spawn_backend(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn asset_root(name: &str) -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("proxy").join(name);
    let _ = tokio::fs::remove_dir_all(&dir).await;
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("index.html"), "<html>spa</html>").await.unwrap();
    dir
}

async fn spawn_edge(name: &str, upstream: SocketAddr) -> SocketAddr {
    spawn_edge_with(name, upstream, |_| {}).await
}

async fn spawn_edge_with(
    name: &str,
    upstream: SocketAddr,
    configure: impl FnOnce(&mut Config),
) -> SocketAddr {
    let mut config = Config::new(
        asset_root(name).await,
        ExternalOrigin::parse(ORIGIN).unwrap(),
        UpstreamTarget::from(upstream),
    );
    configure(&mut config);
    let state = Arc::new(AppState::new(config).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        serve(listener, state, std::future::pending::<()>()).await.unwrap();
    });
    addr
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

fn assert_cors(headers: &HeaderMap) {
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(headers.get("access-control-allow-methods").unwrap(), CORS_ALLOW_METHODS);
    assert_eq!(headers.get("access-control-allow-headers").unwrap(), CORS_ALLOW_HEADERS);
}

/// Renders the request headers one per line so tests can inspect what
/// actually arrived upstream.
fn dump_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            format!("{}: {}\n", name.as_str(), value.to_str().unwrap_or("<binary>"))
        })
        .collect()
}

fn header_line<'a>(dump: &'a str, name: &str) -> Option<&'a str> {
    dump.lines()
        .find_map(|line| line.strip_prefix(&format!("{name}: ")))
}

#[tokio::test]
async fn test_proxy_backend_unavailable() {
    // Reserve a port, then close it so connections are refused
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);

    let edge = spawn_edge("unavailable", closed_addr).await;
    let client = client();

    let response = client
        .get(format!("http://{}/admin/users", edge))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_cors(response.headers());
    let body = response.text().await.unwrap();
    assert_eq!(body, UPSTREAM_STARTING_MESSAGE);
    assert!(body.contains("retry"));

    // The server keeps serving after an upstream failure
    let response = client
        .get(format!("http://{}/dashboard", edge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<html>spa</html>");

    let response = client
        .get(format!("http://{}/up", edge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_proxy_with_mock_backend() {
    let backend = Router::new()
        .route(
            "/admin/users",
            get(|| async {
                let mut response = Response::new(Body::from("Backend response"));
                response.headers_mut().insert(
                    "content-type",
                    header::HeaderValue::from_static("application/json"),
                );
                response.headers_mut().insert(
                    "x-backend",
                    header::HeaderValue::from_static("test-value"),
                );
                response
            }),
        )
        .route(
            "/admin/echo",
            any(|request: Request<Body>| async move {
                let method = request.method().clone();
                let body_bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                    .await
                    .unwrap();
                let body_str = String::from_utf8(body_bytes.to_vec()).unwrap();
                Response::new(Body::from(format!("{} {}", method, body_str)))
            }),
        );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge("mock_backend", backend_addr).await;
    let client = client();

    let response = client
        .get(format!("http://{}/admin/users", edge))
        .header("x-custom", "test-value")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "application/json");
    assert_eq!(response.headers().get("x-backend").unwrap(), "test-value");
    assert_cors(response.headers());
    assert_eq!(response.text().await.unwrap(), "Backend response");

    let request_body = "{\"name\": \"test\", \"value\": 123}";
    for method in [Method::POST, Method::PUT, Method::DELETE] {
        let response = client
            .request(method.clone(), format!("http://{}/admin/echo", edge))
            .header("content-type", "application/json")
            .body(request_body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.text().await.unwrap(),
            format!("{} {}", method, request_body)
        );
    }
}

#[tokio::test]
async fn test_proxy_streams_large_body() {
    let backend = Router::new().route(
        "/livewire/upload-file",
        post(|request: Request<Body>| async move {
            let body = axum::body::to_bytes(request.into_body(), usize::MAX).await.unwrap();
            let checksum: u64 = body.iter().map(|b| u64::from(*b)).sum();
            Response::new(Body::from(format!("{} {}", body.len(), checksum)))
        }),
    );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge("large_body", backend_addr).await;

    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let checksum: u64 = payload.iter().map(|b| u64::from(*b)).sum();

    let response = client()
        .post(format!("http://{}/livewire/upload-file", edge))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        format!("{} {}", payload.len(), checksum)
    );
}

#[tokio::test]
async fn test_proxy_query_parameters() {
    let backend = Router::new().route(
        "/livewire/update",
        get(|request: Request<Body>| async move {
            let query_string = request.uri().query().unwrap_or("");
            Response::new(Body::from(format!("Query: {}", query_string)))
        }),
    );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge("query", backend_addr).await;

    let response = client()
        .get(format!("http://{}/livewire/update?q=test&page=2&limit=10", edge))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "Query: q=test&page=2&limit=10");
}

#[tokio::test]
async fn test_proxy_header_filtering() {
    let backend = Router::new().route(
        "/admin/headers",
        get(|request: Request<Body>| async move { dump_headers(request.headers()) }),
    );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge("headers", backend_addr).await;

    let response = client()
        .get(format!("http://{}/admin/headers", edge))
        .header("cf-ray", "8a1b2c3d4e5f6789-AMS")
        .header("cf-connecting-ip", "198.51.100.23")
        .header("cf-ipcountry", "TR")
        .header("cf-visitor", "{\"scheme\":\"https\"}")
        .header("x-forwarded-proto", "https")
        .header("x-custom", "should-preserve")
        .header("x-oversized", "v".repeat(9 * 1024))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let dump = response.text().await.unwrap();

    for name in ["cf-ray", "cf-connecting-ip", "cf-ipcountry", "cf-visitor", "x-oversized"] {
        assert!(header_line(&dump, name).is_none(), "{name} reached the backend");
    }
    assert_eq!(header_line(&dump, "host"), Some(backend_addr.to_string().as_str()));
    assert_eq!(header_line(&dump, "x-forwarded-host"), Some(edge.to_string().as_str()));
    assert_eq!(header_line(&dump, "x-forwarded-proto"), Some("https"));
    assert_eq!(header_line(&dump, "x-forwarded-for"), Some("127.0.0.1"));
    assert_eq!(header_line(&dump, "x-real-ip"), Some("127.0.0.1"));
    assert_eq!(header_line(&dump, "x-custom"), Some("should-preserve"));
}

#[tokio::test]
async fn test_proxy_error_propagation() {
    let backend = Router::new().route(
        "/admin/error",
        get(|| async {
            let mut response = Response::new(Body::from("Backend error"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response.headers_mut().insert(
                "x-error",
                header::HeaderValue::from_static("backend-failure"),
            );
            response
        }),
    );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge("error", backend_addr).await;

    let response = client()
        .get(format!("http://{}/admin/error", edge))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers().get("x-error").unwrap(), "backend-failure");
    assert_cors(response.headers());
    assert_eq!(response.text().await.unwrap(), "Backend error");
}

#[tokio::test]
async fn test_redirect_location_rewritten() {
    let backend_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_listener.local_addr().unwrap();

    let internal = format!("http://{}/admin/login", backend_addr);
    let backend = Router::new()
        .route(
            "/admin/users",
            get(move || {
                let internal = internal.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    *response.status_mut() = StatusCode::FOUND;
                    response.headers_mut().insert(
                        header::LOCATION,
                        header::HeaderValue::from_str(&internal).unwrap(),
                    );
                    response.headers_mut().append(
                        header::SET_COOKIE,
                        header::HeaderValue::from_static("laravel_session=abc; Path=/; HttpOnly"),
                    );
                    response.headers_mut().append(
                        header::SET_COOKIE,
                        header::HeaderValue::from_static("XSRF-TOKEN=def; Path=/"),
                    );
                    response
                }
            }),
        )
        .route(
            "/admin/logout",
            get(|| async {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::SEE_OTHER;
                response.headers_mut().insert(
                    header::LOCATION,
                    header::HeaderValue::from_static(
                        "http://localhost/admin/login?expired=1&next=%2Fadmin",
                    ),
                );
                response
            }),
        )
        .route(
            "/admin/oauth",
            get(|| async {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::FOUND;
                response.headers_mut().insert(
                    header::LOCATION,
                    header::HeaderValue::from_static("https://accounts.example.org/authorize"),
                );
                response
            }),
        );
    tokio::spawn(async move {
        axum::serve(backend_listener, backend).await.unwrap();
    });

    let edge = spawn_edge("redirects", backend_addr).await;
    let client = client();

    let response = client
        .get(format!("http://{}/admin/users", edge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        &format!("{ORIGIN}/admin/login")
    );
    assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    assert_cors(response.headers());

    let response = client
        .get(format!("http://{}/admin/logout", edge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        &format!("{ORIGIN}/admin/login?expired=1&next=%2Fadmin")
    );

    let response = client
        .get(format!("http://{}/admin/oauth", edge))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://accounts.example.org/authorize"
    );
}

#[tokio::test]
async fn test_prefix_boundary_not_proxied() {
    let backend = Router::new().fallback(|| async { "from backend" });
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge("boundary", backend_addr).await;
    let client = client();

    let response = client
        .get(format!("http://{}/administrator", edge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<html>spa</html>");

    let response = client
        .get(format!("http://{}/admin", edge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "from backend");
}

#[tokio::test]
async fn test_backend_cors_headers_overridden() {
    let backend = Router::new().route(
        "/admin/api",
        get(|| async {
            let mut response = Response::new(Body::from("ok"));
            response.headers_mut().insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                header::HeaderValue::from_static("https://only.example.com"),
            );
            response
        }),
    );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge("cors_override", backend_addr).await;

    let response = client()
        .get(format!("http://{}/admin/api", edge))
        .send()
        .await
        .unwrap();
    assert_cors(response.headers());
    assert_eq!(
        response.headers().get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN).iter().count(),
        1
    );
}

#[tokio::test]
async fn test_slow_upload_outlasts_response_timeout() {
    let backend = Router::new().route(
        "/livewire/upload-file",
        post(|request: Request<Body>| async move {
            let body = axum::body::to_bytes(request.into_body(), usize::MAX).await.unwrap();
            Response::new(Body::from(body))
        }),
    );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge_with("slow_upload", backend_addr, |config| {
        config.upstream_response_timeout = Duration::from_secs(1);
    })
    .await;

    // Five chunks 400ms apart: the upload alone takes twice the response timeout
    let chunks = futures_util::stream::unfold(0, |i| async move {
        if i == 5 {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        Some((Ok::<_, io::Error>(Bytes::from(format!("chunk{i};"))), i + 1))
    });

    let response = client()
        .post(format!("http://{}/livewire/upload-file", edge))
        .body(reqwest::Body::wrap_stream(chunks))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        "chunk0;chunk1;chunk2;chunk3;chunk4;"
    );
}

#[tokio::test]
async fn test_silent_backend_times_out() {
    let backend = Router::new().route(
        "/admin/reports",
        get(|| std::future::pending::<&'static str>())
            .post(|| std::future::pending::<&'static str>()),
    );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge_with("silent_backend", backend_addr, |config| {
        config.upstream_response_timeout = Duration::from_millis(300);
    })
    .await;
    let client = client();

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        client.get(format!("http://{}/admin/reports", edge)).send(),
    )
    .await
    .expect("edge should answer once the response timeout fires")
    .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_cors(response.headers());
    assert_eq!(response.text().await.unwrap(), UPSTREAM_STARTING_MESSAGE);

    // A request with a body gets the same treatment once the body is sent
    let response = client
        .post(format!("http://{}/admin/reports", edge))
        .body("{\"range\": \"week\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_client_disconnect_closes_upstream() {
    let (closed_tx, closed_rx) = oneshot::channel::<()>();
    let closed_tx = Arc::new(Mutex::new(Some(closed_tx)));

    let backend = Router::new().route(
        "/admin/export",
        get(move || {
            let closed_tx = closed_tx.clone();
            async move {
                let (tx, rx) = mpsc::channel::<Bytes>(1);
                tokio::spawn(async move {
                    // Produce until the connection is gone
                    while tx.send(Bytes::from(vec![b'x'; 1024])).await.is_ok() {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    if let Some(closed) = closed_tx.lock().unwrap().take() {
                        let _ = closed.send(());
                    }
                });
                let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
                });
                Body::from_stream(stream)
            }
        }),
    );
    let backend_addr = spawn_backend(backend).await;
    let edge = spawn_edge("disconnect", backend_addr).await;

    let client = client();
    let mut response = client
        .get(format!("http://{}/admin/export", edge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.chunk().await.unwrap().is_some());
    drop(response);
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), closed_rx)
        .await
        .expect("backend connection should close after the client leaves")
        .unwrap();
}
