use std::net::SocketAddr;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN};
use reqwest::Method;
use tokio::net::TcpListener;

use tile_cache_proxy::engine::request::TileRequest;
use tile_cache_proxy::engine::response::ResponseType;
use tile_cache_proxy::source::http_source::{HttpUpstream, HOP_HEADER};
use tile_cache_proxy::source::traits::Upstream;

const TILE: &[u8] = b"\x89PNG\r\n\x1a\ntile";

async fn plain_tile() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], TILE)
}

async fn cors_tile() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        TILE,
    )
}

async fn moved() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/tile/plain.png")])
}

async fn echo_method(method: axum::http::Method) -> impl IntoResponse {
    method.to_string()
}

async fn echo_hops(headers: axum::http::HeaderMap) -> impl IntoResponse {
    headers.get_all(HOP_HEADER).iter().count().to_string()
}

async fn start_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/tile/plain.png", get(plain_tile))
        .route("/tile/cors.png", get(cors_tile))
        .route("/tile/moved.png", get(moved))
        .route("/echo", get(echo_method).post(echo_method))
        .route("/hops", get(echo_hops));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

fn cross_origin_request(url: String) -> TileRequest {
    let mut headers = HeaderMap::new();
    headers.insert(ORIGIN, HeaderValue::from_static("https://map.example"));
    TileRequest::new(Method::GET, url, headers)
}

#[tokio::test]
async fn test_fetch_without_origin_is_basic() {
    let (addr, _handle) = start_server().await;
    let upstream = HttpUpstream::new().unwrap();

    let resp = upstream
        .fetch(&TileRequest::get(format!("http://{}/tile/plain.png", addr)))
        .await
        .unwrap();
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.response_type, ResponseType::Basic);
    assert_eq!(resp.headers.get(header::CONTENT_TYPE).unwrap(), "image/png");
    assert_eq!(&resp.body[..], TILE);
    assert!(resp.is_cacheable());
}

#[tokio::test]
async fn test_fetch_cross_origin_types() {
    let (addr, _handle) = start_server().await;
    let upstream = HttpUpstream::new().unwrap();

    let cors = upstream
        .fetch(&cross_origin_request(format!("http://{}/tile/cors.png", addr)))
        .await
        .unwrap();
    assert_eq!(cors.response_type, ResponseType::Cors);

    let opaque = upstream
        .fetch(&cross_origin_request(format!("http://{}/tile/plain.png", addr)))
        .await
        .unwrap();
    assert_eq!(opaque.response_type, ResponseType::Opaque);
    assert!(!opaque.is_cacheable());
}

#[tokio::test]
async fn test_redirect_handling() {
    let (addr, _handle) = start_server().await;
    let url = format!("http://{}/tile/moved.png", addr);

    let following = HttpUpstream::new().unwrap();
    let resp = following.fetch(&TileRequest::get(url.clone())).await.unwrap();
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(&resp.body[..], TILE);

    let manual = HttpUpstream::with_options(None, false).unwrap();
    let resp = manual.fetch(&TileRequest::get(url)).await.unwrap();
    assert_eq!(resp.status, StatusCode::FOUND);
    assert_eq!(resp.response_type, ResponseType::OpaqueRedirect);
}

#[tokio::test]
async fn test_method_and_body_are_forwarded() {
    let (addr, _handle) = start_server().await;
    let upstream = HttpUpstream::new().unwrap();

    let request = TileRequest::new(
        Method::POST,
        format!("http://{}/echo", addr),
        HeaderMap::new(),
    )
    .with_body(bytes::Bytes::from_static(b"payload"));
    let resp = upstream.fetch(&request).await.unwrap();
    assert_eq!(&resp.body[..], b"POST");
}

#[tokio::test]
async fn test_connection_failure_is_an_error() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let upstream = HttpUpstream::new().unwrap();
    let result = upstream
        .fetch(&TileRequest::get(format!("http://{}/tile/0/0/0.png", addr)))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_url_is_an_error() {
    let upstream = HttpUpstream::new().unwrap();
    assert!(upstream.fetch(&TileRequest::get("not a url")).await.is_err());
}

#[tokio::test]
async fn test_fetch_marks_request_as_proxy_hop_once() {
    let (addr, _handle) = start_server().await;
    let upstream = HttpUpstream::new().unwrap();

    let mut headers = HeaderMap::new();
    headers.insert(HOP_HEADER, HeaderValue::from_static("1"));
    let request = TileRequest::new(Method::GET, format!("http://{}/hops", addr), headers);

    let resp = upstream.fetch(&request).await.unwrap();
    assert_eq!(&resp.body[..], b"1");
}
