// Axum request handler — turns every request on the listener into an interception.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, uri::Authority, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::engine::interceptor::{Interception, Interceptor, Outcome};
use crate::engine::request::TileRequest;
use crate::engine::response::TileResponse;
use crate::source::http_source::{is_hop_by_hop, HOP_HEADER};

/// Response header reporting how the proxy answered.
pub const CACHE_STATUS_HEADER: &str = "x-tile-cache";

#[derive(Clone)]
struct ProxyState {
    interceptor: Arc<Interceptor>,
    local_addr: SocketAddr,
}

pub struct ProxyServer {
    addr: SocketAddr,
    interceptor: Arc<Interceptor>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ProxyServer {
    /// Bind `listen_addr` and serve every request through `interceptor`.
    pub async fn start(listen_addr: SocketAddr, interceptor: Arc<Interceptor>) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = Router::new().fallback(proxy_handler).with_state(ProxyState {
            interceptor: interceptor.clone(),
            local_addr: addr,
        });

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("tile proxy listening on {}", addr);

        Ok(Self {
            addr,
            interceptor,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Proxy URL that embeds `target`, e.g. `http://127.0.0.1:port/https://host/z/x/y.png`.
    pub fn url_for(&self, target: &str) -> String {
        format!("http://{}/{}", self.addr, target)
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("tile proxy on {} shutting down", self.addr);
        }
    }
}

/// Work out the upstream URL a request is aimed at.
/// Accepts, in order:
/// - absolute-form targets (`GET http://host/path`, forward-proxy style)
/// - a path embedding an absolute URL (`/https://host/path`)
/// - origin-form with a `Host` header that is not this listener
///
/// A `Host` that names this listener (loopback, unspecified or one of its own
/// addresses, on its port) resolves to nothing.
fn resolve_target(uri: &Uri, headers: &HeaderMap, local_addr: SocketAddr) -> Option<String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Some(uri.to_string());
    }

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    if let Some(rest) = path_and_query.strip_prefix('/') {
        if rest.starts_with("http://") || rest.starts_with("https://") {
            return Some(rest.to_string());
        }
    }

    let host = headers.get(header::HOST)?.to_str().ok()?;
    let authority: Authority = host.parse().ok()?;
    if is_self(&authority, local_addr) {
        return None;
    }
    Some(format!("http://{}{}", authority, path_and_query))
}

fn is_self(authority: &Authority, local_addr: SocketAddr) -> bool {
    if authority.port_u16().unwrap_or(80) != local_addr.port() {
        return false;
    }
    let name = authority.host().trim_start_matches('[').trim_end_matches(']');
    if name.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match name.parse::<IpAddr>() {
        Ok(ip) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || ip == local_addr.ip()
                || local_addr.ip().is_unspecified()
        }
        Err(_) => false,
    }
}

fn cache_status(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::ServedFromCache(_) => "hit",
        Outcome::ServedFresh { .. } => "miss",
        Outcome::ServedFreshUncached(_) => "uncached",
        Outcome::Unresolved => "unresolved",
    }
}

fn render(response: TileResponse, cache_status: &'static str) -> Response {
    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        if *name == header::CONTENT_LENGTH || is_hop_by_hop(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(cache_status));

    (response.status, headers, response.body).into_response()
}

/// Fallback for every method and path.
async fn proxy_handler(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::CONNECT {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            "CONNECT tunnelling is not supported",
        )
            .into_response();
    }

    // Set by our own upstream client: this request already went through a proxy
    // listener once, so forwarding it again would recurse.
    if headers.contains_key(HOP_HEADER) {
        debug!("{} {} arrived from a proxy hop, refusing", method, uri);
        return (StatusCode::LOOP_DETECTED, "request looped back into the proxy").into_response();
    }

    let Some(target) = resolve_target(&uri, &headers, state.local_addr) else {
        return (StatusCode::BAD_REQUEST, "no upstream target in request").into_response();
    };

    let request = TileRequest::new(method, target, headers).with_body(body);
    let stats = state.interceptor.stats().clone();

    match state.interceptor.intercept(&request).await {
        Interception::Bypass => match state.interceptor.upstream().fetch(&request).await {
            Ok(response) => {
                stats.record_served(response.body.len() as u64);
                render(response, "bypass")
            }
            Err(e) => {
                warn!("pass-through {} failed: {:#}", request.url, e);
                StatusCode::BAD_GATEWAY.into_response()
            }
        },
        Interception::Handled(outcome) => {
            let status = cache_status(&outcome);
            debug!("{} {} -> {}", request.method, request.url, outcome.state());
            match outcome.into_response() {
                Some(response) => {
                    stats.record_served(response.body.len() as u64);
                    render(response, status)
                }
                None => StatusCode::BAD_GATEWAY.into_response(),
            }
        }
    }
}
