use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH, HOST};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::traits::Upstream;
use crate::engine::request::TileRequest;
use crate::engine::response::{ResponseType, TileResponse};

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Request header marking a request sent by this proxy's own upstream client.
/// A listener that receives it refuses the request instead of forwarding again.
pub const HOP_HEADER: &str = "x-tile-cache-hop";

/// Upstream backed by a shared reqwest client.
pub struct HttpUpstream {
    client: Client,
    follow_redirects: bool,
}

impl HttpUpstream {
    pub fn new() -> Result<Self> {
        Self::with_options(None, true)
    }

    pub fn with_options(timeout: Option<Duration>, follow_redirects: bool) -> Result<Self> {
        let mut builder = Client::builder().redirect(if follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        });
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            follow_redirects,
        })
    }
}

/// Derive the fetch response type from the requesting origin and the answer.
pub fn classify_response_type(
    request_origin: Option<&str>,
    response_url: &Url,
    status: StatusCode,
    headers: &HeaderMap,
    follow_redirects: bool,
) -> ResponseType {
    if !follow_redirects && status.is_redirection() {
        return ResponseType::OpaqueRedirect;
    }
    let Some(origin) = request_origin else {
        return ResponseType::Basic;
    };
    if origin == response_url.origin().ascii_serialization() {
        return ResponseType::Basic;
    }
    match headers
        .get(ACCESS_CONTROL_ALLOW_ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        Some("*") => ResponseType::Cors,
        Some(allowed) if allowed == origin => ResponseType::Cors,
        _ => ResponseType::Opaque,
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &TileRequest) -> Result<TileResponse> {
        let url = Url::parse(&request.url)
            .map_err(|e| anyhow!("invalid upstream url {}: {}", request.url, e))?;

        let mut req = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            if *name == HOST
                || *name == CONTENT_LENGTH
                || *name == HOP_HEADER
                || is_hop_by_hop(name.as_str())
            {
                continue;
            }
            req = req.header(name.clone(), value.clone());
        }
        req = req.header(HOP_HEADER, "1");
        if !request.body.is_empty() {
            req = req.body(request.body.clone());
        }

        let resp = req.send().await?;
        let status = resp.status();
        let mut headers = resp.headers().clone();
        for name in HOP_BY_HOP {
            headers.remove(*name);
        }
        let response_type = classify_response_type(
            request.origin(),
            resp.url(),
            status,
            &headers,
            self.follow_redirects,
        );
        debug!(
            "upstream {} {} status={} type={}",
            request.method,
            request.url,
            status.as_u16(),
            response_type.as_str()
        );

        let body = resp.bytes().await?;
        Ok(TileResponse::new(status, headers, body, response_type))
    }
}
