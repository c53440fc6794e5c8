// Intercepted request descriptor and the identity used to key the cache store.

use bytes::Bytes;
use reqwest::header::{HeaderMap, ORIGIN};
use reqwest::Method;
use sha2::{Digest, Sha256};

/// An outbound request as seen by the interceptor. Lives for one interception.
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// Forwarded upstream unchanged. Never part of the cache key.
    pub body: Bytes,
}

impl TileRequest {
    pub fn new(method: Method, url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            url: url.into(),
            headers,
            body: Bytes::new(),
        }
    }

    /// Plain GET with no headers, the shape of a map library's tile request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url, HeaderMap::new())
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Identity of this request in the cache store.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }

    /// The page origin that issued the request, if the client sent one.
    pub fn origin(&self) -> Option<&str> {
        self.headers.get(ORIGIN).and_then(|v| v.to_str().ok())
    }

    /// Header value as a string, `None` when absent or not valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Method plus URL with any fragment removed. Header-dependent matching
/// (`Vary`) is applied by the store on top of this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &str) -> Self {
        let url = match url.find('#') {
            Some(idx) => &url[..idx],
            None => url,
        };
        Self {
            method: method.as_str().to_string(),
            url: url.to_string(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stable hex digest, used as the on-disk file stem.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}
