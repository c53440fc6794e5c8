// Buffered response representation shared by the upstream, the store and the server.

use bytes::Bytes;
use reqwest::header::{HeaderMap, VARY};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Response type as classified by the fetch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    Basic,
    /// Cross-origin response the server opted into via CORS.
    Cors,
    /// Cross-origin response without CORS consent.
    Opaque,
    /// Redirect answer returned because redirects were not followed.
    OpaqueRedirect,
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::OpaqueRedirect => "opaqueredirect",
            ResponseType::Error => "error",
        }
    }
}

/// A fully buffered response. The body is read from the network exactly once;
/// [`TileResponse::duplicate`] hands out a second view over the same bytes.
#[derive(Debug)]
pub struct TileResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
}

impl TileResponse {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        response_type: ResponseType,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            response_type,
        }
    }

    /// Second, independent copy for the store. Shares the buffered body.
    pub fn duplicate(&self) -> Self {
        Self {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            response_type: self.response_type,
        }
    }

    /// Cacheable iff status is exactly 200 and the type is basic or cors.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
            && matches!(self.response_type, ResponseType::Basic | ResponseType::Cors)
    }

    /// Lowercased field names listed in the `Vary` header(s).
    pub fn vary_fields(&self) -> Vec<String> {
        self.headers
            .get_all(VARY)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|field| field.trim().to_ascii_lowercase())
            .filter(|field| !field.is_empty())
            .collect()
    }
}
