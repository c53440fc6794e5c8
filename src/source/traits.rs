use anyhow::Result;
use async_trait::async_trait;

use crate::engine::request::TileRequest;
use crate::engine::response::TileResponse;

/// The network layer. One call issues one request, with no retry; an `Err`
/// means no response was produced at all (connect, DNS, timeout, body read).
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &TileRequest) -> Result<TileResponse>;
}
